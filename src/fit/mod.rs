use std::borrow::Borrow;

/// Clustering estimators, compiled only with the "clustering" feature (required for
/// multi-ellipsoid decomposition).
#[cfg(feature = "clustering")]
pub mod cluster;

/// Trait shared by estimators that are fitted from a sample of real-valued observations
/// in a single call. Observations are borrowed as slices, so callers can feed vectors,
/// arrays or matrix columns without copying into an intermediate container. The sample
/// iterator must be cheap to clone, since estimators usually make several passes over it.
pub trait Estimator
where
    Self : Sized
{

    type Settings;

    type Error;

    fn estimate(
        sample : impl Iterator<Item=impl Borrow<[f64]>> + Clone,
        settings : Self::Settings
    ) -> Result<Self, Self::Error>;

}
