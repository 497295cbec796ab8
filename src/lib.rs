/// Ellipsoidal bounds over the unit cube: the ellipsoid primitive, the minimum-volume
/// bounding ellipsoid of a point cloud and its recursive multi-ellipsoid decomposition.
pub mod bound;

/// Numerical helpers shared by the sampler and by posterior post-processing
/// (log-space accumulation, weighted choice, equal-weight resampling, weighted moments).
pub mod calc;

/// Clustering estimators used to split point clouds (2-means over whitened coordinates).
pub mod fit;

/// Nested sampling: the live point ledger, constrained samplers, evaluation pools and
/// the evidence-accumulating main loop.
pub mod sim;

pub use bound::{Ellipsoid, MultiEllipsoid, Decomposer, bounding_ellipsoid, vol_prefactor, randsphere};

pub use sim::{sample, Method, NestedSampler, Settings, NestedError};

pub use sim::result::NestedResult;

pub use sim::pool::{Pool, SerialPool, ThreadPool};

/// Whether this build carries the clustering capability required by
/// multi-ellipsoid decomposition ([`Method::Multi`]).
pub const HAVE_CLUSTERING : bool = cfg!(feature = "clustering");
