use nalgebra::*;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use std::f64::consts::PI;
use thiserror::Error;

/// Ellipsoid primitive and the single bounding ellipsoid of a point cloud.
pub mod ellipsoid;

pub use ellipsoid::*;

/// Union of ellipsoids and the recursive cluster-and-split decomposition producing it.
pub mod multi;

pub use multi::*;

/// Violations of the geometric invariants of an ellipsoid. Those are never recovered
/// locally: they indicate invalid caller input or a bug upstream.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EllipsoidError {

    #[error("Dimension mismatch: expected {expected}, found {found}")]
    ShapeMismatch { expected : usize, found : usize },

    #[error("Ellipsoid matrix is not positive-definite (smallest eigenvalue {min_eigval})")]
    NotPositiveDefinite { min_eigval : f64 },

    #[error("Cannot bound an empty point set")]
    EmptyPointSet,

    #[error("Cannot bound {npoints} point(s) with zero volume per point")]
    DegeneratePointSet { npoints : usize }

}

/// Volume of the unit n-ball. Built from the even (pi^k/k!) and odd recursions, multiplying
/// by 2 pi / i at each step of two dimensions starting from 1 (even n) or 2 (odd n).
pub fn vol_prefactor(n : usize) -> f64 {
    let (mut f, mut i) = if n % 2 == 0 { (1.0, 2) } else { (2.0, 3) };
    while i <= n {
        f *= 2. / (i as f64) * PI;
        i += 2;
    }
    f
}

/// Draws a point uniformly from the interior of the unit n-ball. The direction is an
/// isotropic gaussian normalized to unit length; the radius is u^(1/n), which makes the
/// density uniform over the volume rather than over the radius.
pub fn randsphere<R>(n : usize, rng : &mut R) -> DVector<f64>
where
    R : Rng + ?Sized
{
    let z : DVector<f64> = DVector::from_iterator(n, (0..n).map(|_| StandardNormal.sample(&mut *rng) ));
    let r = rng.gen::<f64>().powf(1. / n as f64);
    z.normalize() * r
}
