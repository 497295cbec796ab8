use nalgebra::*;
use rand::Rng;
use serde::{Serialize, Deserialize};
use std::fmt::{self, Display};
use super::{EllipsoidError, vol_prefactor, randsphere};
use crate::calc::{running, SQRT_EPS};

/// Eigenvalues of the enlarged covariance below this (relative to the largest eigenvalue,
/// or in absolute terms for tiny clouds) mark degenerate directions.
const EIGVAL_FLOOR : f64 = 1e-10;

/// An n-dimensional ellipsoid { x : (x - c)^T A (x - c) <= 1 }, parametrized by its center c
/// and the symmetric positive-definite matrix A. The axis lengths are 1/sqrt(eigval(A)) and
/// the axes are the eigenvectors of A scaled by the corresponding lengths, so that
/// axes * z maps the unit ball onto the (centered) ellipsoid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ellipsoid {

    center : DVector<f64>,

    a : DMatrix<f64>,

    vol : f64,

    axlens : DVector<f64>,

    axes : DMatrix<f64>

}

impl Ellipsoid {

    /// Builds the ellipsoid from its center and matrix. The matrix is symmetrized before being
    /// decomposed, so round-off asymmetries from upstream products are tolerated; a
    /// non-positive (or non-finite) eigenvalue is an error.
    pub fn new(center : DVector<f64>, a : DMatrix<f64>) -> Result<Self, EllipsoidError> {
        let n = center.nrows();
        if n == 0 {
            return Err(EllipsoidError::ShapeMismatch { expected : 1, found : 0 });
        }
        if a.nrows() != n || a.ncols() != n {
            let found = if a.nrows() != n { a.nrows() } else { a.ncols() };
            return Err(EllipsoidError::ShapeMismatch { expected : n, found });
        }
        let a = (&a + a.transpose()).scale(0.5);
        let eig = SymmetricEigen::new(a.clone());
        let min_eigval = eig.eigenvalues.iter().cloned().fold(f64::INFINITY, f64::min);
        if !(min_eigval > 0.0) || eig.eigenvalues.iter().any(|w| !w.is_finite() ) {
            return Err(EllipsoidError::NotPositiveDefinite { min_eigval });
        }
        let axlens = eig.eigenvalues.map(|w| 1. / w.sqrt() );
        let mut axes = eig.eigenvectors;
        for (mut col, len) in axes.column_iter_mut().zip(axlens.iter()) {
            col.scale_mut(*len);
        }
        let vol = vol_prefactor(n) * axlens.iter().product::<f64>();
        Ok(Self { center, a, vol, axlens, axes })
    }

    /// Ball of the informed radius.
    pub fn sphere(center : DVector<f64>, radius : f64) -> Result<Self, EllipsoidError> {
        let n = center.nrows();
        Self::new(center, DMatrix::identity(n, n).unscale(radius.powi(2)))
    }

    pub fn dim(&self) -> usize {
        self.center.nrows()
    }

    pub fn center(&self) -> &DVector<f64> {
        &self.center
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.a
    }

    pub fn volume(&self) -> f64 {
        self.vol
    }

    /// Principal semi-axis lengths, in the order of the columns of axes().
    pub fn axis_lengths(&self) -> &DVector<f64> {
        &self.axlens
    }

    /// Principal axes as columns, each scaled to its semi-axis length.
    pub fn axes(&self) -> &DMatrix<f64> {
        &self.axes
    }

    /// Uniformly rescales the ellipsoid about its center so that its volume equals vol.
    /// Axis directions are kept; lengths are multiplied by (vol / current)^(1/n).
    pub fn scale_to_volume(&mut self, vol : f64) {
        assert!(vol > 0.0 && vol.is_finite());
        let f = (vol / self.vol).powf(1. / self.dim() as f64);
        self.a.unscale_mut(f.powi(2));
        self.axlens.scale_mut(f);
        self.axes.scale_mut(f);
        self.vol = vol;
    }

    /// The two ends of the longest principal axis.
    pub fn major_axis_endpoints(&self) -> (DVector<f64>, DVector<f64>) {
        let imax = self.axlens.imax();
        let v = self.axes.column(imax);
        (&self.center - &v, &self.center + &v)
    }

    /// Value of the quadratic form (x - c)^T A (x - c): below one inside, one at the boundary.
    pub fn quadratic_form(&self, x : &DVector<f64>) -> f64 {
        assert!(x.nrows() == self.dim());
        let d = x - &self.center;
        (&self.a * &d).dot(&d)
    }

    pub fn contains(&self, x : &DVector<f64>) -> bool {
        self.quadratic_form(x) <= 1.0
    }

    /// Maps x to the coordinates in which this ellipsoid is the unit ball centered at the
    /// origin. Euclidian distances between whitened points are Mahalanobis distances under A.
    pub fn whiten(&self, x : &DVector<f64>) -> DVector<f64> {
        let d = x - &self.center;
        let mut y = self.axes.tr_mul(&d);
        y.component_div_assign(&self.axlens.map(|l| l.powi(2) ));
        y
    }

    /// Draws a point uniformly from the ellipsoid interior.
    pub fn sample<R>(&self, rng : &mut R) -> DVector<f64>
    where
        R : Rng + ?Sized
    {
        &self.center + &self.axes * randsphere(self.dim(), rng)
    }

    pub fn samples<R>(&self, k : usize, rng : &mut R) -> Vec<DVector<f64>>
    where
        R : Rng + ?Sized
    {
        (0..k).map(|_| self.sample(&mut *rng) ).collect()
    }

}

impl Display for Ellipsoid {

    fn fmt(&self, f : &mut fmt::Formatter<'_>) -> fmt::Result {
        let ctr = self.center.iter()
            .map(|c| format!("{:?}", c) )
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "Ellipsoid(ctr=[{}])", ctr)
    }

}

/// Inverts the covariance through its eigendecomposition. Degenerate directions (which
/// appear when there are no more points than dimensions, or when points are linearly
/// dependent) get a common eigenvalue chosen so that the product of all eigenvalues
/// equals targetprod; without a target they are clamped to the floor.
fn floored_inverse(cov : DMatrix<f64>, targetprod : f64) -> DMatrix<f64> {
    let eig = SymmetricEigen::new(cov);
    let mut w = eig.eigenvalues;
    let floor = EIGVAL_FLOOR.max(w.max() * EIGVAL_FLOOR);
    let ndegenerate = w.iter().filter(|wi| **wi < floor ).count();
    if ndegenerate > 0 {
        let nzprod = w.iter().filter(|wi| **wi >= floor ).product::<f64>();
        let mut fill = (targetprod / nzprod).powf(1. / ndegenerate as f64);
        if !(fill > 0.0) || !fill.is_finite() {
            fill = floor;
        }
        w.iter_mut().filter(|wi| **wi < floor ).for_each(|wi| *wi = fill );
    }
    let v = eig.eigenvectors;
    let w_inv = DMatrix::from_diagonal(&w.map(|wi| 1. / wi ));
    &v * w_inv * v.transpose()
}

/// Returns an ellipsoid containing every informed point. The ellipsoid shape is the
/// maximum-likelihood covariance of the points, enlarged by n + 2 (the covariance of a
/// uniform n-ball of radius r is r^2 / (n + 2)), then expanded until the outermost point
/// sits on its boundary. pointvol is the prior volume each point is presumed to represent:
/// the result never has less than npoints * pointvol, so regions that are under-sampled
/// are not excluded just because few points landed there.
pub fn bounding_ellipsoid(points : &[DVector<f64>], pointvol : f64) -> Result<Ellipsoid, EllipsoidError> {
    let first = points.first().ok_or(EllipsoidError::EmptyPointSet)?;
    let ndim = first.nrows();
    let npoints = points.len();
    if let Some(p) = points.iter().find(|p| p.nrows() != ndim ) {
        return Err(EllipsoidError::ShapeMismatch { expected : ndim, found : p.nrows() });
    }

    if npoints == 1 {
        if !(pointvol > 0.0) {
            return Err(EllipsoidError::DegeneratePointSet { npoints });
        }
        let radius = (pointvol / vol_prefactor(ndim)).powf(1. / ndim as f64);
        return Ellipsoid::sphere(first.clone(), radius);
    }

    let (center, mut cov) = running::mean_covariance(points, false);
    cov.scale_mut((ndim + 2) as f64);

    let targetprod = (npoints as f64 * pointvol.max(0.0) / vol_prefactor(ndim)).powi(2);
    let mut a = floored_inverse(cov, targetprod);

    // Scale so the outermost point obeys x^T A x < 1 - (a bit), so every point is
    // strictly inside despite round-off in later containment checks.
    let fmax = points.iter()
        .map(|p| {
            let d = p - &center;
            (&a * &d).dot(&d)
        })
        .fold(0.0, f64::max);
    let one_minus_a_bit = 1. - SQRT_EPS;
    if fmax > one_minus_a_bit {
        a.scale_mut(one_minus_a_bit / fmax);
    }

    let mut ell = Ellipsoid::new(center, a)?;
    if pointvol > 0.0 {
        let minvol = npoints as f64 * pointvol;
        if ell.volume() < minvol {
            ell.scale_to_volume(minvol);
        }
    }
    Ok(ell)
}
