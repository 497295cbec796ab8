use nalgebra::*;
use rand::Rng;
use serde::{Serialize, Deserialize};
use super::{Ellipsoid, EllipsoidError, bounding_ellipsoid};
use crate::calc::{self, ChoiceError};

#[cfg(feature = "clustering")]
use crate::fit::{Estimator, cluster::{KMeans, KMeansSettings}};

/// Ordered union of ellipsoids, each tagged with the fraction of the fitted points
/// that were assigned to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiEllipsoid {

    ells : Vec<Ellipsoid>,

    fractions : Vec<f64>

}

impl MultiEllipsoid {

    pub fn new(ells : Vec<Ellipsoid>, fractions : Vec<f64>) -> Self {
        assert!(!ells.is_empty());
        assert!(ells.len() == fractions.len());
        Self { ells, fractions }
    }

    pub fn single(ell : Ellipsoid) -> Self {
        Self::new(vec![ell], vec![1.0])
    }

    pub fn len(&self) -> usize {
        self.ells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ells.is_empty()
    }

    pub fn ellipsoids(&self) -> &[Ellipsoid] {
        &self.ells[..]
    }

    pub fn fractions(&self) -> &[f64] {
        &self.fractions[..]
    }

    /// Sum of member volumes. Overlapping regions are counted once per member,
    /// so this is an upper bound on the volume of the union.
    pub fn volume(&self) -> f64 {
        self.ells.iter().map(|e| e.volume() ).sum()
    }

    /// Multiplies the volume of every member by factor.
    pub fn enlarge(&mut self, factor : f64) {
        for ell in self.ells.iter_mut() {
            let vol = ell.volume();
            ell.scale_to_volume(vol * factor);
        }
    }

    pub fn contains(&self, x : &DVector<f64>) -> bool {
        self.ells.iter().any(|e| e.contains(x) )
    }

    /// Number of members containing x.
    pub fn overlap(&self, x : &DVector<f64>) -> usize {
        self.ells.iter().filter(|e| e.contains(x) ).count()
    }

    /// Picks a member with probability proportional to its volume and draws a point
    /// inside it. Returns the point and how many members contain it (at least one).
    /// Points in a region covered by q members are proposed q times too often, so
    /// callers must accept them with probability 1/q; see sample().
    pub fn propose<R>(&self, rng : &mut R) -> Result<(DVector<f64>, usize), ChoiceError>
    where
        R : Rng + ?Sized
    {
        let vol_tot = self.volume();
        let probs = self.ells.iter().map(|e| e.volume() / vol_tot ).collect::<Vec<_>>();
        let ix = calc::random_choice(&probs, rng)?;
        let x = self.ells[ix].sample(rng);
        let q = self.overlap(&x).max(1);
        Ok((x, q))
    }

    /// Draws a point uniformly from the union of the members.
    pub fn sample<R>(&self, rng : &mut R) -> Result<DVector<f64>, ChoiceError>
    where
        R : Rng + ?Sized
    {
        loop {
            let (x, q) = self.propose(rng)?;
            if q == 1 || rng.gen::<f64>() < 1. / q as f64 {
                return Ok(x);
            }
        }
    }

}

/// A subset of the fitted points (by index) and its bounding ellipsoid.
#[derive(Debug, Clone)]
struct Node {
    members : Vec<usize>,
    ell : Ellipsoid
}

/// A node whose ellipsoid exceeds the volume its points are expected to occupy by
/// more than this factor is explored below a failed split.
const LOOKAHEAD_CROWDING : f64 = 2.0;

/// Explored descendants replace their ancestor only when their total volume is below
/// this fraction of the ancestor's volume.
const LOOKAHEAD_SHRINK : f64 = 0.5;

/// Partitions a point cloud into ellipsoids whose union is smaller than the single
/// bounding ellipsoid, when the cloud is clustered (e.g. a multimodal likelihood).
/// Each candidate split is a 2-means clustering performed in the coordinates where
/// the parent ellipsoid is a unit ball, started from the two ends of its major axis.
/// Both halves must keep at least ndim + 1 points. A split whose halves reduce the
/// volume by more than the relative tolerance is accepted and its halves are refined
/// in turn. A split that saves nothing is still explored when the parent is much
/// larger than npoints * pointvol: a regular grid of modes has no single cut that
/// helps, but cutting further isolates the modes. The explored leaves then replace
/// the parent only if they at least halve its volume.
///
/// Without the "clustering" feature, decompose() always returns the single
/// bounding ellipsoid (see crate::HAVE_CLUSTERING).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decomposer {

    /// Minimum relative volume reduction for a split to be accepted.
    pub tolerance : f64,

    /// Iteration cap of the 2-means clustering.
    pub max_iter : usize

}

impl Default for Decomposer {

    fn default() -> Self {
        Self { tolerance : 1e-3, max_iter : 10 }
    }

}

impl Decomposer {

    pub fn new(tolerance : f64, max_iter : usize) -> Self {
        Self { tolerance, max_iter }
    }

    /// Bounds the points by a union of ellipsoids, each fitted with bounding_ellipsoid
    /// and the same pointvol (so a member bounding k points has at least k * pointvol).
    /// The total volume never exceeds the one of the single bounding ellipsoid.
    pub fn decompose(&self, points : &[DVector<f64>], pointvol : f64) -> Result<MultiEllipsoid, EllipsoidError> {
        let ell = bounding_ellipsoid(points, pointvol)?;
        let npoints = points.len();
        let leaves = self.refine(points, Node { members : (0..npoints).collect(), ell }, pointvol)?;

        tracing::trace!("Decomposed {} points into {} ellipsoid(s)", npoints, leaves.len());
        let fractions = leaves.iter()
            .map(|n| n.members.len() as f64 / npoints as f64 )
            .collect();
        Ok(MultiEllipsoid::new(leaves.into_iter().map(|n| n.ell ).collect(), fractions))
    }

    /// Leaves covering the members of node, with a total volume never above the
    /// volume of node. Recursion depth is bounded by the member count, since each
    /// split removes at least ndim + 1 members from either side.
    fn refine(&self, points : &[DVector<f64>], node : Node, pointvol : f64) -> Result<Vec<Node>, EllipsoidError> {
        let (left, right) = match self.split(points, &node, pointvol)? {
            Some(halves) => halves,
            None => return Ok(vec![node])
        };
        let parent_vol = node.ell.volume();
        let saves = left.ell.volume() + right.ell.volume() < (1. - self.tolerance) * parent_vol;
        let crowded = parent_vol > LOOKAHEAD_CROWDING * node.members.len() as f64 * pointvol;
        if !saves && !crowded {
            return Ok(vec![node]);
        }

        let mut leaves = self.refine(points, left, pointvol)?;
        leaves.extend(self.refine(points, right, pointvol)?);
        if saves {
            return Ok(leaves);
        }
        let total = leaves.iter().map(|n| n.ell.volume() ).sum::<f64>();
        if total < LOOKAHEAD_SHRINK * parent_vol {
            tracing::trace!("Look-ahead split {} points into {} ellipsoid(s)", node.members.len(), leaves.len());
            Ok(leaves)
        } else {
            Ok(vec![node])
        }
    }

    /// Splits node in two by 2-means, or returns None when the clustering fails or
    /// leaves either side with fewer than ndim + 1 points. Halves are not compared
    /// with the parent here.
    #[cfg(feature = "clustering")]
    fn split(
        &self,
        points : &[DVector<f64>],
        node : &Node,
        pointvol : f64
    ) -> Result<Option<(Node, Node)>, EllipsoidError> {
        let ndim = node.ell.dim();
        let min_members = ndim + 1;
        if node.members.len() < 2 * min_members {
            return Ok(None);
        }

        let whitened = node.members.iter()
            .map(|ix| node.ell.whiten(&points[*ix]) )
            .collect::<Vec<_>>();
        let (start, end) = node.ell.major_axis_endpoints();
        let settings = KMeansSettings {
            max_iter : self.max_iter,
            centers : vec![node.ell.whiten(&start), node.ell.whiten(&end)]
        };
        let km = match KMeans::estimate(whitened.iter().map(|w| w.as_slice() ), settings) {
            Ok(km) => km,
            Err(e) => {
                tracing::trace!("Split rejected: {}", e);
                return Ok(None);
            }
        };
        if km.count_allocations(0) < min_members || km.count_allocations(1) < min_members {
            return Ok(None);
        }

        let mut halves = (Vec::new(), Vec::new());
        for (ix, alloc) in node.members.iter().zip(km.allocations().iter()) {
            if *alloc == 0 {
                halves.0.push(*ix);
            } else {
                halves.1.push(*ix);
            }
        }

        let fit = |members : &[usize]| -> Result<Ellipsoid, EllipsoidError> {
            let pts = members.iter().map(|ix| points[*ix].clone() ).collect::<Vec<_>>();
            bounding_ellipsoid(&pts, pointvol)
        };
        let left = Node { ell : fit(&halves.0)?, members : halves.0 };
        let right = Node { ell : fit(&halves.1)?, members : halves.1 };
        tracing::trace!(
            "2-means split {} points into {} + {} after {} iteration(s)",
            node.members.len(),
            left.members.len(),
            right.members.len(),
            km.iterations()
        );
        Ok(Some((left, right)))
    }

    #[cfg(not(feature = "clustering"))]
    fn split(
        &self,
        _points : &[DVector<f64>],
        _node : &Node,
        _pointvol : f64
    ) -> Result<Option<(Node, Node)>, EllipsoidError> {
        Ok(None)
    }

}
