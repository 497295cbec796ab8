use super::*;
use nalgebra::{DVector, DVectorSlice};
use std::borrow::Borrow;
use crate::fit::Estimator;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct KMeansSettings {

    pub max_iter : usize,

    /// Starting cluster centers, one per cluster. Observations are first allocated
    /// to the closest of them.
    pub centers : Vec<DVector<f64>>

}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum KMeansError {

    #[error("Cannot build {n_cluster} clusters from {n} observations")]
    TooFewObservations { n : usize, n_cluster : usize },

    #[error("Observations have inconsistent dimensions")]
    ShapeMismatch,

    #[error("Cluster {0} lost all of its observations")]
    EmptyCluster(usize)

}

/// K-means is a special case of the EM algorithm for GMMs where
/// the probabilities of class allocation are assumed constant and equal;
/// and the covariances within clusters are assumed constant and equal as well.
/// Starting centers are supplied by the caller, so the same sample and centers
/// always yield the same clusters.
#[derive(Debug)]
pub struct KMeans {
    allocations : Vec<usize>,
    n_iter : usize
}

impl KMeans {

    /// Return cluster of each observation, in the order they were supplied
    pub fn allocations(&self) -> &[usize] {
        &self.allocations[..]
    }

    pub fn iterations(&self) -> usize {
        self.n_iter
    }

    pub fn count_allocations(&self, cluster_ix : usize) -> usize {
        self.allocations().iter().filter(|alloc| **alloc == cluster_ix ).count()
    }

}

fn euclidian(a : &[f64], b : &[f64]) -> f64 {
    Euclidian::metric(a, b)
}

fn update_means(
    means : &mut [DVector<f64>],
    sample : impl Iterator<Item=impl Borrow<[f64]>> + Clone,
    allocations : &[usize]
) -> Result<(), KMeansError> {
    let mut counts = vec![0usize; means.len()];
    for m in means.iter_mut() {
        m.fill(0.0);
    }

    // Accumulate each observation into sum and count
    for (obs, alloc) in sample.zip(allocations.iter()) {
        means[*alloc] += DVectorSlice::from(obs.borrow());
        counts[*alloc] += 1;
    }

    // Calculate averages from sum and accumulated count
    for (c, (m, count)) in means.iter_mut().zip(counts.iter()).enumerate() {
        if *count == 0 {
            return Err(KMeansError::EmptyCluster(c));
        }
        m.unscale_mut(*count as f64);
    }
    Ok(())
}

fn closest<'a>(candidates : impl Iterator<Item=&'a [f64]>, el : &[f64]) -> usize {
    let mut min_dist = f64::INFINITY;
    let mut min_ix = 0;
    for (cand_ix, cand) in candidates.enumerate() {
        let dist_to_cand = euclidian(el, cand);
        if dist_to_cand < min_dist {
            min_ix = cand_ix;
            min_dist = dist_to_cand;
        }
    }
    min_ix
}

/// Update allocation vector, returning how many observations were re-allocated.
fn update_allocations(
    allocations : &mut [usize],
    means : &[DVector<f64>],
    sample : impl Iterator<Item=impl Borrow<[f64]>> + Clone
) -> usize {
    let mut n_reallocated = 0;
    for (alloc, obs) in allocations.iter_mut().zip(sample) {
        let best_alloc = closest(means.iter().map(|v| v.as_slice() ), obs.borrow());
        if *alloc != best_alloc {
            *alloc = best_alloc;
            n_reallocated += 1;
        }
    }
    n_reallocated
}

impl Estimator for KMeans {

    type Settings = KMeansSettings;

    type Error = KMeansError;

    fn estimate(
        sample : impl Iterator<Item=impl Borrow<[f64]>> + Clone,
        settings : Self::Settings
    ) -> Result<Self, Self::Error> {

        let n = sample.clone().count();
        let n_cluster = settings.centers.len();
        if n < n_cluster || n_cluster == 0 {
            return Err(KMeansError::TooFewObservations { n, n_cluster });
        }
        let obs_dim = settings.centers[0].nrows();
        if sample.clone().any(|obs| obs.borrow().len() != obs_dim ) || settings.centers.iter().any(|c| c.nrows() != obs_dim ) {
            return Err(KMeansError::ShapeMismatch);
        }

        let mut means = settings.centers;
        let mut allocations = vec![0; n];
        update_allocations(&mut allocations[..], &means[..], sample.clone());

        let mut n_iter = 0;
        for _ in 0..settings.max_iter.max(1) {
            n_iter += 1;
            update_means(&mut means[..], sample.clone(), &allocations[..])?;
            let n_reallocated = update_allocations(&mut allocations[..], &means[..], sample.clone());
            if n_reallocated == 0 {
                break;
            }
        }

        // The last reallocation might have emptied a cluster.
        for c in 0..n_cluster {
            if !allocations.iter().any(|a| *a == c ) {
                return Err(KMeansError::EmptyCluster(c));
            }
        }

        Ok(Self {
            allocations,
            n_iter
        })
    }

}

#[cfg(test)]
mod tests {

    use super::*;

    fn centers(a : [f64; 2], b : [f64; 2]) -> Vec<DVector<f64>> {
        vec![DVector::from_column_slice(&a), DVector::from_column_slice(&b)]
    }

    #[test]
    fn separates_two_blobs() {
        let mut data = Vec::new();
        for i in 0..20 {
            let t = i as f64 * 0.01;
            data.push([t, -t]);
            data.push([10.0 + t, 10.0 - t]);
        }

        // Both centers start near the first blob; the second one is dragged away.
        let km = KMeans::estimate(
            data.iter().map(|d| &d[..] ),
            KMeansSettings { max_iter : 10, centers : centers([0.0, 0.0], [4.0, 4.0]) }
        ).unwrap();
        assert_eq!(km.count_allocations(0), 20);
        assert_eq!(km.count_allocations(1), 20);
        for (ix, alloc) in km.allocations().iter().enumerate() {
            assert_eq!(*alloc, ix % 2);
        }
        assert!(km.iterations() <= 10);
    }

    #[test]
    fn is_deterministic() {
        let data : Vec<[f64; 2]> = (0..50)
            .map(|i| [(i as f64 * 0.37).sin(), (i as f64 * 0.11).cos()] )
            .collect();
        let settings = KMeansSettings { max_iter : 10, centers : centers([-1.0, 0.0], [1.0, 0.0]) };
        let a = KMeans::estimate(data.iter().map(|d| &d[..] ), settings.clone()).unwrap();
        let b = KMeans::estimate(data.iter().map(|d| &d[..] ), settings).unwrap();
        assert_eq!(a.allocations(), b.allocations());
    }

    #[test]
    fn rejects_degenerate_input() {
        let data = [[1.0, 1.0]];
        let res = KMeans::estimate(
            data.iter().map(|d| &d[..] ),
            KMeansSettings { max_iter : 10, centers : centers([0.0, 0.0], [2.0, 2.0]) }
        );
        assert_eq!(res.unwrap_err(), KMeansError::TooFewObservations { n : 1, n_cluster : 2 });

        let data = [[1.0, 1.0, 1.0], [2.0, 2.0, 2.0]];
        let res = KMeans::estimate(
            data.iter().map(|d| &d[..] ),
            KMeansSettings { max_iter : 10, centers : centers([0.0, 0.0], [2.0, 2.0]) }
        );
        assert_eq!(res.unwrap_err(), KMeansError::ShapeMismatch);

        // Identical observations collapse into one cluster.
        let data = [[1.0, 1.0], [1.0, 1.0], [1.0, 1.0]];
        let res = KMeans::estimate(
            data.iter().map(|d| &d[..] ),
            KMeansSettings { max_iter : 10, centers : centers([0.0, 0.0], [2.0, 2.0]) }
        );
        assert!(matches!(res, Err(KMeansError::EmptyCluster(_))));
    }

}
