use nalgebra::*;
use rand::Rng;
use std::f64::consts::LN_2;
use thiserror::Error;

/// Square root of the f64 machine epsilon. Used as the tolerance when checking that
/// probability vectors are normalized, and as the round-off headroom of bounding ellipsoids.
pub const SQRT_EPS : f64 = 1.4901161193847656e-8;

/// Stand-in for ln(0) in evidence accumulation. Unlike -inf, multiplying it by zero
/// yields zero, which keeps the information recursion finite.
pub const LOG_ZERO : f64 = -1.0e300;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChoiceError {

    #[error("Probabilities sum to {sum} instead of one")]
    NotNormalized { sum : f64 },

    #[error("Cannot choose from an empty probability vector")]
    Empty

}

/// Returns ln(exp(a) + exp(b)) without leaving log-space.
pub fn logaddexp(a : f64, b : f64) -> f64 {
    if a == b {
        // Also covers a = b = -inf, where a - b would be NaN.
        return a + LN_2;
    }
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

/// Returns ln(sum(exp(x))) over the iterator, or -inf for an empty iterator.
pub fn log_sum_exp(x : impl Iterator<Item=f64> + Clone) -> f64 {
    let max = x.clone().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + x.map(|xi| (xi - max).exp() ).sum::<f64>().ln()
}

fn check_normalized(p : &[f64]) -> Result<(), ChoiceError> {
    if p.is_empty() {
        return Err(ChoiceError::Empty);
    }
    let sum = p.iter().sum::<f64>();
    if (sum - 1.).abs() > SQRT_EPS {
        return Err(ChoiceError::NotNormalized { sum });
    }
    Ok(())
}

/// Draws an index with probability p[i]. The probabilities must sum to one
/// within SQRT_EPS; anything else is a caller error and is never renormalized here.
pub fn random_choice<R>(p : &[f64], rng : &mut R) -> Result<usize, ChoiceError>
where
    R : Rng + ?Sized
{
    check_normalized(p)?;
    let r : f64 = rng.gen();
    let mut ix = 0;
    let mut cum = p[0];
    while cum < r && ix + 1 < p.len() {
        ix += 1;
        cum += p[ix];
    }
    Ok(ix)
}

/// Resamples a weighted sample into an equally-weighted one of the same size, using
/// systematic resampling: a single uniform offset u gives the positions (u + i) / N,
/// and each position picks the item whose cumulative weight interval contains it.
/// Every item i then appears either floor(w[i] N) or ceil(w[i] N) times.
pub fn resample_equal<T, R>(samples : &[T], weights : &[f64], rng : &mut R) -> Result<Vec<T>, ChoiceError>
where
    T : Clone,
    R : Rng + ?Sized
{
    assert!(samples.len() == weights.len());
    check_normalized(weights)?;
    let n = weights.len();
    let offset : f64 = rng.gen();
    let mut cumulative = running::cumulative_sum(weights.iter().cloned()).collect::<Vec<_>>();

    // Positions never reach one, so the last interval must end exactly there.
    cumulative[n-1] = 1.0;

    let mut resampled = Vec::with_capacity(n);
    let mut j = 0;
    for i in 0..n {
        let pos = (offset + i as f64) / n as f64;
        while pos >= cumulative[j] && j + 1 < n {
            j += 1;
        }
        resampled.push(samples[j].clone());
    }
    Ok(resampled)
}

/// Weighted mean and covariance of a set of vectors. The covariance uses the
/// unbiased estimator for reliability weights, sum(w) / (sum(w)^2 - sum(w^2)),
/// which reduces to the usual 1 / (N - 1) normalization when all weights are equal.
pub fn mean_and_cov(x : &[DVector<f64>], w : &[f64]) -> Result<(DVector<f64>, DMatrix<f64>), ChoiceError> {
    assert!(x.len() == w.len());
    let dim = x.first().ok_or(ChoiceError::Empty)?.nrows();
    let wsum = w.iter().sum::<f64>();
    let w2sum = w.iter().map(|wi| wi.powf(2.) ).sum::<f64>();

    let mut mean = DVector::zeros(dim);
    for (xi, wi) in x.iter().zip(w.iter()) {
        mean.axpy(*wi, xi, 1.0);
    }
    mean.unscale_mut(wsum);

    let mut cov = DMatrix::zeros(dim, dim);
    for (xi, wi) in x.iter().zip(w.iter()) {
        let dx = xi - &mean;
        cov.ger(*wi, &dx, &dx, 1.0);
    }
    cov.scale_mut(wsum / (wsum.powf(2.) - w2sum));
    Ok((mean, cov))
}

/// Single-pass multivariate statistical calculations.
pub mod running {

    use super::*;
    use std::ops::AddAssign;

    pub fn cumulative_sum<T>(iter : impl Iterator<Item=T>) -> impl Iterator<Item=T>
    where
        T : AddAssign + Default + Copy
    {
        iter.scan(
            T::default(),
            |state : &mut T, it : T| {
                *state += it;
                Some(*state)
            }
        )
    }

    pub fn mean(x : &[DVector<f64>]) -> DVector<f64> {
        assert!(!x.is_empty());
        let mut sum = DVector::zeros(x[0].nrows());
        for xi in x {
            sum += xi;
        }
        sum.unscale(x.len() as f64)
    }

    /// Mean and covariance of an unweighted point cloud. With unbiased=false, this is
    /// the maximum-likelihood covariance (normalized by N), which stays defined for a
    /// single observation.
    pub fn mean_covariance(x : &[DVector<f64>], unbiased : bool) -> (DVector<f64>, DMatrix<f64>) {
        let mean = mean(x);
        let dim = mean.nrows();
        let mut cov = DMatrix::zeros(dim, dim);
        for xi in x {
            let dx = xi - &mean;
            cov.ger(1.0, &dx, &dx, 1.0);
        }
        let n = x.len() as f64;
        cov.unscale_mut(if unbiased { n - 1. } else { n });
        (mean, cov)
    }

}

#[cfg(test)]
mod tests {

    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn logaddexp_matches_direct_sum() {
        for (a, b) in [(0.0, 0.0), (-1.5, 2.0), (-700., -701.), (3.0, -1.0e300)].iter() {
            let direct = (a.exp() + b.exp()).ln();
            if direct.is_finite() {
                assert!((logaddexp(*a, *b) - direct).abs() < 1e-12);
            }
        }
        assert_eq!(logaddexp(LOG_ZERO, -2.0), -2.0);
        assert_eq!(logaddexp(f64::NEG_INFINITY, f64::NEG_INFINITY), f64::NEG_INFINITY);
        let lse = log_sum_exp([0.0f64, 0.0, 0.0].iter().cloned());
        assert!((lse - 3f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn random_choice_rejects_unnormalized() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut p : Vec<f64> = (0..10).map(|_| rng.gen::<f64>() ).collect();
        let sum = p.iter().sum::<f64>();
        p.iter_mut().for_each(|pi| *pi *= 1.001 / sum );
        match random_choice(&p, &mut rng) {
            Err(ChoiceError::NotNormalized { sum }) => assert!((sum - 1.001).abs() < 1e-9),
            other => panic!("Expected normalization error, got {:?}", other)
        }
        assert_eq!(random_choice(&[], &mut rng), Err(ChoiceError::Empty));
    }

    #[test]
    fn random_choice_frequencies() {
        let mut rng = StdRng::seed_from_u64(1);
        let p = [0.1, 0.0, 0.6, 0.3];
        let mut counts = [0usize; 4];
        let n = 20_000;
        for _ in 0..n {
            counts[random_choice(&p, &mut rng).unwrap()] += 1;
        }
        assert_eq!(counts[1], 0);
        for (c, pi) in counts.iter().zip(p.iter()) {
            let expect = pi * n as f64;
            let sigma = (pi * (1. - pi) * n as f64).sqrt();
            assert!((*c as f64 - expect).abs() <= 6. * sigma + 1e-9);
        }
    }

    #[test]
    fn resample_equal_multiplicities() {
        let n = 1000;
        let mut rng = StdRng::seed_from_u64(2);
        let x : Vec<usize> = (0..n).collect();
        let mut w : Vec<f64> = (0..n).map(|_| rng.gen::<f64>() ).collect();
        let wsum = w.iter().sum::<f64>();
        w.iter_mut().for_each(|wi| *wi /= wsum );
        let resampled = resample_equal(&x, &w, &mut rng).unwrap();
        assert_eq!(resampled.len(), n);
        for i in 0..n {
            let count = resampled.iter().filter(|r| **r == i ).count();
            let expect = w[i] * n as f64;
            assert!(expect.floor() as usize <= count && count <= expect.ceil() as usize);
        }
    }

    #[test]
    fn weighted_cov_reduces_to_sample_cov() {
        let mut rng = StdRng::seed_from_u64(3);
        let x : Vec<DVector<f64>> = (0..10)
            .map(|_| DVector::from_iterator(3, (0..3).map(|_| rng.gen::<f64>() )))
            .collect();
        let w = vec![0.2; 10];
        let (mean, cov) = mean_and_cov(&x, &w).unwrap();
        let (ref_mean, ref_cov) = running::mean_covariance(&x, true);
        assert!((mean - ref_mean).norm() < 1e-12);
        assert!((cov - ref_cov).norm() < 1e-12);

        // Unequal weights, element-wise against the explicit formula.
        let w : Vec<f64> = (0..10).map(|_| rng.gen::<f64>() ).collect();
        let (mean, cov) = mean_and_cov(&x, &w).unwrap();
        let wsum = w.iter().sum::<f64>();
        let prefactor = wsum / (wsum.powf(2.) - w.iter().map(|wi| wi * wi ).sum::<f64>());
        let c01 = prefactor * x.iter().zip(w.iter())
            .map(|(xi, wi)| wi * (xi[0] - mean[0]) * (xi[1] - mean[1]) )
            .sum::<f64>();
        assert!((cov[(0, 1)] - c01).abs() < 1e-12);
    }

    #[test]
    fn ml_covariance_of_single_point_is_zero() {
        let x = vec![DVector::from_vec(vec![1.0, 2.0])];
        let (mean, cov) = running::mean_covariance(&x, false);
        assert_eq!(mean, x[0]);
        assert_eq!(cov, DMatrix::zeros(2, 2));
    }

}
