use nalgebra::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Serialize, Deserialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use crate::bound::EllipsoidError;
use crate::calc::{self, ChoiceError, LOG_ZERO, SQRT_EPS};

/// Arena of live and dead points.
pub mod live;

/// Likelihood evaluation backends.
pub mod pool;

/// Proposal generation under the likelihood constraint.
pub mod sampler;

/// Evidence, posterior samples and their summaries.
pub mod result;

/// Per-iteration progress records and a terminal spinner.
pub mod progress;

use live::LivePointSet;
use pool::{Pool, SerialPool};
use sampler::{Sampler, Problem};
use result::NestedResult;
use progress::ProgressRecord;

/// How new live points are proposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {

    /// Uniform draws over the whole unit cube.
    Classic,

    /// Uniform draws from a single ellipsoid bounding the live points.
    Single,

    /// Uniform draws from a union of ellipsoids bounding clusters of live points.
    Multi

}

impl fmt::Display for Method {

    fn fmt(&self, f : &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Classic => write!(f, "classic"),
            Method::Single => write!(f, "single"),
            Method::Multi => write!(f, "multi")
        }
    }

}

impl FromStr for Method {

    type Err = NestedError;

    fn from_str(s : &str) -> Result<Self, NestedError> {
        match s {
            "classic" => Ok(Method::Classic),
            "single" => Ok(Method::Single),
            "multi" => Ok(Method::Multi),
            other => Err(NestedError::InvalidSettings(format!("Unknown method '{}'", other)))
        }
    }

}

#[derive(Debug, Error)]
pub enum NestedError {

    #[error(transparent)]
    Ellipsoid(#[from] EllipsoidError),

    #[error(transparent)]
    Choice(#[from] ChoiceError),

    #[error("Multi-ellipsoid sampling requires the clustering feature")]
    ClusteringUnavailable,

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Prior transform returned {found} coordinates (expected {expected})")]
    PriorDimension { expected : usize, found : usize },

    #[error("Log-likelihood evaluated to {logl} at {point:?}")]
    NonFiniteLikelihood { logl : f64, point : Vec<f64> },

    #[error("Sampling stalled after {ncall} likelihood calls: {reason}")]
    SamplingStall { ncall : usize, reason : &'static str },

    #[error("Information is negative ({h})")]
    NegativeInformation { h : f64 },

    #[error("Invalid configuration")]
    Config(#[from] serde_json::Error)

}

/// Default hard limit on likelihood calls. A run whose likelihood constraint cannot
/// be satisfied aborts with NestedError::SamplingStall after this many calls.
pub const DEFAULT_CALL_CEILING : usize = 100_000_000;

/// Nested sampling settings. Every field has a default, so partial JSON documents
/// are accepted by Settings::from_json.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {

    pub method : Method,

    /// Number of live points.
    pub npoints : usize,

    /// Dimension of the unit cube the prior transform accepts, when different from
    /// the dimension of the parameter space (e.g. nuisance coordinates that the
    /// transform folds into fewer parameters).
    pub npdim : Option<usize>,

    /// The bound is refitted once this many likelihood calls were spent since the
    /// last refit (checked once per iteration).
    pub update_interval : usize,

    /// Volume factor applied to each ellipsoid after fitting.
    pub enlarge : f64,

    /// How many proposals are sent to the pool at once.
    pub queue_depth : usize,

    /// Stop when the estimated remaining evidence changes logz by less than this.
    /// Defaults to 0.5 when decline_factor is not set either.
    pub dlogz : Option<f64>,

    /// Stop once the sample weight has declined for more than
    /// decline_factor * npoints consecutive iterations.
    pub decline_factor : Option<f64>,

    pub maxiter : Option<usize>,

    /// Stop once this many likelihood calls were spent (checked once per iteration).
    pub maxcall : Option<usize>,

    /// Abort with an error when more likelihood calls than this would be needed.
    /// Defaults to DEFAULT_CALL_CEILING; None (null in JSON) removes the limit.
    pub call_ceiling : Option<usize>,

    pub seed : u64,

    /// Minimum relative volume reduction for an ellipsoid split.
    pub split_tolerance : f64,

    /// Iteration cap of the 2-means clustering behind ellipsoid splits.
    pub kmeans_iter : usize

}

impl Default for Settings {

    fn default() -> Self {
        Self {
            method : Method::Single,
            npoints : 100,
            npdim : None,
            update_interval : 1,
            enlarge : 1.2,
            queue_depth : 1,
            dlogz : None,
            decline_factor : None,
            maxiter : None,
            maxcall : None,
            call_ceiling : Some(DEFAULT_CALL_CEILING),
            seed : 0,
            split_tolerance : 1e-3,
            kmeans_iter : 10
        }
    }

}

impl Settings {

    pub fn from_json(s : &str) -> Result<Self, NestedError> {
        Ok(serde_json::from_str(s)?)
    }

    /// dlogz actually used by the termination check, if any.
    pub fn effective_dlogz(&self) -> Option<f64> {
        match (self.dlogz, self.decline_factor) {
            (None, None) => Some(0.5),
            (dlogz, _) => dlogz
        }
    }

    pub fn validate(&self) -> Result<(), NestedError> {
        let invalid = |msg : &str| Err(NestedError::InvalidSettings(msg.to_string()));
        if self.npoints == 0 {
            return invalid("npoints must be positive");
        }
        if self.npdim == Some(0) {
            return invalid("npdim must be positive");
        }
        if self.update_interval == 0 {
            return invalid("update_interval must be positive");
        }
        if self.queue_depth == 0 {
            return invalid("queue_depth must be positive");
        }
        if !(self.enlarge >= 1.0) || !self.enlarge.is_finite() {
            return invalid("enlarge must be a finite factor of at least one");
        }
        if let Some(d) = self.dlogz {
            if !(d > 0.0) {
                return invalid("dlogz must be positive");
            }
        }
        if let Some(d) = self.decline_factor {
            if !(d > 0.0) {
                return invalid("decline_factor must be positive");
            }
        }
        if !(self.split_tolerance >= 0.0 && self.split_tolerance < 1.0) {
            return invalid("split_tolerance must lie in [0, 1)");
        }
        if self.kmeans_iter == 0 {
            return invalid("kmeans_iter must be positive");
        }
        if self.method == Method::Multi && !crate::HAVE_CLUSTERING {
            return Err(NestedError::ClusteringUnavailable);
        }
        Ok(())
    }

}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    Sampling,
    Terminating,
    Done
}

fn enter(phase : &mut Phase, next : Phase) {
    tracing::info!("Nested sampling: {:?} -> {:?}", phase, next);
    *phase = next;
}

/// Adds a point of log-weight logwt and log-likelihood logl to the evidence and
/// information accumulators.
fn accumulate(logz : &mut f64, h : &mut f64, logwt : f64, logl : f64) {
    let logz_new = calc::logaddexp(*logz, logwt);
    *h = (logwt - logz_new).exp() * logl + (*logz - logz_new).exp() * (*h + *logz) - logz_new;
    *logz = logz_new;
}

fn check_point(ev : &pool::Evaluated, ndim : usize) -> Result<(), NestedError> {
    if ev.transformed.nrows() != ndim {
        return Err(NestedError::PriorDimension { expected : ndim, found : ev.transformed.nrows() });
    }
    Ok(())
}

fn run(
    problem : &Problem<'_>,
    ndim : usize,
    settings : &Settings,
    pool : &mut dyn Pool,
    mut callback : Option<&mut dyn FnMut(&ProgressRecord)>
) -> Result<NestedResult, NestedError> {
    settings.validate()?;
    if ndim == 0 {
        return Err(NestedError::InvalidSettings(String::from("ndim must be positive")));
    }

    let mut phase = Phase::Init;
    tracing::info!(
        "Nested sampling: {:?} with method={}, npoints={}, ndim={}, seed={}",
        phase,
        settings.method,
        settings.npoints,
        ndim,
        settings.seed
    );

    let npoints = settings.npoints;
    let n = npoints as f64;
    let npdim = settings.npdim.unwrap_or(ndim);
    let mut rng = StdRng::seed_from_u64(settings.seed);
    let mut sampler = Sampler::new(npdim, settings);
    let mut live = LivePointSet::new();

    for ev in sampler.initial_points(npoints, problem, pool, &mut rng)? {
        check_point(&ev, ndim)?;
        if !ev.logl.is_finite() {
            return Err(NestedError::NonFiniteLikelihood { logl : ev.logl, point : ev.transformed.as_slice().to_vec() });
        }
        live.push_live(ev.unit, ev.transformed, ev.logl);
    }

    enter(&mut phase, Phase::Sampling);
    let dlogz = settings.effective_dlogz();
    let mut logz = LOG_ZERO;
    let mut h = 0.0;

    // Width of the first shell, 1 - exp(-1/n); later shells shrink by exp(-1/n).
    let mut logvol = (-(-1. / n).exp_m1()).ln();

    let mut since_update = settings.update_interval;
    let mut nbound = 0;
    let mut ndecl = 0;
    let mut logwt_old = f64::NEG_INFINITY;
    let mut it = 0;
    loop {
        let slot = live.worst().ok_or_else(|| NestedError::InvalidSettings(String::from("npoints must be positive")) )?;
        let loglstar = live.point(live.live_ids()[slot]).logl;
        let logwt = logvol + loglstar;
        accumulate(&mut logz, &mut h, logwt, loglstar);

        let pointvol = (-(it as f64) / n).exp() / n;
        if since_update >= settings.update_interval {
            sampler.update(&live.live_units(), pointvol, pool)?;
            nbound += 1;
            since_update = 0;
        }

        let (ev, nused) = sampler.new_point(loglstar, problem, pool, &mut rng)?;
        since_update += nused;
        check_point(&ev, ndim)?;
        let new_id = live.insert(ev.unit, ev.transformed, ev.logl);
        live.replace(slot, new_id, logwt, logvol);
        logvol -= 1. / n;
        it += 1;

        let record = ProgressRecord { iteration : it, logz, ncall : sampler.ncall(), logvol, nbound };
        tracing::trace!("{}", record);
        if let Some(cb) = callback.as_mut() {
            cb(&record);
        }

        if let Some(dlogz) = dlogz {
            let logz_remain = live.max_logl() - it as f64 / n;
            if calc::logaddexp(logz, logz_remain) - logz < dlogz {
                tracing::debug!("Remaining evidence below dlogz={} after {} iterations", dlogz, it);
                break;
            }
        }
        if let Some(factor) = settings.decline_factor {
            if logwt < logwt_old {
                ndecl += 1;
            } else {
                ndecl = 0;
            }
            if ndecl as f64 > factor * n {
                tracing::debug!("Weights declined for {} iterations", ndecl);
                break;
            }
        }
        logwt_old = logwt;
        if settings.maxiter.map(|m| it >= m ).unwrap_or(false) {
            tracing::debug!("Iteration budget exhausted");
            break;
        }
        if settings.maxcall.map(|m| sampler.ncall() >= m ).unwrap_or(false) {
            tracing::debug!("Likelihood call budget exhausted");
            break;
        }
    }

    enter(&mut phase, Phase::Terminating);
    let logvol_final = -(it as f64) / n - n.ln();
    for slot in 0..live.len() {
        let logl = live.point(live.live_ids()[slot]).logl;
        let logwt = logvol_final + logl;
        accumulate(&mut logz, &mut h, logwt, logl);
        live.record_dead(slot, logwt, logvol_final);
    }

    if h < 0.0 {
        if h > -SQRT_EPS {
            h = 0.0;
        } else {
            return Err(NestedError::NegativeInformation { h });
        }
    }

    let dead = live.dead();
    let res = NestedResult {
        logz,
        logzerr : (h / n).sqrt(),
        h,
        niter : it,
        ncall : sampler.ncall(),
        samples : dead.iter().map(|d| live.point(d.id).transformed.clone() ).collect(),
        weights : dead.iter().map(|d| (d.logwt - logz).exp() ).collect(),
        logl : dead.iter().map(|d| live.point(d.id).logl ).collect(),
        logvol : dead.iter().map(|d| d.logvol ).collect()
    };
    enter(&mut phase, Phase::Done);
    tracing::info!(
        "logz = {:.3} +/- {:.3} after {} iterations and {} likelihood calls ({} discarded by bound refits)",
        res.logz,
        res.logzerr,
        res.niter,
        res.ncall,
        sampler.ndiscarded()
    );
    Ok(res)
}

/// Runs nested sampling in a single call. loglikelihood receives prior-transformed points;
/// prior_transform maps points of the unit cube (of dimension settings.npdim, or ndim)
/// to ndim-dimensional parameters. Without a pool, likelihoods are evaluated in the
/// calling thread.
pub fn sample<L, P>(
    loglikelihood : L,
    prior_transform : P,
    ndim : usize,
    settings : Option<Settings>,
    pool : Option<&mut dyn Pool>,
    callback : Option<&mut dyn FnMut(&ProgressRecord)>
) -> Result<NestedResult, NestedError>
where
    L : Fn(&DVector<f64>) -> f64 + Sync,
    P : Fn(&DVector<f64>) -> DVector<f64>
{
    let settings = settings.unwrap_or_default();
    let problem = Problem { loglikelihood : &loglikelihood, prior_transform : &prior_transform };
    let mut serial = SerialPool::new();
    let pool = match pool {
        Some(pool) => pool,
        None => &mut serial as &mut dyn Pool
    };
    run(&problem, ndim, &settings, pool, callback)
}

/// Nested sampling estimator: bundles the log-likelihood, the prior transform and the
/// settings of a run, which is performed by fit(). Nested sampling evolves a set of live
/// points drawn from the prior: at each iteration the live point with the lowest likelihood
/// is recorded (with a weight proportional to its likelihood times the prior volume of the
/// shell it represents) and replaced by a fresh prior draw constrained to a higher
/// likelihood. The prior volume enclosed by the live set shrinks by a factor of about
/// exp(-1/npoints) per iteration, so the recorded points integrate the likelihood over
/// the prior (the evidence) while also forming a weighted posterior sample. Constrained
/// draws come from ellipsoids fitted to the live points (Method::Single and Method::Multi)
/// or from the whole prior (Method::Classic).
pub struct NestedSampler<'a> {

    loglikelihood : Box<dyn Fn(&DVector<f64>) -> f64 + Sync + 'a>,

    prior_transform : Box<dyn Fn(&DVector<f64>) -> DVector<f64> + 'a>,

    ndim : usize,

    settings : Settings,

    pool : Option<&'a mut dyn Pool>,

    callback : Option<Box<dyn FnMut(&ProgressRecord) + 'a>>,

    res : Option<NestedResult>

}

impl<'a> NestedSampler<'a> {

    /// Validates the settings (including whether the requested method is available in
    /// this build) before any likelihood is evaluated.
    pub fn new<L, P>(
        loglikelihood : L,
        prior_transform : P,
        ndim : usize,
        settings : Option<Settings>
    ) -> Result<Self, NestedError>
    where
        L : Fn(&DVector<f64>) -> f64 + Sync + 'a,
        P : Fn(&DVector<f64>) -> DVector<f64> + 'a
    {
        let settings = settings.unwrap_or_default();
        settings.validate()?;
        if ndim == 0 {
            return Err(NestedError::InvalidSettings(String::from("ndim must be positive")));
        }
        Ok(Self {
            loglikelihood : Box::new(loglikelihood),
            prior_transform : Box::new(prior_transform),
            ndim,
            settings,
            pool : None,
            callback : None,
            res : None
        })
    }

    pub fn with_pool(mut self, pool : &'a mut dyn Pool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_callback<C>(mut self, callback : C) -> Self
    where
        C : FnMut(&ProgressRecord) + 'a
    {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn fit(&mut self) -> Result<&NestedResult, NestedError> {
        let problem = Problem {
            loglikelihood : self.loglikelihood.as_ref(),
            prior_transform : self.prior_transform.as_ref()
        };
        let mut serial = SerialPool::new();
        let pool : &mut dyn Pool = match self.pool.as_mut() {
            Some(pool) => &mut **pool,
            None => &mut serial
        };
        let callback = match self.callback.as_mut() {
            Some(cb) => Some(cb.as_mut() as &mut dyn FnMut(&ProgressRecord)),
            None => None
        };
        let res = run(&problem, self.ndim, &self.settings, pool, callback)?;
        self.res = Some(res);
        self.posterior().ok_or_else(|| NestedError::InvalidSettings(String::from("run produced no result")) )
    }

    /// Result of the last successful call to fit().
    pub fn posterior(&self) -> Option<&NestedResult> {
        self.res.as_ref()
    }

}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn settings_from_partial_json() {
        let s = Settings::from_json(r#"{ "method" : "multi", "npoints" : 50, "dlogz" : 0.1 }"#).unwrap();
        assert_eq!(s.method, Method::Multi);
        assert_eq!(s.npoints, 50);
        assert_eq!(s.effective_dlogz(), Some(0.1));
        assert_eq!(s.queue_depth, 1);
        assert!((s.enlarge - 1.2).abs() < 1e-12);
        assert!(matches!(Settings::from_json("{ \"method\" : \"mcmc\" }"), Err(NestedError::Config(_))));
    }

    #[test]
    fn default_stopping_rule() {
        let s = Settings::default();
        assert_eq!(s.effective_dlogz(), Some(0.5));
        let s = Settings { decline_factor : Some(1.0), ..Settings::default() };
        assert_eq!(s.effective_dlogz(), None);
    }

    #[test]
    fn rejects_invalid_settings() {
        let bad = [
            Settings { npoints : 0, ..Settings::default() },
            Settings { enlarge : 0.5, ..Settings::default() },
            Settings { queue_depth : 0, ..Settings::default() },
            Settings { dlogz : Some(-1.0), ..Settings::default() },
            Settings { split_tolerance : 1.0, ..Settings::default() }
        ];
        for s in bad.iter() {
            assert!(matches!(s.validate(), Err(NestedError::InvalidSettings(_))));
        }
        assert!(matches!(
            NestedSampler::new(|_ : &DVector<f64>| 0.0, |u : &DVector<f64>| u.clone(), 0, None),
            Err(NestedError::InvalidSettings(_))
        ));
    }

    #[test]
    fn method_names() {
        for m in [Method::Classic, Method::Single, Method::Multi].iter() {
            assert_eq!(m.to_string().parse::<Method>().unwrap(), *m);
        }
        assert!("nuts".parse::<Method>().is_err());
    }

    #[test]
    fn multi_requires_clustering() {
        let s = Settings { method : Method::Multi, ..Settings::default() };
        let res = NestedSampler::new(|_ : &DVector<f64>| 0.0, |u : &DVector<f64>| u.clone(), 2, Some(s));
        if crate::HAVE_CLUSTERING {
            assert!(res.is_ok());
        } else {
            assert!(matches!(res, Err(NestedError::ClusteringUnavailable)));
        }
    }

    #[test]
    fn rejects_non_finite_likelihood() {
        let res = sample(
            |x : &DVector<f64>| if x[0] < 0.5 { f64::NAN } else { 0.0 },
            |u : &DVector<f64>| u.clone(),
            2,
            Some(Settings { npoints : 20, ..Settings::default() }),
            None,
            None
        );
        assert!(matches!(res, Err(NestedError::NonFiniteLikelihood { .. })));
    }

    #[test]
    fn call_ceiling_is_finite_unless_removed() {
        assert_eq!(Settings::default().call_ceiling, Some(DEFAULT_CALL_CEILING));
        let s = Settings::from_json(r#"{ "call_ceiling" : null }"#).unwrap();
        assert_eq!(s.call_ceiling, None);
    }

    #[test]
    fn unsatisfiable_constraint_aborts() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        // Every evaluation is worse than all previous ones, so no replacement qualifies.
        let counter = AtomicUsize::new(0);
        let res = sample(
            |_ : &DVector<f64>| -(counter.fetch_add(1, Ordering::SeqCst) as f64),
            |u : &DVector<f64>| u.clone(),
            2,
            Some(Settings { npoints : 10, call_ceiling : Some(1000), ..Settings::default() }),
            None,
            None
        );
        match res {
            Err(NestedError::SamplingStall { ncall, .. }) => assert_eq!(ncall, 1000),
            other => panic!("Expected a stall, got {:?}", other.map(|r| r.niter ))
        }
    }

    #[test]
    fn rejects_prior_dimension_mismatch() {
        let res = sample(
            |_ : &DVector<f64>| 0.0,
            |u : &DVector<f64>| DVector::from_element(u.nrows() + 1, 0.5),
            2,
            Some(Settings { npoints : 4, ..Settings::default() }),
            None,
            None
        );
        assert!(matches!(res, Err(NestedError::PriorDimension { expected : 2, found : 3 })));
    }

}
