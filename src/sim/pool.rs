use nalgebra::*;
use rayon::prelude::*;
use std::collections::VecDeque;

/// Log-likelihood as seen by the pools: a function of the prior-transformed point.
/// It must be Sync so that pools can call it from worker threads.
pub type LogLikelihood<'a> = &'a (dyn Fn(&DVector<f64>) -> f64 + Sync);

/// A proposal waiting for its likelihood evaluation.
#[derive(Debug, Clone)]
pub struct Task {

    pub unit : DVector<f64>,

    pub transformed : DVector<f64>

}

/// A proposal together with its log-likelihood.
#[derive(Debug, Clone)]
pub struct Evaluated {

    pub unit : DVector<f64>,

    pub transformed : DVector<f64>,

    pub logl : f64

}

/// Evaluates likelihoods on behalf of the sampler. Proposals are submitted in batches and
/// retrieved one at a time, in submission order, no matter how (or where) the
/// evaluations actually happened. Since the pool never draws random numbers, a run
/// reproduces exactly across backends given the same seed and batch size.
pub trait Pool {

    /// Evaluates (or schedules the evaluation of) every task of the batch.
    fn submit(&mut self, loglikelihood : LogLikelihood<'_>, batch : Vec<Task>);

    /// Returns the oldest evaluated task not yet retrieved.
    fn retrieve(&mut self) -> Option<Evaluated>;

    /// Drops all tasks not yet retrieved, returning how many were dropped. Their
    /// evaluations still count as likelihood calls for the caller.
    fn discard(&mut self) -> usize;

    /// How many evaluated tasks are waiting to be retrieved.
    fn pending(&self) -> usize;

}

/// Evaluates every task in the calling thread, as soon as it is submitted.
#[derive(Debug, Default)]
pub struct SerialPool {
    done : VecDeque<Evaluated>
}

impl SerialPool {

    pub fn new() -> Self {
        Self::default()
    }

}

impl Pool for SerialPool {

    fn submit(&mut self, loglikelihood : LogLikelihood<'_>, batch : Vec<Task>) {
        for Task { unit, transformed } in batch {
            let logl = loglikelihood(&transformed);
            self.done.push_back(Evaluated { unit, transformed, logl });
        }
    }

    fn retrieve(&mut self) -> Option<Evaluated> {
        self.done.pop_front()
    }

    fn discard(&mut self) -> usize {
        let n = self.done.len();
        self.done.clear();
        n
    }

    fn pending(&self) -> usize {
        self.done.len()
    }

}

/// Evaluates each batch in parallel over a dedicated rayon thread pool. submit() blocks
/// until the whole batch is evaluated.
pub struct ThreadPool {
    pool : rayon::ThreadPool,
    done : VecDeque<Evaluated>
}

impl ThreadPool {

    /// Builds a pool with the informed number of worker threads (zero lets rayon
    /// choose one per logical CPU).
    pub fn new(nthreads : usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(nthreads)
            .thread_name(|ix| format!("nested-eval-{}", ix) )
            .build()?;
        Ok(Self { pool, done : VecDeque::new() })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

}

impl std::fmt::Debug for ThreadPool {

    fn fmt(&self, f : &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ThreadPool {{ threads: {}, pending: {} }}", self.threads(), self.done.len())
    }

}

impl Pool for ThreadPool {

    fn submit(&mut self, loglikelihood : LogLikelihood<'_>, batch : Vec<Task>) {
        let evaluated : Vec<Evaluated> = self.pool.install(|| {
            batch.into_par_iter()
                .map(|Task { unit, transformed }| {
                    let logl = loglikelihood(&transformed);
                    Evaluated { unit, transformed, logl }
                })
                .collect()
        });
        self.done.extend(evaluated);
    }

    fn retrieve(&mut self) -> Option<Evaluated> {
        self.done.pop_front()
    }

    fn discard(&mut self) -> usize {
        let n = self.done.len();
        self.done.clear();
        n
    }

    fn pending(&self) -> usize {
        self.done.len()
    }

}
