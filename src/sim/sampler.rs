use nalgebra::*;
use rand::Rng;
use crate::bound::{Ellipsoid, MultiEllipsoid, Decomposer, bounding_ellipsoid};
use super::{Method, Settings, NestedError};
use super::pool::{Pool, Task, Evaluated, LogLikelihood};

/// Consecutive proposals falling outside the unit cube after which the bound is
/// considered useless and the run is aborted.
pub const MAX_OUT_OF_CUBE : usize = 1_000_000;

/// The two functions defining a run: the log-likelihood of a transformed point and the
/// prior transform from the unit cube to the parameter space.
pub struct Problem<'a> {

    pub loglikelihood : LogLikelihood<'a>,

    pub prior_transform : &'a dyn Fn(&DVector<f64>) -> DVector<f64>

}

/// Region of the unit cube proposals are drawn from.
#[derive(Debug, Clone)]
pub enum Bound {

    /// The whole unit cube (no bound fitted yet, or classic sampling).
    Cube,

    Single(Ellipsoid),

    Multi(MultiEllipsoid)

}

impl Bound {

    /// Number of ellipsoids in the bound (zero for the unit cube).
    pub fn n_ellipsoids(&self) -> usize {
        match self {
            Bound::Cube => 0,
            Bound::Single(_) => 1,
            Bound::Multi(m) => m.len()
        }
    }

    /// Volume of the region (an upper bound for overlapping ellipsoids).
    pub fn volume(&self) -> f64 {
        match self {
            Bound::Cube => 1.0,
            Bound::Single(ell) => ell.volume(),
            Bound::Multi(m) => m.volume()
        }
    }

}

fn in_unit_cube(u : &DVector<f64>) -> bool {
    u.iter().all(|ui| *ui > 0.0 && *ui < 1.0 )
}

/// Draws candidate points from the current bound and keeps the evaluation pool fed.
/// The bound is refitted by update(); every queued candidate drawn from the previous
/// bound is discarded at that moment, so candidates are always distributed according
/// to the latest bound.
#[derive(Debug)]
pub struct Sampler {

    method : Method,

    npdim : usize,

    enlarge : f64,

    queue_depth : usize,

    decomposer : Decomposer,

    bound : Bound,

    ncall : usize,

    ndiscarded : usize,

    call_ceiling : Option<usize>

}

impl Sampler {

    pub fn new(npdim : usize, settings : &Settings) -> Self {
        Self {
            method : settings.method,
            npdim,
            enlarge : settings.enlarge,
            queue_depth : settings.queue_depth.max(1),
            decomposer : Decomposer::new(settings.split_tolerance, settings.kmeans_iter),
            bound : Bound::Cube,
            ncall : 0,
            ndiscarded : 0,
            call_ceiling : settings.call_ceiling
        }
    }

    pub fn bound(&self) -> &Bound {
        &self.bound
    }

    /// Likelihood evaluations submitted so far, including discarded ones.
    pub fn ncall(&self) -> usize {
        self.ncall
    }

    /// Evaluated candidates dropped by bound refits.
    pub fn ndiscarded(&self) -> usize {
        self.ndiscarded
    }

    /// Refits the bound to the unit-cube coordinates of the live points. pointvol is the
    /// prior volume each live point is expected to represent.
    pub fn update(&mut self, live : &[DVector<f64>], pointvol : f64, pool : &mut dyn Pool) -> Result<(), NestedError> {
        self.bound = match self.method {
            Method::Classic => return Ok(()),
            Method::Single => {
                let mut ell = bounding_ellipsoid(live, pointvol)?;
                let vol = ell.volume();
                ell.scale_to_volume(vol * self.enlarge);
                Bound::Single(ell)
            },
            Method::Multi => {
                let mut multi = self.decomposer.decompose(live, pointvol)?;
                multi.enlarge(self.enlarge);
                Bound::Multi(multi)
            }
        };
        let ndiscarded = pool.discard();
        self.ndiscarded += ndiscarded;
        tracing::debug!(
            "Bound refitted: {} ellipsoid(s), volume {:.4e}, {} queued candidate(s) discarded",
            self.bound.n_ellipsoids(),
            self.bound.volume(),
            ndiscarded
        );
        Ok(())
    }

    fn draw_cube<R>(&self, rng : &mut R) -> DVector<f64>
    where
        R : Rng + ?Sized
    {
        DVector::from_iterator(self.npdim, (0..self.npdim).map(|_| rng.gen::<f64>() ))
    }

    /// Draws a point uniformly from the intersection of the bound and the unit cube.
    pub fn propose<R>(&self, rng : &mut R) -> Result<DVector<f64>, NestedError>
    where
        R : Rng + ?Sized
    {
        for _ in 0..MAX_OUT_OF_CUBE {
            let u = match &self.bound {
                Bound::Cube => return Ok(self.draw_cube(rng)),
                Bound::Single(ell) => ell.sample(rng),
                Bound::Multi(multi) => multi.sample(rng)?
            };
            if in_unit_cube(&u) {
                return Ok(u);
            }
        }
        Err(NestedError::SamplingStall {
            ncall : self.ncall,
            reason : "bound proposals keep falling outside the unit cube"
        })
    }

    fn submit(&mut self, units : Vec<DVector<f64>>, problem : &Problem<'_>, pool : &mut dyn Pool) -> Result<(), NestedError> {
        if let Some(ceiling) = self.call_ceiling {
            if self.ncall + units.len() > ceiling {
                return Err(NestedError::SamplingStall {
                    ncall : self.ncall,
                    reason : "likelihood call ceiling reached"
                });
            }
        }
        self.ncall += units.len();
        let batch = units.into_iter()
            .map(|unit| {
                let transformed = (problem.prior_transform)(&unit);
                Task { unit, transformed }
            })
            .collect();
        pool.submit(problem.loglikelihood, batch);
        Ok(())
    }

    /// Evaluates npoints draws from the whole unit cube, in draw order.
    pub fn initial_points<R>(
        &mut self,
        npoints : usize,
        problem : &Problem<'_>,
        pool : &mut dyn Pool,
        rng : &mut R
    ) -> Result<Vec<Evaluated>, NestedError>
    where
        R : Rng + ?Sized
    {
        let units = (0..npoints).map(|_| self.draw_cube(&mut *rng) ).collect();
        self.submit(units, problem, pool)?;
        let mut points = Vec::with_capacity(npoints);
        while let Some(ev) = pool.retrieve() {
            points.push(ev);
        }
        if points.len() != npoints {
            return Err(NestedError::SamplingStall {
                ncall : self.ncall,
                reason : "pool returned fewer evaluations than submitted"
            });
        }
        Ok(points)
    }

    /// Consumes evaluated candidates until one reaches loglstar (ties included), topping up
    /// the pool with queue_depth fresh proposals whenever it runs dry. Returns the point
    /// and how many candidates were consumed to find it.
    pub fn new_point<R>(
        &mut self,
        loglstar : f64,
        problem : &Problem<'_>,
        pool : &mut dyn Pool,
        rng : &mut R
    ) -> Result<(Evaluated, usize), NestedError>
    where
        R : Rng + ?Sized
    {
        let mut nused = 0;
        loop {
            if pool.pending() == 0 {
                let units = (0..self.queue_depth)
                    .map(|_| self.propose(&mut *rng) )
                    .collect::<Result<Vec<_>, _>>()?;
                self.submit(units, problem, pool)?;
            }
            let ev = pool.retrieve().ok_or(NestedError::SamplingStall {
                ncall : self.ncall,
                reason : "pool returned fewer evaluations than submitted"
            })?;
            nused += 1;
            if ev.logl.is_nan() || ev.logl == f64::INFINITY {
                return Err(NestedError::NonFiniteLikelihood { logl : ev.logl, point : ev.transformed.as_slice().to_vec() });
            }
            if ev.logl >= loglstar {
                return Ok((ev, nused));
            }
        }
    }

}
