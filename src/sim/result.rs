use nalgebra::*;
use rand::Rng;
use serde::{Serialize, Deserialize};
use std::fmt;
use thiserror::Error;
use crate::calc::{self, ChoiceError};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FieldError {

    #[error("Result has no field named '{0}'")]
    NotFound(String)

}

/// A result field retrieved by name.
#[derive(Debug, Clone, PartialEq)]
pub enum Field<'a> {

    Scalar(f64),

    Count(usize),

    Values(&'a [f64]),

    Points(&'a [DVector<f64>])

}

impl fmt::Display for Field<'_> {

    fn fmt(&self, f : &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Scalar(v) => write!(f, "{:?}", v),
            Field::Count(n) => write!(f, "{}", n),
            Field::Values(v) => write!(f, "<{} values>", v.len()),
            Field::Points(p) => write!(f, "<{} points>", p.len())
        }
    }

}

/// Output of a nested sampling run. The samples are the dead points in the order they
/// were removed from the live set (followed by the final live points), each with its
/// posterior weight, log-likelihood and the log prior volume it was assigned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NestedResult {

    /// Natural logarithm of the evidence.
    pub logz : f64,

    /// Standard error of logz, sqrt(h / npoints).
    pub logzerr : f64,

    /// Information (negative entropy) of the posterior relative to the prior, in nats.
    pub h : f64,

    /// Number of sampling iterations.
    pub niter : usize,

    /// Number of likelihood evaluations.
    pub ncall : usize,

    /// Prior-transformed coordinates of each sample.
    pub samples : Vec<DVector<f64>>,

    /// Normalized posterior weights of the samples.
    pub weights : Vec<f64>,

    pub logl : Vec<f64>,

    pub logvol : Vec<f64>

}

const FIELD_NAMES : [&str; 9] = ["h", "logl", "logvol", "logz", "logzerr", "ncall", "niter", "samples", "weights"];

impl NestedResult {

    /// Names accepted by get(), in alphabetical order.
    pub fn field_names() -> &'static [&'static str] {
        &FIELD_NAMES[..]
    }

    pub fn get(&self, name : &str) -> Result<Field<'_>, FieldError> {
        match name {
            "logz" => Ok(Field::Scalar(self.logz)),
            "logzerr" => Ok(Field::Scalar(self.logzerr)),
            "h" => Ok(Field::Scalar(self.h)),
            "niter" => Ok(Field::Count(self.niter)),
            "ncall" => Ok(Field::Count(self.ncall)),
            "samples" => Ok(Field::Points(&self.samples[..])),
            "weights" => Ok(Field::Values(&self.weights[..])),
            "logl" => Ok(Field::Values(&self.logl[..])),
            "logvol" => Ok(Field::Values(&self.logvol[..])),
            other => Err(FieldError::NotFound(other.to_string()))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "niter: {}\nncall: {}\nnsamples: {}\nlogz: {:6.3} +/- {:6.3}\nh: {:6.3}",
            self.niter,
            self.ncall,
            self.samples.len(),
            self.logz,
            self.logzerr,
            self.h
        )
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s : &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Equally-weighted posterior sample of the same size as samples.
    pub fn resample_equal<R>(&self, rng : &mut R) -> Result<Vec<DVector<f64>>, ChoiceError>
    where
        R : Rng + ?Sized
    {
        calc::resample_equal(&self.samples[..], &self.weights[..], rng)
    }

    /// Weighted posterior mean and covariance. Fails on an empty result.
    pub fn mean_and_cov(&self) -> Result<(DVector<f64>, DMatrix<f64>), ChoiceError> {
        calc::mean_and_cov(&self.samples[..], &self.weights[..])
    }

}

impl fmt::Display for NestedResult {

    fn fmt(&self, f : &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "Result()");
        }
        let width = FIELD_NAMES.iter().map(|n| n.len() ).max().unwrap_or(0) + 1;
        let lines = FIELD_NAMES.iter()
            .filter_map(|name| self.get(name).ok().map(|field| format!("{:>w$}: {}", name, field, w = width) ))
            .collect::<Vec<_>>();
        write!(f, "{}", lines.join("\n"))
    }

}
