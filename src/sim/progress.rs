use indicatif::{ProgressBar, ProgressStyle};
use serde::{Serialize, Deserialize};
use std::fmt;

/// State of the run after an iteration, handed to progress callbacks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ProgressRecord {

    pub iteration : usize,

    pub logz : f64,

    pub ncall : usize,

    pub logvol : f64,

    /// Number of bound refits so far.
    pub nbound : usize

}

impl fmt::Display for ProgressRecord {

    fn fmt(&self, f : &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "it={:6} logz={:8.3} ncall={:8} logvol={:8.3} nbound={}",
            self.iteration,
            self.logz,
            self.ncall,
            self.logvol,
            self.nbound
        )
    }

}

/// Renders progress records on a terminal spinner.
pub struct ProgressPrinter {
    bar : ProgressBar
}

impl ProgressPrinter {

    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(ProgressStyle::default_spinner().template("{spinner} [{elapsed_precise}] {msg}"));
        Self { bar }
    }

    /// A printer that draws nothing (for non-interactive runs).
    pub fn hidden() -> Self {
        Self { bar : ProgressBar::hidden() }
    }

    pub fn update(&self, record : &ProgressRecord) {
        self.bar.set_message(record.to_string());
        self.bar.tick();
    }

    /// Callback to be passed to the sampler.
    pub fn callback(&self) -> impl FnMut(&ProgressRecord) + '_ {
        move |record| self.update(record)
    }

    pub fn finish(&self) {
        self.bar.finish();
    }

}

impl Default for ProgressPrinter {

    fn default() -> Self {
        Self::new()
    }

}
