//! The seam between the generic cache worker and the computations it runs.

use crate::cancel::CancelToken;
use std::fmt::Debug;
use std::hash::Hash;

/// Error type for difficulty calculation failures.
#[derive(Debug, Clone, PartialEq)]
pub enum CalcError {
    /// The stop token fired; the partial result must be thrown away.
    Interrupted,
    /// The beatmap data is invalid or missing.
    InvalidBeatmap(String),
    /// The beatmap file could not be read.
    Io(String),
}

impl std::fmt::Display for CalcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalcError::Interrupted => write!(f, "Interrupted"),
            CalcError::InvalidBeatmap(msg) => write!(f, "Invalid beatmap: {}", msg),
            CalcError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for CalcError {}

impl From<std::io::Error> for CalcError {
    fn from(e: std::io::Error) -> Self {
        CalcError::Io(e.to_string())
    }
}

/// A computation the [`CalcCache`](super::cache::CalcCache) worker can run.
///
/// `Target` is what the cache is currently bound to (a beatmap, a batch of
/// hashes). Replacing it with an unequal value throws away every cached
/// output. `Memo` lives on the worker thread for as long as the target does
/// and holds whatever intermediate data is worth sharing between requests.
pub trait CalcStrategy: Send + Sync + 'static {
    type Target: PartialEq + Send + Sync + 'static;
    type Request: Clone + Eq + Hash + Debug + Send + Sync + 'static;
    type Output: Clone + Send + 'static;
    type Memo: Default + Send + 'static;

    /// Short name used for the worker thread and in log lines.
    fn name(&self) -> &str;

    /// Computes one output.
    ///
    /// Implementations check `stop` between expensive steps and return
    /// [`CalcError::Interrupted`] once it fires.
    fn compute(
        &self,
        target: &Self::Target,
        memo: &mut Self::Memo,
        request: &Self::Request,
        stop: &CancelToken,
    ) -> Result<Self::Output, CalcError>;
}

/// Helper for strategies: bails out with [`CalcError::Interrupted`].
pub fn check_stop(stop: &CancelToken) -> Result<(), CalcError> {
    if stop.should_stop() {
        Err(CalcError::Interrupted)
    } else {
        Ok(())
    }
}
