//! Execution mode types for migration runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use siteferry_types::job::StageName;

/// Cooperative cancellation signal.
///
/// Checked by the coordinator between stages and by worker pools between
/// sub-items; never pre-empts an in-flight gateway call. Cloning shares the
/// underlying flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runtime execution options (not part of the migration plan).
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Stop after this stage completes (drives the `extract` command).
    pub run_until: Option<StageName>,
    /// Cooperative cancellation signal shared with the caller.
    pub cancel: CancelToken,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_starts_clear_and_sticks() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn clones_share_the_flag() {
        let a = CancelToken::new();
        let b = a.clone();
        b.cancel();
        assert!(a.is_cancelled());
    }

    #[test]
    fn options_default_runs_whole_pipeline() {
        let opts = ExecutionOptions::default();
        assert!(opts.run_until.is_none());
        assert!(!opts.cancel.is_cancelled());
    }
}
