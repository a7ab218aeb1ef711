//! Engine context and callback traits
//!
//! The context is passed explicitly to the planner and executor; there is no
//! process-wide state.

use crate::executor::RunResult;
use crate::planner::Change;
use crate::provider::ProviderRegistry;
use crate::state::StateStore;
use crate::types::Outcome;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Run-level cancellation signal
///
/// Cancelling stops new changes from starting; changes already running are
/// allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Collaborators shared by planning and execution
pub struct EngineContext<'a> {
    pub registry: &'a ProviderRegistry,
    pub store: &'a dyn StateStore,
    pub cancellation: CancellationToken,
}

impl<'a> EngineContext<'a> {
    pub fn new(registry: &'a ProviderRegistry, store: &'a dyn StateStore) -> Self {
        Self {
            registry,
            store,
            cancellation: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

/// Progress callback for execution
///
/// All calls are made from the coordinating thread, never from workers.
pub trait ProgressCallback: Send {
    /// Called once before any change starts
    fn on_run_start(&mut self, total: usize);

    /// Called when a change is handed to a worker
    fn on_change_start(&mut self, change: &Change);

    /// Called when a change reaches a terminal outcome (including skips)
    fn on_change_complete(&mut self, change: &Change, outcome: &Outcome);

    /// Called once after the last change completes
    fn on_run_complete(&mut self, _result: &RunResult) {}
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_start(&mut self, _total: usize) {}
    fn on_change_start(&mut self, _change: &Change) {}
    fn on_change_complete(&mut self, _change: &Change, _outcome: &Outcome) {}
}
