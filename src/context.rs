//! Per-run context threaded through both flows.

use crate::config::OrchestratorConfig;
use crate::gate::PushGate;
use crate::identity::RunIdentity;
use tokio_util::task::TaskTracker;

/// Everything a flow needs to know about the current run.
///
/// Built once by the CLI layer; flows never consult the environment.
#[derive(Debug)]
pub struct RunContext {
    /// Commit identity, fixed for the whole run
    pub identity: RunIdentity,
    /// Registry authorization
    pub gate: PushGate,
    /// Resolved configuration
    pub config: OrchestratorConfig,
    /// Every build task spawned for this run. Cleanup after an interrupt waits
    /// on it so that it never overlaps a build that is still being torn down.
    pub tasks: TaskTracker,
}

impl RunContext {
    /// Creates a context.
    pub fn new(identity: RunIdentity, gate: PushGate, config: OrchestratorConfig) -> Self {
        Self {
            identity,
            gate,
            config,
            tasks: TaskTracker::new(),
        }
    }
}
