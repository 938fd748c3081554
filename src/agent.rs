//! Coverage agent discovery.
//!
//! The agent that accumulates execution counters lives inside the target
//! process; the harness only ever sees it through the `CoverageAgent`
//! capability. Discovery happens once, at report-write time, through an
//! `AgentLocator` — absence of an agent is an expected outcome, not an error.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

/// Environment variable naming the file a sidecar agent snapshots into.
pub const AGENT_FILE_ENV: &str = "COVRUN_AGENT_FILE";

/// In-process collaborator that can snapshot accumulated execution counters.
pub trait CoverageAgent: Send + Sync {
    /// Snapshot the accumulated execution data as raw bytes.
    ///
    /// Non-destructive: the agent's internal counters are left untouched, so
    /// successive dumps produce incremental artifacts.
    fn execution_data(&self) -> io::Result<Vec<u8>>;
}

/// Resolves a running coverage agent, if one is present.
pub trait AgentLocator: Send + Sync {
    fn locate(&self) -> Option<Arc<dyn CoverageAgent>>;
}

/// Locator that never finds an agent.
pub struct NoAgent;

impl AgentLocator for NoAgent {
    fn locate(&self) -> Option<Arc<dyn CoverageAgent>> {
        None
    }
}

/// Agent backed by a snapshot file a cooperating target writes counters to.
pub struct SnapshotFileAgent {
    path: PathBuf,
}

impl SnapshotFileAgent {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CoverageAgent for SnapshotFileAgent {
    fn execution_data(&self) -> io::Result<Vec<u8>> {
        fs::read(&self.path)
    }
}

/// Discovers a `SnapshotFileAgent` through `COVRUN_AGENT_FILE`.
///
/// The variable is read at locate time, not at construction, so an agent that
/// comes up after the run started is still found.
#[derive(Default)]
pub struct EnvAgentLocator;

impl AgentLocator for EnvAgentLocator {
    fn locate(&self) -> Option<Arc<dyn CoverageAgent>> {
        let path = PathBuf::from(std::env::var_os(AGENT_FILE_ENV)?);
        if !path.is_file() {
            debug!(path = %path.display(), "agent snapshot file not present");
            return None;
        }
        Some(Arc::new(SnapshotFileAgent::new(path)))
    }
}
