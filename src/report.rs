//! Coverage artifact writer.
//!
//! Creates a uniquely named `.ec` artifact under the report directory and
//! appends the agent's execution-data snapshot to it. The write path must be
//! fully synchronous: on the end-signal path the process is killed the moment
//! the listener callback returns, so there is no later flush opportunity.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, warn};

use crate::agent::AgentLocator;

/// Failures while producing a coverage artifact.
///
/// None of these fail the run itself — the controller logs them and reports
/// run success regardless. Coverage is best-effort.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to create coverage artifact {path}")]
    ArtifactCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to open coverage artifact {path} for append")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("coverage agent snapshot failed")]
    Snapshot {
        #[source]
        source: std::io::Error,
    },
    #[error("failed to append execution data to {path}")]
    Append {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A persisted coverage artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageArtifact {
    pub path: PathBuf,
    /// Bytes appended by this write. Zero when no agent was running.
    pub appended: u64,
}

// Last stamp handed out, so two derivations inside the same microsecond
// still produce distinct artifact paths.
static LAST_STAMP: AtomicU64 = AtomicU64::new(0);

fn unique_stamp_micros() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64;

    let mut prev = LAST_STAMP.load(Ordering::Relaxed);
    loop {
        let next = now.max(prev + 1);
        match LAST_STAMP.compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(observed) => prev = observed,
        }
    }
}

/// Derive a fresh artifact path under `dir`.
pub fn artifact_path(dir: &Path) -> PathBuf {
    dir.join(format!("coverage-{}.ec", unique_stamp_micros()))
}

/// Writes coverage artifacts into a fixed report directory.
pub struct CoverageReporter {
    dir: PathBuf,
}

impl CoverageReporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the artifact and append the agent snapshot to it.
    ///
    /// The artifact file is created only if it does not already exist and is
    /// never truncated — only appended to. A missing agent is not an error:
    /// the artifact still exists, just with nothing appended. The file handle
    /// is released on every exit path; a failed flush is logged, never
    /// escalated.
    pub fn write(&self, locator: &dyn AgentLocator) -> Result<CoverageArtifact, WriteError> {
        let path = artifact_path(&self.dir);
        self.write_at(path, locator)
    }

    fn write_at(
        &self,
        path: PathBuf,
        locator: &dyn AgentLocator,
    ) -> Result<CoverageArtifact, WriteError> {
        if !path.exists() {
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .map_err(|source| WriteError::ArtifactCreate {
                    path: path.clone(),
                    source,
                })?;
            debug!(path = %path.display(), "coverage artifact created");
        }

        let mut out = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|source| WriteError::Open {
                path: path.clone(),
                source,
            })?;

        let appended = match locator.locate() {
            Some(agent) => {
                let data = agent
                    .execution_data()
                    .map_err(|source| WriteError::Snapshot { source })?;
                out.write_all(&data).map_err(|source| WriteError::Append {
                    path: path.clone(),
                    source,
                })?;
                data.len() as u64
            }
            None => {
                debug!("no coverage agent running; artifact left empty");
                0
            }
        };

        if let Err(err) = out.flush() {
            warn!(path = %path.display(), %err, "failed to flush coverage artifact");
        }

        Ok(CoverageArtifact { path, appended })
    }
}
