//! Structured run log — JSON lines per run.
//!
//! Every covrun session writes a `.jsonl` log capturing the lifecycle:
//! launch, capability decisions, termination signals, coverage writes, and
//! completion. Each line is a self-contained JSON object with a timestamp,
//! making logs easy to grep, stream, and post-process.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::debug;

/// A structured event in the run log.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// ISO-8601 UTC timestamp.
    pub timestamp: String,
    /// The event type and its data.
    #[serde(flatten)]
    pub event: LogEvent,
}

/// All event types that can appear in the run log.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    /// A run was started.
    RunStarted { run_id: String, program: String },
    /// The monitored target process was launched.
    TargetLaunched { program: String, work_dir: String },
    /// A requested capability was denied (run continues).
    CapabilityDenied { capability: String },
    /// The external end-test signal arrived.
    EndSignalReceived { channel: String },
    /// The target exited on its own.
    TargetExited { exit_code: Option<i32> },
    /// A coverage artifact was written.
    CoverageWritten { path: String, appended: u64 },
    /// Coverage extraction failed (run still reports success).
    CoverageFailed { reason: String },
    /// The completion report was delivered.
    RunCompleted { status: String },
}

/// Writer for JSON lines run logs.
pub struct RunLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl RunLog {
    /// Create a new run log, writing to the given path.
    ///
    /// Creates the file (and parent directories) if they don't exist.
    /// Appends to an existing file.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory: {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open run log: {}", path.display()))?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    /// Log an event.
    pub fn log(&self, event: LogEvent) -> Result<()> {
        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            event,
        };

        let json = serde_json::to_string(&entry).context("failed to serialize log entry")?;

        debug!(event = %json, "run log");

        let mut writer = self.writer.lock().unwrap();
        writeln!(writer, "{json}").context("failed to write log entry")?;
        writer.flush().context("failed to flush run log")?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
