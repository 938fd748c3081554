//! Monitored target proxy.
//!
//! Wraps the launched target. Before the target starts, the proxy asks the
//! capability broker for storage access — denial is logged and the run
//! proceeds, it does not abort. When the target tears down on its own, the
//! proxy notifies its termination listener exactly once. The proxy never
//! kills the hosting process; that is the end-signal receiver's job.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Weak};

use tracing::{debug, warn};

use crate::launch::{LaunchError, TargetDescriptor, TargetHandle, TargetLauncher};
use crate::run::TerminationListener;

/// Environment capabilities the target run needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    StorageRead,
    StorageWrite,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::StorageRead => write!(f, "storage-read"),
            Capability::StorageWrite => write!(f, "storage-write"),
        }
    }
}

/// Best-effort capability acquisition. Returns the granted subset; the caller
/// decides what a denial means (here: log and continue).
pub trait CapabilityBroker: Send + Sync {
    fn request(&self, wanted: &[Capability]) -> Vec<Capability>;
}

/// Broker that probes real filesystem access to the report directory.
pub struct FsCapabilityBroker {
    dir: PathBuf,
}

impl FsCapabilityBroker {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn probe(&self, capability: Capability) -> bool {
        match capability {
            Capability::StorageRead => std::fs::read_dir(&self.dir).is_ok(),
            Capability::StorageWrite => {
                let probe = self.dir.join(".write-probe");
                match std::fs::write(&probe, b"") {
                    Ok(()) => {
                        let _ = std::fs::remove_file(&probe);
                        true
                    }
                    Err(_) => false,
                }
            }
        }
    }
}

impl CapabilityBroker for FsCapabilityBroker {
    fn request(&self, wanted: &[Capability]) -> Vec<Capability> {
        wanted
            .iter()
            .copied()
            .filter(|cap| self.probe(*cap))
            .collect()
    }
}

/// The launched target plus its one-shot teardown notification.
#[derive(Debug)]
pub struct MonitoredTarget {
    handle: Mutex<Box<dyn TargetHandle>>,
    listener: Mutex<Option<Weak<dyn TerminationListener>>>,
    notified: AtomicBool,
    denied: Vec<Capability>,
}

impl MonitoredTarget {
    /// Acquire capabilities, then launch the target.
    ///
    /// Capability denial is deliberately non-fatal: a run without storage
    /// access still executes the target, it just loses its coverage artifact.
    pub fn launch(
        launcher: &dyn TargetLauncher,
        broker: &dyn CapabilityBroker,
        descriptor: &TargetDescriptor,
    ) -> Result<Self, LaunchError> {
        let wanted = [Capability::StorageRead, Capability::StorageWrite];
        let granted = broker.request(&wanted);
        let denied: Vec<Capability> = wanted
            .into_iter()
            .filter(|cap| !granted.contains(cap))
            .collect();
        for capability in &denied {
            warn!(%capability, "capability denied; run continues without it");
        }

        let handle = launcher.launch(descriptor)?;
        Ok(Self {
            handle: Mutex::new(handle),
            listener: Mutex::new(None),
            notified: AtomicBool::new(false),
            denied,
        })
    }

    /// Capabilities the broker refused. The run proceeds regardless; callers
    /// may want to record the reduced guarantees.
    pub fn denied_capabilities(&self) -> &[Capability] {
        &self.denied
    }

    /// Install (or clear) the termination back-reference. `None` is legal and
    /// means notifications become no-ops.
    pub fn set_termination_listener(&self, listener: Option<Weak<dyn TerminationListener>>) {
        *self.listener.lock().unwrap() = listener;
    }

    /// Block until the target exits naturally, then fire the teardown
    /// notification. Returns the target's exit code.
    pub fn wait(&self) -> io::Result<Option<i32>> {
        let exit = self.handle.lock().unwrap().wait();
        self.notify_teardown();
        exit
    }

    /// Fire the termination listener. Idempotent: only the first call
    /// notifies, and an unset or dropped listener is a no-op.
    pub fn notify_teardown(&self) {
        if self.notified.swap(true, Ordering::AcqRel) {
            return;
        }
        let listener = self.listener.lock().unwrap().clone();
        match listener.as_ref().and_then(Weak::upgrade) {
            Some(listener) => listener.on_run_end(),
            None => debug!("target teardown with no termination listener bound"),
        }
    }
}
