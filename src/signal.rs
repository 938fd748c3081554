//! External end-test signal channel.
//!
//! A passive receiver registered against a well-known channel name. When the
//! signal arrives it notifies the bound termination listener and then
//! unconditionally kills the current process — whether or not a listener was
//! bound, and whether or not the listener's work succeeded. Everything the
//! listener does (the coverage dump included) must therefore complete
//! synchronously before `on_signal` returns from the callback.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, info};

use crate::run::TerminationListener;

/// Default channel name the binary registers its receiver under.
pub const END_RUN_CHANNEL: &str = "end-run";

/// Kills the current process. Injected so tests can observe the call instead
/// of dying.
pub trait ProcessTerminator: Send + Sync {
    fn terminate(&self);
}

/// Real terminator: SIGKILL on unix so no atexit machinery runs, mirroring a
/// forced stop from outside.
pub struct HardKill;

impl ProcessTerminator for HardKill {
    fn terminate(&self) {
        #[cfg(unix)]
        // SAFETY: kill(2) on our own pid has no memory-safety concerns.
        unsafe {
            libc::kill(libc::getpid(), libc::SIGKILL);
        }
        // Unreachable on unix; the portable fallback elsewhere.
        std::process::exit(1);
    }
}

/// Receiver for the out-of-band end-test signal.
pub struct EndSignalReceiver {
    listener: Mutex<Option<Weak<dyn TerminationListener>>>,
    terminator: Arc<dyn ProcessTerminator>,
}

impl EndSignalReceiver {
    pub fn new(terminator: Arc<dyn ProcessTerminator>) -> Self {
        Self {
            listener: Mutex::new(None),
            terminator,
        }
    }

    /// Install (or clear) the termination back-reference. `None` is legal.
    pub fn set_termination_listener(&self, listener: Option<Weak<dyn TerminationListener>>) {
        *self.listener.lock().unwrap() = listener;
    }

    /// Handle the end-test signal: notify the listener if one is bound, then
    /// kill the process. The kill is unconditional — it happens even when no
    /// listener was wired up yet.
    pub fn on_signal(&self) {
        info!("end-test signal received");
        let listener = self.listener.lock().unwrap().clone();
        match listener.as_ref().and_then(Weak::upgrade) {
            Some(listener) => listener.on_run_end(),
            None => debug!("end-test signal with no termination listener bound"),
        }
        self.terminator.terminate();
    }
}

/// Registry of named signal channels.
///
/// Channels are addressable by a fixed name; delivery is payload-free —
/// receipt alone is the signal.
#[derive(Default)]
pub struct SignalHub {
    receivers: Mutex<HashMap<String, Arc<EndSignalReceiver>>>,
}

impl SignalHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, channel: &str, receiver: Arc<EndSignalReceiver>) {
        debug!(channel, "signal receiver registered");
        self.receivers
            .lock()
            .unwrap()
            .insert(channel.to_string(), receiver);
    }

    /// Deliver the signal on `channel`. Returns false when no receiver is
    /// registered there.
    pub fn deliver(&self, channel: &str) -> bool {
        let receiver = self.receivers.lock().unwrap().get(channel).cloned();
        match receiver {
            Some(receiver) => {
                receiver.on_signal();
                true
            }
            None => false,
        }
    }
}
