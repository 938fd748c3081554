//! covrun — supervised test runs with crash-safe coverage extraction.
//!
//! Launches a monitored target, waits for either of two racing termination
//! signals (the target's own teardown, or an external end-test signal), and
//! guarantees exactly one coverage dump is written before the hosting process
//! can be killed.

pub mod agent;
pub mod cli;
pub mod config;
pub mod controller;
pub mod harness;
pub mod launch;
pub mod monitored;
pub mod report;
pub mod run;
pub mod runlog;
pub mod signal;

pub use controller::Controller;
pub use launch::{LaunchError, TargetDescriptor};
pub use report::{CoverageArtifact, CoverageReporter, WriteError};
pub use run::{Run, RunState, TerminationListener};
