//! Target process launch layer.
//!
//! The harness drives the target through two narrow traits: `TargetLauncher`
//! starts it, `TargetHandle` waits for it. The real implementation spawns a
//! plain child process; tests substitute fakes that exit on demand.

use std::io;
use std::process::{Child, Command, Stdio};

use thiserror::Error;
use tracing::info;

/// How to start the monitored target.
#[derive(Debug, Clone)]
pub struct TargetDescriptor {
    /// The program to execute.
    pub program: String,
    /// Arguments to pass to the program.
    pub args: Vec<String>,
    /// Working directory for the target process.
    pub work_dir: String,
    /// Environment variables to set (key, value pairs).
    pub env: Vec<(String, String)>,
}

/// Failures starting the target. Fatal: surfaced from `Controller::start`
/// and never retried.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to spawn target '{program}'")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("run was already started")]
    AlreadyStarted,
}

/// Starts a target process from a descriptor.
pub trait TargetLauncher: Send + Sync {
    fn launch(&self, descriptor: &TargetDescriptor) -> Result<Box<dyn TargetHandle>, LaunchError>;
}

/// A running target the harness can wait on.
pub trait TargetHandle: Send {
    /// Block until the target exits. Returns the exit code when the platform
    /// exposes one.
    fn wait(&mut self) -> io::Result<Option<i32>>;
}

impl std::fmt::Debug for dyn TargetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TargetHandle")
    }
}

/// Real launcher: spawns the target as a child process with inherited stdio.
pub struct ProcessLauncher;

impl TargetLauncher for ProcessLauncher {
    fn launch(&self, descriptor: &TargetDescriptor) -> Result<Box<dyn TargetHandle>, LaunchError> {
        let mut cmd = Command::new(&descriptor.program);
        cmd.args(&descriptor.args)
            .current_dir(&descriptor.work_dir)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        for (key, val) in &descriptor.env {
            cmd.env(key, val);
        }

        info!(
            program = %descriptor.program,
            work_dir = %descriptor.work_dir,
            "launching monitored target"
        );

        let child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            program: descriptor.program.clone(),
            source,
        })?;

        Ok(Box::new(ChildHandle { child }))
    }
}

struct ChildHandle {
    child: Child,
}

impl TargetHandle for ChildHandle {
    fn wait(&mut self) -> io::Result<Option<i32>> {
        let status = self.child.wait()?;
        Ok(status.code())
    }
}
