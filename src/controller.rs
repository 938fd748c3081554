//! Instrumentation controller — the run orchestrator.
//!
//! Launches the monitored target, wires itself as the termination listener on
//! both the target proxy and the end-signal receiver, and converges the two
//! racing termination paths onto a single coverage dump and a single
//! completion report. The convergence point is `Run::try_begin_end`: whoever
//! loses that compare-and-set returns without doing anything.

use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, info, warn};

use crate::agent::AgentLocator;
use crate::harness::{CompletionReporter, RunStatus};
use crate::launch::{LaunchError, TargetDescriptor, TargetLauncher};
use crate::monitored::{CapabilityBroker, MonitoredTarget};
use crate::report::{CoverageArtifact, CoverageReporter};
use crate::run::{Run, TerminationListener};
use crate::runlog::{LogEvent, RunLog};
use crate::signal::EndSignalReceiver;

pub struct Controller {
    run: Run,
    reporter: CoverageReporter,
    locator: Arc<dyn AgentLocator>,
    harness: Arc<dyn CompletionReporter>,
    log: Option<Arc<RunLog>>,
    artifact: Mutex<Option<CoverageArtifact>>,
}

impl Controller {
    pub fn new(
        reporter: CoverageReporter,
        locator: Arc<dyn AgentLocator>,
        harness: Arc<dyn CompletionReporter>,
        log: Option<Arc<RunLog>>,
    ) -> Self {
        Self {
            run: Run::new(),
            reporter,
            locator,
            harness,
            log,
            artifact: Mutex::new(None),
        }
    }

    pub fn run(&self) -> &Run {
        &self.run
    }

    /// The artifact written for this run, once termination completed. At
    /// most one exists per run.
    pub fn artifact(&self) -> Option<CoverageArtifact> {
        self.artifact.lock().unwrap().clone()
    }

    /// Begin the run: launch the target and wire both termination sources
    /// back to this controller.
    ///
    /// Launch failure is fatal and propagated; a second call fails with
    /// `LaunchError::AlreadyStarted`.
    pub fn start(
        self: &Arc<Self>,
        launcher: &dyn TargetLauncher,
        broker: &dyn CapabilityBroker,
        receiver: &EndSignalReceiver,
        descriptor: &TargetDescriptor,
    ) -> Result<MonitoredTarget, LaunchError> {
        if !self.run.begin() {
            return Err(LaunchError::AlreadyStarted);
        }

        info!(run_id = %self.run.id(), program = %descriptor.program, "starting run");
        self.log_event(LogEvent::RunStarted {
            run_id: self.run.id().to_string(),
            program: descriptor.program.clone(),
        });

        let target = MonitoredTarget::launch(launcher, broker, descriptor)?;
        for capability in target.denied_capabilities() {
            self.log_event(LogEvent::CapabilityDenied {
                capability: capability.to_string(),
            });
        }
        self.log_event(LogEvent::TargetLaunched {
            program: descriptor.program.clone(),
            work_dir: descriptor.work_dir.clone(),
        });

        // Both sources hold only a weak back-reference; the controller is
        // never owned by its notifiers.
        let listener: Arc<dyn TerminationListener> = self.clone();
        let weak: Weak<dyn TerminationListener> = Arc::downgrade(&listener);
        target.set_termination_listener(Some(weak.clone()));
        receiver.set_termination_listener(Some(weak));

        Ok(target)
    }

    fn log_event(&self, event: LogEvent) {
        if let Some(log) = &self.log {
            if let Err(err) = log.log(event) {
                warn!(%err, "failed to write run log entry");
            }
        }
    }
}

impl TerminationListener for Controller {
    /// Converge the racing termination paths: first caller dumps coverage and
    /// reports completion, every later caller is a no-op.
    ///
    /// The coverage write stays synchronous on purpose — on the end-signal
    /// path the process is killed as soon as this returns. A failed write is
    /// logged and the run still reports success: the test verdict must not
    /// depend on reporting-infrastructure health.
    fn on_run_end(&self) {
        if !self.run.try_begin_end() {
            debug!(run_id = %self.run.id(), "duplicate termination notification ignored");
            return;
        }

        match self.reporter.write(self.locator.as_ref()) {
            Ok(artifact) => {
                info!(
                    path = %artifact.path.display(),
                    appended = artifact.appended,
                    "coverage artifact written"
                );
                self.log_event(LogEvent::CoverageWritten {
                    path: artifact.path.display().to_string(),
                    appended: artifact.appended,
                });
                *self.artifact.lock().unwrap() = Some(artifact);
            }
            Err(err) => {
                warn!(%err, "coverage extraction failed; run still reports success");
                self.log_event(LogEvent::CoverageFailed {
                    reason: err.to_string(),
                });
            }
        }

        self.run.mark_terminated();

        let status = RunStatus::Ok;
        self.log_event(LogEvent::RunCompleted {
            status: "ok".to_string(),
        });
        self.harness.report(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::NoAgent;
    use crate::launch::TargetHandle;
    use crate::monitored::Capability;
    use crate::run::RunState;
    use crate::signal::{ProcessTerminator, SignalHub};
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    struct InstantExit;

    impl TargetHandle for InstantExit {
        fn wait(&mut self) -> io::Result<Option<i32>> {
            Ok(Some(0))
        }
    }

    struct FakeLauncher;

    impl TargetLauncher for FakeLauncher {
        fn launch(
            &self,
            _descriptor: &TargetDescriptor,
        ) -> Result<Box<dyn TargetHandle>, LaunchError> {
            Ok(Box::new(InstantExit))
        }
    }

    struct BrokenLauncher;

    impl TargetLauncher for BrokenLauncher {
        fn launch(
            &self,
            descriptor: &TargetDescriptor,
        ) -> Result<Box<dyn TargetHandle>, LaunchError> {
            Err(LaunchError::Spawn {
                program: descriptor.program.clone(),
                source: io::Error::other("boom"),
            })
        }
    }

    struct GrantAll;

    impl CapabilityBroker for GrantAll {
        fn request(&self, wanted: &[Capability]) -> Vec<Capability> {
            wanted.to_vec()
        }
    }

    struct CountingReporter(AtomicUsize);

    impl CountingReporter {
        fn new() -> Arc<Self> {
            Arc::new(Self(AtomicUsize::new(0)))
        }

        fn reports(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    impl CompletionReporter for CountingReporter {
        fn report(&self, status: RunStatus) {
            assert_eq!(status, RunStatus::Ok);
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CountingTerminator(AtomicUsize);

    impl CountingTerminator {
        fn new() -> Arc<Self> {
            Arc::new(Self(AtomicUsize::new(0)))
        }

        fn calls(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    impl ProcessTerminator for CountingTerminator {
        fn terminate(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn descriptor() -> TargetDescriptor {
        TargetDescriptor {
            program: "target".to_string(),
            args: vec![],
            work_dir: ".".to_string(),
            env: vec![],
        }
    }

    fn controller(dir: &std::path::Path, harness: Arc<dyn CompletionReporter>) -> Arc<Controller> {
        Arc::new(Controller::new(
            CoverageReporter::new(dir),
            Arc::new(NoAgent),
            harness,
            None,
        ))
    }

    fn artifact_count(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry.file_name().to_string_lossy().starts_with("coverage-")
            })
            .count()
    }

    #[test]
    fn launch_failure_propagates() {
        let tmp = tempfile::tempdir().unwrap();
        let harness = CountingReporter::new();
        let controller = controller(tmp.path(), harness.clone());
        let terminator = CountingTerminator::new();
        let receiver = EndSignalReceiver::new(terminator);

        let err = controller
            .start(&BrokenLauncher, &GrantAll, &receiver, &descriptor())
            .unwrap_err();
        assert!(matches!(err, LaunchError::Spawn { .. }));
        assert_eq!(harness.reports(), 0);
        assert_eq!(artifact_count(tmp.path()), 0);
    }

    #[test]
    fn second_start_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let controller = controller(tmp.path(), CountingReporter::new());
        let receiver = EndSignalReceiver::new(CountingTerminator::new());

        controller
            .start(&FakeLauncher, &GrantAll, &receiver, &descriptor())
            .unwrap();
        let err = controller
            .start(&FakeLauncher, &GrantAll, &receiver, &descriptor())
            .unwrap_err();
        assert!(matches!(err, LaunchError::AlreadyStarted));
    }

    #[test]
    fn duplicate_run_end_writes_once() {
        let tmp = tempfile::tempdir().unwrap();
        let harness = CountingReporter::new();
        let controller = controller(tmp.path(), harness.clone());
        controller.run().begin();

        controller.on_run_end();
        controller.on_run_end();
        controller.on_run_end();

        assert_eq!(artifact_count(tmp.path()), 1);
        assert_eq!(harness.reports(), 1);
        assert_eq!(controller.run().state(), RunState::Terminated);
    }

    #[test]
    fn racing_run_end_callers_write_once() {
        let tmp = tempfile::tempdir().unwrap();
        let harness = CountingReporter::new();
        let controller = controller(tmp.path(), harness.clone());
        controller.run().begin();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let controller = controller.clone();
            handles.push(thread::spawn(move || controller.on_run_end()));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(artifact_count(tmp.path()), 1);
        assert_eq!(harness.reports(), 1);
    }

    #[test]
    fn write_failure_still_reports_success() {
        let tmp = tempfile::tempdir().unwrap();
        let harness = CountingReporter::new();
        // Report dir does not exist, so artifact creation fails.
        let controller = Arc::new(Controller::new(
            CoverageReporter::new(tmp.path().join("not-there")),
            Arc::new(NoAgent),
            harness.clone(),
            None,
        ));
        controller.run().begin();

        controller.on_run_end();

        assert_eq!(harness.reports(), 1);
        assert_eq!(controller.run().state(), RunState::Terminated);
    }

    #[test]
    fn end_signal_path_dumps_coverage_then_kills() {
        let tmp = tempfile::tempdir().unwrap();
        let harness = CountingReporter::new();
        let controller = controller(tmp.path(), harness.clone());
        let terminator = CountingTerminator::new();
        let receiver = Arc::new(EndSignalReceiver::new(terminator.clone()));
        let hub = SignalHub::new();
        hub.register("end-run", receiver.clone());

        let target = controller
            .start(&FakeLauncher, &GrantAll, receiver.as_ref(), &descriptor())
            .unwrap();

        assert!(hub.deliver("end-run"));

        assert_eq!(artifact_count(tmp.path()), 1);
        assert_eq!(harness.reports(), 1);
        assert_eq!(terminator.calls(), 1);

        // Late natural teardown after the signal path already won: no-op.
        target.notify_teardown();
        assert_eq!(artifact_count(tmp.path()), 1);
        assert_eq!(harness.reports(), 1);
    }

    #[test]
    fn natural_teardown_path_never_kills() {
        let tmp = tempfile::tempdir().unwrap();
        let harness = CountingReporter::new();
        let controller = controller(tmp.path(), harness.clone());
        let terminator = CountingTerminator::new();
        let receiver = EndSignalReceiver::new(terminator.clone());

        let target = controller
            .start(&FakeLauncher, &GrantAll, &receiver, &descriptor())
            .unwrap();

        assert_eq!(target.wait().unwrap(), Some(0));

        assert_eq!(artifact_count(tmp.path()), 1);
        assert_eq!(harness.reports(), 1);
        assert_eq!(terminator.calls(), 0);
        assert_eq!(controller.run().state(), RunState::Terminated);

        let artifact = controller.artifact().expect("artifact recorded on run");
        assert!(artifact.path.is_file());
        assert_eq!(artifact.appended, 0);
    }

    #[test]
    fn both_paths_firing_converge_on_one_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let harness = CountingReporter::new();
        let controller = controller(tmp.path(), harness.clone());
        let terminator = CountingTerminator::new();
        let receiver = Arc::new(EndSignalReceiver::new(terminator.clone()));

        let target = controller
            .start(&FakeLauncher, &GrantAll, receiver.as_ref(), &descriptor())
            .unwrap();

        // Natural teardown and the external signal race; both fire.
        target.wait().unwrap();
        receiver.on_signal();

        assert_eq!(artifact_count(tmp.path()), 1);
        assert_eq!(harness.reports(), 1);
        // The receiver path still kills the process even when it lost the race.
        assert_eq!(terminator.calls(), 1);
    }
}
