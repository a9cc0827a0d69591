//! Run orchestrator - turns a list of tasks into one complete build run.

use parabuild_core::{Error, Event, Launcher, Result, RunId, Task};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, info, info_span};

use crate::{EventBus, TaskQueue, WorkerPool};

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: RunId,
    pub built: usize,
    pub elapsed: Duration,
}

/// Orchestrates one build run: queue population and the worker pool.
///
/// Everything observable about the run is published on the bus; subscribe a
/// [`crate::Progress`] there to follow completion.
pub struct BuildOrchestrator {
    launcher: Arc<dyn Launcher>,
    bus: Arc<EventBus>,
    concurrency: usize,
    filter: Vec<String>,
    run_id: RunId,
}

impl BuildOrchestrator {
    pub fn new(launcher: Arc<dyn Launcher>, bus: Arc<EventBus>) -> Self {
        Self {
            launcher,
            bus,
            concurrency: 1,
            filter: Vec::new(),
            run_id: RunId::new(),
        }
    }

    /// Maximum number of workers. Values below one are treated as one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Only build these targets. Empty means all.
    pub fn with_filter(mut self, filter: Vec<String>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub async fn run(&self, tasks: Vec<Task>) -> Result<RunSummary> {
        let span = info_span!("run", run_id = %self.run_id);
        self.run_inner(tasks).instrument(span).await
    }

    async fn run_inner(&self, tasks: Vec<Task>) -> Result<RunSummary> {
        let started = Instant::now();
        info!(concurrency = self.concurrency, "Initializing builder");
        self.bus.publish(Event::Init);

        let mut queue = TaskQueue::new();
        queue.populate(tasks, &self.filter, &self.bus)?;
        if queue.is_empty() {
            return Err(Error::NothingToBuild);
        }

        let pool = WorkerPool::new(self.launcher.clone(), self.bus.clone());
        let built = pool.run(queue, self.concurrency).await?;

        let elapsed = started.elapsed();
        info!(built, elapsed_ms = elapsed.as_millis() as u64, "All builds completed");
        Ok(RunSummary {
            run_id: self.run_id,
            built,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Progress;
    use crate::testing::{EventLog, FakeLauncher, Step};
    use parabuild_core::BuildParams;

    fn tasks(names: &[&str]) -> Vec<Task> {
        names
            .iter()
            .map(|n| Task::new(*n, BuildParams::default()))
            .collect()
    }

    fn orchestrator(launcher: &Arc<FakeLauncher>) -> (BuildOrchestrator, EventLog) {
        let bus = Arc::new(EventBus::new());
        let log = EventLog::attach(&bus);
        (BuildOrchestrator::new(launcher.clone(), bus), log)
    }

    #[tokio::test]
    async fn test_full_run() {
        let launcher = Arc::new(FakeLauncher::succeeding());
        let (orchestrator, log) = orchestrator(&launcher);
        let orchestrator = orchestrator.with_concurrency(2);
        let progress = Progress::new();
        orchestrator.bus.subscribe(progress.clone());

        let summary = orchestrator.run(tasks(&["a", "b", "c"])).await.unwrap();
        assert_eq!(summary.built, 3);
        assert_eq!(summary.run_id, orchestrator.run_id());

        let names = log.names();
        assert_eq!(
            &names[..5],
            &["init", "enqueue", "enqueue", "enqueue", "fork"]
        );
        assert_eq!(names.last(), Some(&"done"));

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.completed, 3);
        assert_eq!(snapshot.running, 0);
        assert_eq!(snapshot.remaining, Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_nothing_to_build_never_launches() {
        let launcher = Arc::new(FakeLauncher::succeeding());
        let (orchestrator, log) = orchestrator(&launcher);
        let orchestrator = orchestrator.with_filter(vec!["missing".to_string()]);

        let err = orchestrator.run(tasks(&["a", "b"])).await.unwrap_err();
        assert!(matches!(err, Error::NothingToBuild));
        assert_eq!(err.exit_code(), 15);
        assert!(launcher.launched().is_empty());
        assert_eq!(log.names(), vec!["init", "skip", "skip"]);
    }

    #[tokio::test]
    async fn test_no_tasks_at_all() {
        let launcher = Arc::new(FakeLauncher::succeeding());
        let (orchestrator, _log) = orchestrator(&launcher);

        let err = orchestrator.run(Vec::new()).await.unwrap_err();
        assert!(matches!(err, Error::NothingToBuild));
        assert!(launcher.launched().is_empty());
    }

    #[tokio::test]
    async fn test_filter_limits_run() {
        let launcher = Arc::new(FakeLauncher::succeeding());
        let (orchestrator, log) = orchestrator(&launcher);
        let orchestrator = orchestrator
            .with_concurrency(4)
            .with_filter(vec!["b".to_string()]);

        let summary = orchestrator.run(tasks(&["a", "b", "c"])).await.unwrap();
        assert_eq!(summary.built, 1);
        assert_eq!(launcher.launched().len(), 1);
        assert_eq!(log.worker_for("a"), None);
        assert_eq!(log.worker_for("b"), Some(parabuild_core::WorkerId::new(0)));
    }

    #[tokio::test]
    async fn test_duplicate_targets_rejected() {
        let launcher = Arc::new(FakeLauncher::succeeding());
        let (orchestrator, _log) = orchestrator(&launcher);

        let err = orchestrator.run(tasks(&["a", "a"])).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(err.exit_code(), 127);
    }

    #[tokio::test]
    async fn test_failure_propagates() {
        let launcher = Arc::new(FakeLauncher::new(|_| Step::Fail("boom")));
        let (orchestrator, _log) = orchestrator(&launcher);

        let err = orchestrator.run(tasks(&["a"])).await.unwrap_err();
        assert_eq!(err.to_string(), "Build of target \"a\" failed: boom");
    }

    #[test]
    fn test_concurrency_floor() {
        let launcher = Arc::new(FakeLauncher::succeeding());
        let (orchestrator, _log) = orchestrator(&launcher);
        assert_eq!(orchestrator.with_concurrency(0).concurrency, 1);
    }
}
