//! Test doubles: an event recorder and a launcher whose workers are tokio
//! tasks following a per-target script.

use async_trait::async_trait;
use bytes::Bytes;
use parabuild_core::ipc::{BuildOutcome, Reply, Request};
use parabuild_core::{
    Event, Launcher, LogStream, PoolSinks, Result, WorkerEndpoint, WorkerExit, WorkerId,
    WorkerOutput,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::EventBus;

/// Records every published event.
#[derive(Clone, Default)]
pub(crate) struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub(crate) fn attach(bus: &EventBus) -> Self {
        let log = Self::default();
        let sink = log.0.clone();
        bus.subscribe(move |event: &Event| sink.lock().unwrap().push(event.clone()));
        log
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn names(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().iter().map(Event::name).collect()
    }

    /// Worker that received `target`, if it was dispatched.
    pub(crate) fn worker_for(&self, target: &str) -> Option<WorkerId> {
        self.0.lock().unwrap().iter().find_map(|event| match event {
            Event::StartOne { target: t, worker } if t == target => Some(*worker),
            _ => None,
        })
    }
}

/// What a fake worker does when asked to build a target.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Succeed(Duration),
    /// Print to stdout, then succeed.
    Print(&'static str),
    Fail(&'static str),
    /// Exit the process mid-build with this status.
    Crash(i32),
    /// Succeed, then exit with this status shortly after, while idle.
    FinishThenExit(i32),
}

type Plan = Arc<dyn Fn(&str) -> Step + Send + Sync>;

pub(crate) struct FakeLauncher {
    plan: Plan,
    dead_on_arrival: HashMap<WorkerId, i32>,
    launched: Mutex<Vec<WorkerId>>,
    exit_requests: Arc<Mutex<Vec<WorkerId>>>,
}

impl FakeLauncher {
    pub(crate) fn new(plan: impl Fn(&str) -> Step + Send + Sync + 'static) -> Self {
        Self {
            plan: Arc::new(plan),
            dead_on_arrival: HashMap::new(),
            launched: Mutex::new(Vec::new()),
            exit_requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn succeeding() -> Self {
        Self::new(|_| Step::Succeed(Duration::ZERO))
    }

    /// Make worker `slot` exit with `status` before sending `ready`.
    pub(crate) fn dead_on_arrival(mut self, slot: u32, status: i32) -> Self {
        self.dead_on_arrival.insert(WorkerId::new(slot), status);
        self
    }

    pub(crate) fn launched(&self) -> Vec<WorkerId> {
        self.launched.lock().unwrap().clone()
    }

    /// Workers that were sent `exit`, in order.
    pub(crate) fn exit_requests(&self) -> Vec<WorkerId> {
        self.exit_requests.lock().unwrap().clone()
    }
}

fn exited(worker: WorkerId, status: i32) -> WorkerExit {
    WorkerExit {
        worker,
        exit_status: Some(status),
        signal: None,
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn launch(&self, worker: WorkerId, sinks: PoolSinks) -> Result<WorkerEndpoint> {
        self.launched.lock().unwrap().push(worker);

        let (endpoint, mut requests, replies) = WorkerEndpoint::pair(worker);
        let plan = self.plan.clone();
        let exit_requests = self.exit_requests.clone();
        let dead_on_arrival = self.dead_on_arrival.get(&worker).copied();

        tokio::spawn(async move {
            if let Some(status) = dead_on_arrival {
                let _ = sinks.exits.send(exited(worker, status));
                return;
            }

            let _ = replies.send(Reply::Ready);
            while let Some(request) = requests.recv().await {
                match request {
                    Request::Build(build) => {
                        let outcome = match plan(&build.target) {
                            Step::Succeed(delay) => {
                                tokio::time::sleep(delay).await;
                                BuildOutcome::success()
                            }
                            Step::Print(text) => {
                                let _ = sinks.output.send(WorkerOutput {
                                    worker,
                                    stream: LogStream::Stdout,
                                    data: Bytes::from_static(text.as_bytes()),
                                });
                                BuildOutcome::success()
                            }
                            Step::Fail(cause) => BuildOutcome::failure(cause),
                            Step::Crash(status) => {
                                let _ = sinks.exits.send(exited(worker, status));
                                return;
                            }
                            Step::FinishThenExit(status) => {
                                let _ = replies.send(Reply::Result(BuildOutcome::success()));
                                tokio::time::sleep(Duration::from_millis(50)).await;
                                let _ = sinks.exits.send(exited(worker, status));
                                return;
                            }
                        };
                        let _ = replies.send(Reply::Result(outcome));
                    }
                    Request::Exit => {
                        exit_requests.lock().unwrap().push(worker);
                        break;
                    }
                }
            }
            let _ = sinks.exits.send(exited(worker, 0));
        });

        Ok(endpoint)
    }
}
