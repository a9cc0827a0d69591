//! Worker pool manager.
//!
//! Launches the workers, waits for every one of them to report ready, then
//! runs one dispatch loop per worker until the queue is drained. Worker exit
//! notices are watched the whole time: a worker that goes away before it was
//! told to aborts the run.
//!
//! A failure stops further dispatch, but workers already building are left
//! to finish their current target before everyone is told to exit.

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use parabuild_core::ipc::{Reply, Request};
use parabuild_core::{
    Error, Event, Launcher, LogStream, PoolSinks, PoolStreams, Result, Task, WorkerEndpoint,
    WorkerExit, WorkerId, WorkerOutput,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::{EventBus, TaskQueue, lock};

/// How long to wait for exit notices: of a worker whose channel closed, and
/// of the survivors once a run is aborted.
const DEFAULT_EXIT_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Launched, handshake pending.
    Created,
    /// Sent `ready`, nothing dispatched yet.
    Ready,
    /// Building a target.
    Busy,
    /// Between targets.
    Idle,
    Exited,
}

struct Worker {
    id: WorkerId,
    state: WorkerState,
    requests: mpsc::UnboundedSender<Request>,
}

/// State shared by the coordinating task and the dispatch loops.
struct Shared {
    queue: Mutex<TaskQueue>,
    workers: Mutex<Vec<Worker>>,
    /// Target each worker is building, or built last.
    current: Mutex<HashMap<WorkerId, String>>,
    /// Set on the first failure. Loops finish their exchange, then stop.
    aborted: AtomicBool,
}

impl Shared {
    fn set_state(&self, worker: WorkerId, state: WorkerState) {
        let mut workers = lock(&self.workers);
        if let Some(w) = workers.iter_mut().find(|w| w.id == worker) {
            trace!(worker = %worker, from = ?w.state, to = ?state, "Worker state");
            w.state = state;
        }
    }

    /// Ask every worker still running to exit. Delivery errors are ignored.
    fn send_exit_all(&self) {
        for worker in lock(&self.workers).iter() {
            if worker.state != WorkerState::Exited {
                debug!(worker = %worker.id, "Sending exit");
                let _ = worker.requests.send(Request::Exit);
            }
        }
    }

    fn running_workers(&self) -> usize {
        lock(&self.workers)
            .iter()
            .filter(|w| w.state != WorkerState::Exited)
            .count()
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    fn pop_task(&self) -> Result<Option<Task>> {
        if self.aborted.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let mut queue = lock(&self.queue);
        if queue.is_empty() {
            return Ok(None);
        }
        queue.pop_next().map(Some)
    }
}

/// Runs a queue to completion on a fixed number of workers.
pub struct WorkerPool {
    launcher: Arc<dyn Launcher>,
    bus: Arc<EventBus>,
    exit_grace: Duration,
}

impl WorkerPool {
    pub fn new(launcher: Arc<dyn Launcher>, bus: Arc<EventBus>) -> Self {
        Self {
            launcher,
            bus,
            exit_grace: DEFAULT_EXIT_GRACE,
        }
    }

    pub fn with_exit_grace(mut self, grace: Duration) -> Self {
        self.exit_grace = grace;
        self
    }

    /// Build every queued task on `min(queue.len(), concurrency)` workers.
    ///
    /// Returns the number of targets built. On error, surviving workers are
    /// asked to exit and given [`WorkerPool::with_exit_grace`] to do so
    /// before the error is returned.
    pub async fn run(&self, queue: TaskQueue, concurrency: usize) -> Result<usize> {
        let total = queue.len();
        let count = total.min(concurrency.max(1));
        if count == 0 {
            return Err(Error::NothingToBuild);
        }

        let shared = Shared {
            queue: Mutex::new(queue),
            workers: Mutex::new(Vec::with_capacity(count)),
            current: Mutex::new(HashMap::new()),
            aborted: AtomicBool::new(false),
        };

        let (sinks, mut streams) = PoolSinks::channel();
        let result = self
            .run_workers(&shared, sinks, &mut streams, total, count)
            .await;
        if let Err(e) = &result {
            info!(error = %e, "Aborting run");
            shared.send_exit_all();
            self.reap(&shared, &mut streams).await;
        }
        result.map(|()| total)
    }

    async fn run_workers(
        &self,
        shared: &Shared,
        sinks: PoolSinks,
        streams: &mut PoolStreams,
        total: usize,
        count: usize,
    ) -> Result<()> {
        info!(workers = count, "Forking workers");
        self.bus.publish(Event::Fork { count });

        let endpoints = self.launch_all(shared, &sinks, count).await?;
        drop(sinks);

        let ready = self.handshake(shared, endpoints, streams).await?;

        info!(targets = total, workers = count, "Dispatching");
        self.bus.publish(Event::StartAll {
            total,
            workers: count,
        });
        self.dispatch(shared, ready, streams).await?;

        self.bus.publish(Event::FinishAll);
        self.shutdown(shared, streams).await?;
        self.bus.publish(Event::Done);
        Ok(())
    }

    /// Launch all workers at once. Every worker that did start is registered,
    /// so it is told to exit even when another one failed to launch.
    async fn launch_all(
        &self,
        shared: &Shared,
        sinks: &PoolSinks,
        count: usize,
    ) -> Result<Vec<WorkerEndpoint>> {
        let launches = (0..count).map(|slot| {
            let id = WorkerId::new(slot as u32);
            async move { (id, self.launcher.launch(id, sinks.clone()).await) }
        });

        let mut endpoints = Vec::with_capacity(count);
        let mut failure = None;
        for (id, launched) in join_all(launches).await {
            match launched {
                Ok(endpoint) => {
                    debug!(worker = %id, launcher = self.launcher.name(), "Worker launched");
                    lock(&shared.workers).push(Worker {
                        id,
                        state: WorkerState::Created,
                        requests: endpoint.requests.clone(),
                    });
                    endpoints.push(endpoint);
                }
                Err(e) => {
                    debug!(worker = %id, error = %e, "Worker failed to launch");
                    failure.get_or_insert(e);
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(endpoints),
        }
    }

    /// Wait for `ready` from every worker, in whatever order they arrive.
    async fn handshake(
        &self,
        shared: &Shared,
        endpoints: Vec<WorkerEndpoint>,
        streams: &mut PoolStreams,
    ) -> Result<Vec<WorkerEndpoint>> {
        let mut ready = Vec::with_capacity(endpoints.len());
        let mut pending: FuturesUnordered<_> = endpoints
            .into_iter()
            .map(|mut endpoint| async move {
                let reply = endpoint.replies.recv().await;
                (reply, endpoint)
            })
            .collect();

        while !pending.is_empty() {
            tokio::select! {
                biased;

                Some(exit) = streams.exits.recv() => {
                    shared.set_state(exit.worker, WorkerState::Exited);
                    return Err(died(exit));
                }
                Some(chunk) = streams.output.recv() => {
                    self.forward_output(shared, chunk);
                }
                Some((reply, endpoint)) = pending.next() => match reply {
                    Some(Reply::Ready) => {
                        debug!(worker = %endpoint.id, "Worker ready");
                        shared.set_state(endpoint.id, WorkerState::Ready);
                        self.bus.publish(Event::WorkerReady { worker: endpoint.id });
                        ready.push(endpoint);
                    }
                    Some(other) => {
                        return Err(Error::Protocol(format!(
                            "worker {} sent {} before ready",
                            endpoint.id,
                            other.kind()
                        )));
                    }
                    None => return Err(self.await_exit(shared, endpoint.id, streams).await),
                },
                else => return Err(Error::Internal("worker channels closed during handshake".to_string())),
            }
        }

        Ok(ready)
    }

    /// Drain the queue with one loop per worker. Exit notices take priority
    /// over everything else.
    ///
    /// The first failure, a failed build or an unexpected exit, stops the
    /// queue. Loops still waiting on a result keep running until it arrives
    /// and the first failure is returned once all of them are done.
    async fn dispatch(
        &self,
        shared: &Shared,
        ready: Vec<WorkerEndpoint>,
        streams: &mut PoolStreams,
    ) -> Result<()> {
        let mut loops: FuturesUnordered<_> = ready
            .into_iter()
            .map(|endpoint| self.drain_queue(shared, endpoint))
            .collect();
        let mut failure: Option<Error> = None;

        while !loops.is_empty() {
            tokio::select! {
                biased;

                Some(exit) = streams.exits.recv() => {
                    shared.set_state(exit.worker, WorkerState::Exited);
                    shared.abort();
                    // An exit notice supersedes a disconnect.
                    if matches!(failure, None | Some(Error::Disconnected(_))) {
                        failure = Some(died(exit));
                    }
                }
                Some(chunk) = streams.output.recv() => {
                    self.forward_output(shared, chunk);
                }
                Some(result) = loops.next() => {
                    if let Err(e) = result {
                        shared.abort();
                        failure.get_or_insert(e);
                    }
                }
            }
        }

        match failure {
            None => Ok(()),
            Some(Error::Disconnected(worker)) => {
                Err(self.await_exit(shared, worker, streams).await)
            }
            Some(e) => Err(e),
        }
    }

    /// Feed one worker from the shared queue until it is empty or the run is
    /// aborted.
    async fn drain_queue(&self, shared: &Shared, endpoint: WorkerEndpoint) -> Result<()> {
        let WorkerEndpoint {
            id,
            requests,
            mut replies,
        } = endpoint;

        while let Some(task) = shared.pop_task()? {
            let target = task.target.clone();
            shared.set_state(id, WorkerState::Busy);
            lock(&shared.current).insert(id, target.clone());

            info!(worker = %id, build_target = %target, "Building");
            self.bus.publish(Event::StartOne {
                target: target.clone(),
                worker: id,
            });

            requests
                .send(Request::Build(task.into()))
                .map_err(|_| Error::Disconnected(id))?;

            match replies.recv().await {
                Some(Reply::Result(outcome)) => match outcome.error {
                    None => {
                        info!(worker = %id, build_target = %target, "Built");
                        shared.set_state(id, WorkerState::Idle);
                        self.bus.publish(Event::FinishOne { target, worker: id });
                    }
                    Some(cause) => return Err(Error::BuildFailed { target, cause }),
                },
                Some(Reply::Ready) => {
                    return Err(Error::Protocol(format!(
                        "worker {} sent ready while building {}",
                        id, target
                    )));
                }
                None => return Err(Error::Disconnected(id)),
            }
        }

        debug!(worker = %id, "Queue drained");
        Ok(())
    }

    /// Tell every worker to exit and wait until all of them have.
    async fn shutdown(&self, shared: &Shared, streams: &mut PoolStreams) -> Result<()> {
        shared.send_exit_all();

        while shared.running_workers() > 0 {
            tokio::select! {
                biased;

                exit = streams.exits.recv() => match exit {
                    Some(exit) => {
                        shared.set_state(exit.worker, WorkerState::Exited);
                        if !exit.is_clean() {
                            return Err(died(exit));
                        }
                        debug!(worker = %exit.worker, "Worker exited");
                    }
                    None => {
                        return Err(Error::Internal(format!(
                            "exit notices ended with {} worker(s) outstanding",
                            shared.running_workers()
                        )));
                    }
                },
                Some(chunk) = streams.output.recv() => {
                    self.forward_output(shared, chunk);
                }
            }
        }

        while let Ok(chunk) = streams.output.try_recv() {
            self.forward_output(shared, chunk);
        }
        Ok(())
    }

    /// After an abort: wait for the survivors' exit notices, at most the exit
    /// grace. Abnormal exits here are not reported again.
    async fn reap(&self, shared: &Shared, streams: &mut PoolStreams) {
        let deadline = tokio::time::sleep(self.exit_grace);
        tokio::pin!(deadline);

        while shared.running_workers() > 0 {
            tokio::select! {
                biased;

                exit = streams.exits.recv() => match exit {
                    Some(exit) => {
                        shared.set_state(exit.worker, WorkerState::Exited);
                        debug!(
                            worker = %exit.worker,
                            exit_status = ?exit.exit_status,
                            signal = ?exit.signal,
                            "Worker exited after abort"
                        );
                    }
                    None => break,
                },
                Some(chunk) = streams.output.recv() => {
                    self.forward_output(shared, chunk);
                }
                () = &mut deadline => {
                    debug!(
                        workers = shared.running_workers(),
                        "Workers still running after exit grace"
                    );
                    break;
                }
            }
        }
    }

    /// A worker's channel closed. Report its exit if the notice shows up in
    /// time, otherwise report the disconnect itself.
    async fn await_exit(
        &self,
        shared: &Shared,
        worker: WorkerId,
        streams: &mut PoolStreams,
    ) -> Error {
        match tokio::time::timeout(self.exit_grace, streams.exits.recv()).await {
            Ok(Some(exit)) => {
                shared.set_state(exit.worker, WorkerState::Exited);
                died(exit)
            }
            Ok(None) | Err(_) => {
                debug!(worker = %worker, "Worker disconnected without an exit notice");
                Error::Disconnected(worker)
            }
        }
    }

    /// Re-publish a chunk of worker output under the worker's current target.
    ///
    /// Output travels on the worker's pipes, apart from its replies. A chunk
    /// of target X that is read only after the same worker was handed its
    /// next target is tagged with that next target. Chunks of one stream
    /// are never reordered.
    fn forward_output(&self, shared: &Shared, chunk: WorkerOutput) {
        let target = lock(&shared.current).get(&chunk.worker).cloned();
        let Some(target) = target else {
            trace!(
                worker = %chunk.worker,
                bytes = chunk.data.len(),
                "Dropping output from idle worker"
            );
            return;
        };

        let event = match chunk.stream {
            LogStream::Stdout => Event::Stdout {
                target,
                data: chunk.data,
            },
            LogStream::Stderr => Event::Stderr {
                target,
                data: chunk.data,
            },
        };
        self.bus.publish(event);
    }
}

fn died(exit: WorkerExit) -> Error {
    debug!(
        worker = %exit.worker,
        exit_status = ?exit.exit_status,
        signal = ?exit.signal,
        "Worker died"
    );
    Error::WorkerDied {
        worker: exit.worker,
        exit_status: exit.exit_status,
        signal: exit.signal,
    }
}
