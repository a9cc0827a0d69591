//! Launches workers as child processes.
//!
//! Each worker gets its own loopback listener. The child connects to it and
//! speaks the JSON-lines protocol over that connection, leaving its stdout
//! and stderr free for build output, which is forwarded in raw chunks.

use async_trait::async_trait;
use bytes::Bytes;
use parabuild_core::ipc::{self, Reply, Request};
use parabuild_core::{
    Error, Launcher, LogStream, PoolSinks, Result, WorkerEndpoint, WorkerExit, WorkerId,
    WorkerOutput,
};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::worker::{IPC_ADDR_ENV, WORKER_CONTEXT_ENV, WORKER_ID_ENV, WorkerContext};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
// How long to wait for a dead worker's pipes to drain before reporting its exit.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const READ_CHUNK: usize = 8192;

/// Starts workers by running a program (normally the current executable
/// with the hidden `worker` subcommand).
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    context: WorkerContext,
    force_color: bool,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, context: WorkerContext) -> Self {
        Self {
            program: program.into(),
            args: vec!["worker".to_string()],
            context,
            force_color: false,
        }
    }

    /// Re-execute the running binary as the worker.
    pub fn current_exe(context: WorkerContext) -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?, context))
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Ask build tools in the worker to keep colored output even though
    /// their stdout is a pipe.
    pub fn with_force_color(mut self, force: bool) -> Self {
        self.force_color = force;
        self
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn launch(&self, worker: WorkerId, sinks: PoolSinks) -> Result<WorkerEndpoint> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env(IPC_ADDR_ENV, addr.to_string())
            .env(WORKER_ID_ENV, worker.to_string())
            .env(WORKER_CONTEXT_ENV, serde_json::to_string(&self.context)?)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if self.force_color {
            cmd.env("CLICOLOR_FORCE", "1").env("FORCE_COLOR", "1");
        }

        let mut child = cmd.spawn().map_err(|e| Error::Spawn {
            worker,
            message: format!("{}: {}", self.program.display(), e),
        })?;
        debug!(worker = %worker, pid = ?child.id(), addr = %addr, "Worker process spawned");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("worker stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("worker stderr not captured".to_string()))?;

        let stdout_pump = tokio::spawn(pump_output(
            worker,
            LogStream::Stdout,
            stdout,
            sinks.output.clone(),
        ));
        let stderr_pump = tokio::spawn(pump_output(
            worker,
            LogStream::Stderr,
            stderr,
            sinks.output.clone(),
        ));

        let accepted = tokio::time::timeout(CONNECT_TIMEOUT, async {
            tokio::select! {
                accepted = listener.accept() => Ok(accepted),
                status = child.wait() => Err(status),
            }
        })
        .await;

        let stream = match accepted {
            Ok(Ok(Ok((stream, _)))) => stream,
            Ok(Ok(Err(e))) => {
                return Err(Error::Spawn {
                    worker,
                    message: format!("accepting worker connection: {}", e),
                });
            }
            Ok(Err(status)) => {
                let exit = WorkerExit::from_status(worker, status?);
                return Err(Error::WorkerDied {
                    worker,
                    exit_status: exit.exit_status,
                    signal: exit.signal,
                });
            }
            Err(_) => {
                return Err(Error::Spawn {
                    worker,
                    message: format!("did not connect within {:?}", CONNECT_TIMEOUT),
                });
            }
        };
        stream.set_nodelay(true)?;

        let exits = sinks.exits.clone();
        tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => WorkerExit::from_status(worker, status),
                Err(e) => {
                    error!(worker = %worker, error = %e, "Failed to wait for worker");
                    WorkerExit {
                        worker,
                        exit_status: None,
                        signal: None,
                    }
                }
            };

            // Flush remaining output ahead of the exit notice.
            let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
                let _ = stdout_pump.await;
                let _ = stderr_pump.await;
            })
            .await;
            if drained.is_err() {
                debug!(worker = %worker, "Worker output still open after exit");
            }

            debug!(
                worker = %worker,
                exit_status = ?exit.exit_status,
                signal = ?exit.signal,
                "Worker process exited"
            );
            let _ = exits.send(exit);
        });

        let (endpoint, requests, replies) = WorkerEndpoint::pair(worker);
        let (read_half, write_half) = stream.into_split();
        tokio::spawn(read_replies(worker, read_half, replies));
        tokio::spawn(write_requests(worker, write_half, requests));

        Ok(endpoint)
    }
}

async fn read_replies(
    worker: WorkerId,
    reader: OwnedReadHalf,
    replies: mpsc::UnboundedSender<Reply>,
) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match ipc::decode::<Reply>(&line) {
                    Ok(reply) => {
                        trace!(worker = %worker, kind = reply.kind(), "Received reply");
                        if replies.send(reply).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(worker = %worker, error = %e, "Dropping worker connection");
                        break;
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(worker = %worker, error = %e, "Worker connection read failed");
                break;
            }
        }
    }
}

async fn write_requests(
    worker: WorkerId,
    mut writer: OwnedWriteHalf,
    mut requests: mpsc::UnboundedReceiver<Request>,
) {
    while let Some(request) = requests.recv().await {
        let line = match ipc::encode(&request) {
            Ok(line) => line,
            Err(e) => {
                error!(worker = %worker, error = %e, "Failed to encode request");
                break;
            }
        };
        trace!(worker = %worker, kind = request.kind(), "Sending request");
        if let Err(e) = writer.write_all(&line).await {
            debug!(worker = %worker, error = %e, "Worker connection write failed");
            break;
        }
        let _ = writer.flush().await;
    }
}

/// Forward raw output chunks until the pipe closes.
///
/// Keeps reading after the receiver is gone so the child never blocks on a
/// full pipe.
async fn pump_output<R: AsyncRead + Unpin>(
    worker: WorkerId,
    stream: LogStream,
    mut reader: R,
    sink: mpsc::UnboundedSender<WorkerOutput>,
) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let _ = sink.send(WorkerOutput {
                    worker,
                    stream,
                    data: Bytes::copy_from_slice(&buf[..n]),
                });
            }
            Err(e) => {
                warn!(worker = %worker, stream = ?stream, error = %e, "Worker output read failed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parabuild_core::RunId;

    fn context() -> WorkerContext {
        WorkerContext {
            run_id: RunId::new(),
            base_dir: std::env::temp_dir(),
        }
    }

    #[tokio::test]
    async fn test_pump_output_forwards_chunks() {
        let (sinks, mut streams) = PoolSinks::channel();
        let input: &[u8] = b"hello\nworld\n";

        pump_output(WorkerId::new(2), LogStream::Stderr, input, sinks.output.clone()).await;
        drop(sinks);

        let mut collected = Vec::new();
        while let Some(chunk) = streams.output.recv().await {
            assert_eq!(chunk.worker, WorkerId::new(2));
            assert_eq!(chunk.stream, LogStream::Stderr);
            collected.extend_from_slice(&chunk.data);
        }
        assert_eq!(collected, b"hello\nworld\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_worker_exiting_before_connect() {
        let launcher = ProcessLauncher::new("/bin/sh", context())
            .with_args(vec!["-c".to_string(), "echo early; exit 3".to_string()]);
        let (sinks, mut streams) = PoolSinks::channel();

        let err = launcher.launch(WorkerId::new(0), sinks).await.unwrap_err();
        match err {
            Error::WorkerDied {
                worker,
                exit_status,
                ..
            } => {
                assert_eq!(worker, WorkerId::new(0));
                assert_eq!(exit_status, Some(3));
            }
            other => panic!("Expected WorkerDied, got {:?}", other),
        }

        let chunk = streams.output.recv().await.unwrap();
        assert_eq!(chunk.stream, LogStream::Stdout);
        assert_eq!(&chunk.data[..], b"early\n");
    }

    #[tokio::test]
    async fn test_missing_program() {
        let launcher = ProcessLauncher::new("/nonexistent/parabuild-worker", context());
        let (sinks, _streams) = PoolSinks::channel();

        let err = launcher.launch(WorkerId::new(1), sinks).await.unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }
}
