//! Worker side of the scheduler protocol.
//!
//! A worker process connects back to the scheduler, announces itself with
//! `ready` and then answers each `build` with exactly one `result` until it
//! is told to `exit`.

use parabuild_core::ipc::{self, BuildOutcome, Reply, Request};
use parabuild_core::{Builder, Error, Result, RunId, WorkerId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Address of the scheduler's listener for this worker.
pub const IPC_ADDR_ENV: &str = "PARABUILD_IPC_ADDR";
/// Slot index of the worker.
pub const WORKER_ID_ENV: &str = "PARABUILD_WORKER_ID";
/// JSON-encoded [`WorkerContext`].
pub const WORKER_CONTEXT_ENV: &str = "PARABUILD_WORKER_CONTEXT";

/// Run-wide settings handed to every worker at spawn time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerContext {
    pub run_id: RunId,
    /// Directory target paths are resolved against.
    pub base_dir: PathBuf,
}

/// Everything a worker process reads from its environment.
#[derive(Debug, Clone)]
pub struct WorkerEnv {
    pub id: WorkerId,
    pub addr: String,
    pub context: WorkerContext,
}

impl WorkerEnv {
    pub fn from_env() -> Result<Self> {
        let addr = read_var(IPC_ADDR_ENV)?;
        let id = read_var(WORKER_ID_ENV)?
            .parse::<u32>()
            .map(WorkerId::new)
            .map_err(|e| Error::InvalidInput(format!("{}: {}", WORKER_ID_ENV, e)))?;
        let context = serde_json::from_str(&read_var(WORKER_CONTEXT_ENV)?)?;
        Ok(Self { id, addr, context })
    }
}

fn read_var(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| {
        Error::InvalidInput(format!(
            "{} is not set; the worker command is started by the scheduler",
            name
        ))
    })
}

/// Connect to the scheduler and serve build requests until told to exit.
pub async fn run_worker(env: &WorkerEnv, builder: &dyn Builder) -> Result<()> {
    let stream = TcpStream::connect(&env.addr).await?;
    stream.set_nodelay(true)?;
    info!(worker = %env.id, addr = %env.addr, builder = builder.name(), "Worker connected");

    let (reader, writer) = stream.into_split();
    serve(reader, writer, builder).await
}

/// Drive the worker side of the protocol over any byte stream.
///
/// Returns once an `exit` request arrives or the scheduler hangs up.
pub async fn serve<R, W>(reader: R, mut writer: W, builder: &dyn Builder) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    send(&mut writer, &Reply::Ready).await?;

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        match ipc::decode::<Request>(&line)? {
            Request::Build(request) => {
                debug!(build_target = %request.target, "Build requested");
                let outcome = match builder.build(&request.target, &request.params).await {
                    Ok(()) => BuildOutcome::success(),
                    Err(e) => {
                        info!(build_target = %request.target, error = %e, "Build failed");
                        BuildOutcome::failure(e.to_string())
                    }
                };
                send(&mut writer, &Reply::Result(outcome)).await?;
            }
            Request::Exit => {
                debug!("Exit requested");
                return Ok(());
            }
        }
    }

    debug!("Scheduler closed the connection");
    Ok(())
}

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, reply: &Reply) -> Result<()> {
    writer.write_all(&ipc::encode(reply)?).await?;
    writer.flush().await?;
    Ok(())
}
