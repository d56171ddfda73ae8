//! ProcessBackend - 一つの job channel から供給される固定数の worker プロセス
//!
//! - `workers` 個の driver task が unbounded channel の受信側を共有
//! - 各 driver は子プロセスを高々一つ持ち、一度に一つの呼び出しを実行
//! - 子プロセスは最初の job で spawn し、失われたら次の job で再 spawn
//! - `shutdown` は sender を drop して driver を join する。キューに残った
//!   job には世代エラーを返す
//!
//! 呼び出しと応答は子プロセスの stdin/stdout 上の frame（`typed::codec`）で
//! 運ぶ。子の stderr は継承するのでログはそのまま見える。
//!
//! # 学習ポイント
//! - `Arc<tokio::sync::Mutex<Receiver>>` による work-stealing
//! - `kill_on_drop` と `try_wait` による子プロセスの後始末

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{WORKER_ENV, WorkerCommand};
use crate::domain::{Envelope, PoolId, TaskCall, WorkerReply};
use crate::error::ParallelError;
use crate::ports::WorkerBackend;
use crate::typed::codec::{read_frame_async, write_frame_async};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

struct Job {
    call: TaskCall,
    reply: oneshot::Sender<Result<Envelope, ParallelError>>,
}

type JobReceiver = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>>;

pub struct ProcessBackend {
    generation: PoolId,
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    drivers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    closing: Arc<AtomicBool>,
    workers: usize,
}

impl ProcessBackend {
    /// Start the drivers. No process is spawned until a job arrives.
    /// Must be called from within a Tokio runtime.
    pub fn start(generation: PoolId, command: WorkerCommand, workers: usize) -> Self {
        let workers = workers.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver: JobReceiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let closing = Arc::new(AtomicBool::new(false));
        let command = Arc::new(command);

        let drivers: Vec<JoinHandle<()>> = (0..workers)
            .map(|slot| {
                let driver = Driver {
                    slot,
                    generation,
                    command: Arc::clone(&command),
                    closing: Arc::clone(&closing),
                    process: None,
                };
                tokio::spawn(driver.run(Arc::clone(&receiver)))
            })
            .collect();

        debug!(%generation, workers, program = %command.program.display(), "process pool started");
        Self {
            generation,
            sender: Mutex::new(Some(sender)),
            drivers: tokio::sync::Mutex::new(drivers),
            closing,
            workers,
        }
    }
}

fn closed_error(generation: PoolId) -> ParallelError {
    ParallelError::PoolGeneration {
        found: generation,
        current: "shut down".to_string(),
    }
}

#[async_trait]
impl WorkerBackend for ProcessBackend {
    async fn execute(&self, call: TaskCall) -> Result<Envelope, ParallelError> {
        let (reply, answer) = oneshot::channel();
        {
            let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
            let sender = sender.as_ref().ok_or_else(|| closed_error(self.generation))?;
            sender
                .send(Job { call, reply })
                .map_err(|_| closed_error(self.generation))?;
        }
        // a driver that goes away drops the reply sender
        answer.await.map_err(|_| closed_error(self.generation))?
    }

    fn workers(&self) -> usize {
        self.workers
    }

    async fn shutdown(&self) {
        self.closing.store(true, Ordering::Release);
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        let drivers: Vec<_> = self.drivers.lock().await.drain(..).collect();
        for driver in drivers {
            if let Err(e) = driver.await {
                warn!(generation = %self.generation, error = %e, "pool driver ended abnormally");
            }
        }
        debug!(generation = %self.generation, "process pool stopped");
    }
}

struct Driver {
    slot: usize,
    generation: PoolId,
    command: Arc<WorkerCommand>,
    closing: Arc<AtomicBool>,
    process: Option<WorkerProcess>,
}

impl Driver {
    async fn run(mut self, jobs: JobReceiver) {
        loop {
            // the lock is released as soon as a job (or the end) arrives
            let job = { jobs.lock().await.recv().await };
            let Some(job) = job else { break };

            if self.closing.load(Ordering::Acquire) {
                let _ = job.reply.send(Err(closed_error(self.generation)));
                continue;
            }

            let result = self.run_call(&job.call).await;
            // the receiver may be gone (fail-fast reduce); the reply is dropped
            let _ = job.reply.send(result);
        }

        if let Some(process) = self.process.take() {
            process.close(self.slot).await;
        }
    }

    async fn run_call(&mut self, call: &TaskCall) -> Result<Envelope, ParallelError> {
        if self.process.is_none() {
            let process = WorkerProcess::spawn(&self.command).map_err(|e| ParallelError::WorkerLost {
                slot: self.slot,
                task: call.task.clone(),
                detail: format!("cannot start worker: {e}"),
            })?;
            debug!(slot = self.slot, pid = process.pid(), "worker process spawned");
            self.process = Some(process);
        }
        let result = match self.process.as_mut() {
            Some(process) => process.roundtrip(call).await,
            None => Err(ParallelError::Protocol("no worker process".to_string())),
        };

        match result {
            Ok(envelope) => Ok(envelope),
            Err(e) => {
                let detail = match self.process.take() {
                    Some(process) => process.kill(e).await,
                    None => e.to_string(),
                };
                warn!(slot = self.slot, task = %call.task, %detail, "worker lost");
                Err(ParallelError::WorkerLost {
                    slot: self.slot,
                    task: call.task.clone(),
                    detail,
                })
            }
        }
    }
}

struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl WorkerProcess {
    fn spawn(command: &WorkerCommand) -> Result<Self, ParallelError> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .env(WORKER_ENV, "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ParallelError::Protocol("worker stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ParallelError::Protocol("worker stdout not captured".to_string()))?;
        Ok(Self {
            child,
            stdin,
            stdout,
        })
    }

    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn roundtrip(&mut self, call: &TaskCall) -> Result<Envelope, ParallelError> {
        write_frame_async(&mut self.stdin, call).await?;
        match read_frame_async::<_, WorkerReply>(&mut self.stdout).await? {
            None => Err(ParallelError::Protocol(
                "worker closed its output".to_string(),
            )),
            Some(reply) if reply.call_id != call.call_id => Err(ParallelError::Protocol(format!(
                "reply for {} while waiting for {}",
                reply.call_id, call.call_id
            ))),
            Some(reply) => Ok(reply.result),
        }
    }

    /// Kill a broken worker, returning a description including its exit status.
    async fn kill(mut self, cause: ParallelError) -> String {
        let status = match self.child.try_wait() {
            Ok(Some(status)) => Some(status),
            _ => {
                let _ = self.child.kill().await;
                None
            }
        };
        match status {
            Some(status) => format!("{cause} ({status})"),
            None => cause.to_string(),
        }
    }

    /// Close stdin so the worker's serve loop ends, then reap it.
    async fn close(self, slot: usize) {
        let Self {
            mut child, stdin, ..
        } = self;
        drop(stdin);
        match tokio::time::timeout(CLOSE_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => debug!(slot, %status, "worker process exited"),
            Ok(Err(e)) => warn!(slot, error = %e, "cannot reap worker process"),
            Err(_) => {
                warn!(slot, "worker process did not exit, killing it");
                let _ = child.kill().await;
            }
        }
    }
}
