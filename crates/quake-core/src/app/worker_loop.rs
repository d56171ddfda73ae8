//! WorkerLoop - プロセス backend の子プロセス側
//!
//! # フロー
//! 1. 親から `TaskCall` frame を読む
//! 2. registry 経由で実行（失敗は失敗結果として返る）
//! 3. 同じ call id で `WorkerReply` frame を書く
//!
//! 親がストリームを閉じるとループは終わる。stdout は frame 専用なので、
//! worker のログはすべて stderr に出す。

use std::io::{Read, Write};

use tracing::{debug, warn};

use crate::app::safe_call::failure_envelope;
use crate::config::WORKER_ENV;
use crate::domain::{Monitor, TaskCall, TaskError, WorkerReply};
use crate::error::ParallelError;
use crate::typed::TaskRegistry;
use crate::typed::codec::{read_frame, write_frame};

/// Whether this process was launched as a pool worker.
pub fn is_worker_process() -> bool {
    std::env::var_os(WORKER_ENV).is_some_and(|v| !v.is_empty() && v != "0")
}

/// Serve calls until `reader` ends; returns the number of calls served.
pub fn serve<R: Read, W: Write>(
    registry: &TaskRegistry,
    mut reader: R,
    mut writer: W,
) -> Result<usize, ParallelError> {
    let mut served = 0;
    while let Some(call) = read_frame::<_, TaskCall>(&mut reader)? {
        debug!(task = %call.task, call = %call.call_id, "serving call");
        let result = match registry.call(&call) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(task = %call.task, error = %e, "cannot envelope the result");
                failure_envelope(TaskError::from_parallel(&e), Monitor::new(call.task.clone()))?
            }
        };
        write_frame(
            &mut writer,
            &WorkerReply {
                call_id: call.call_id,
                result,
            },
        )?;
        served += 1;
    }
    Ok(served)
}

/// Serve on stdin/stdout.
pub fn run_worker(registry: &TaskRegistry) -> Result<usize, ParallelError> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let served = serve(registry, stdin.lock(), stdout.lock())?;
    debug!(served, "worker input closed");
    Ok(served)
}
