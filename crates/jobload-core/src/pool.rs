use crate::records::WorkerResult;
use crate::worker::{supervise, RunContext};
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::{timeout_at, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct PoolReport {
    pub launched: usize,
    /// Worker results recorded when the pool stopped waiting
    pub completed: usize,
    pub timed_out: bool,
    /// Wall-clock time from launch until the pool stopped waiting
    pub duration: Duration,
}

/// Launches `run.threads` workers at once and waits for all of them, or
/// until the global timeout. Workers still running at the deadline are
/// detached, not cancelled; results they record later are not in the report.
pub async fn run_pool(ctx: &RunContext) -> PoolReport {
    let launched = ctx.config.run.threads as usize;
    let start = Instant::now();
    let deadline = start + ctx.config.global_timeout();

    info!("Launching {} workers against {}", launched, ctx.api.name());

    let mut set = JoinSet::new();
    let mut worker_ids: HashMap<Id, usize> = HashMap::with_capacity(launched);
    for worker_id in 0..launched {
        let handle = set.spawn(supervise(worker_id, ctx.clone()));
        worker_ids.insert(handle.id(), worker_id);
    }

    let mut timed_out = false;
    loop {
        match timeout_at(deadline, set.join_next_with_id()).await {
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(err))) => {
                record_failed_supervisor(ctx, worker_ids.get(&err.id()).copied(), &err)
            }
            Ok(None) => break,
            Err(_) => {
                timed_out = true;
                warn!(
                    "Global timeout of {:?} reached with {} workers still running",
                    ctx.config.global_timeout(),
                    set.len()
                );
                set.detach_all();
                break;
            }
        }
    }

    let duration = start.elapsed();
    let completed = ctx.recorder.worker_count();
    info!(
        "Pool finished: {}/{} workers reported in {:.2}s",
        completed,
        launched,
        duration.as_secs_f64()
    );

    PoolReport {
        launched,
        completed,
        timed_out,
        duration,
    }
}

/// A supervisor that died never recorded its worker; record the crash here
/// so every launched worker still has exactly one result.
fn record_failed_supervisor(ctx: &RunContext, worker_id: Option<usize>, err: &JoinError) {
    match worker_id {
        Some(worker_id) => {
            warn!(worker_id, "Worker supervisor failed: {}", err);
            ctx.recorder.push_worker(WorkerResult::crashed(
                worker_id,
                chrono::Utc::now(),
                format!("supervisor failed: {err}"),
            ));
        }
        None => warn!("Unknown worker supervisor failed: {}", err),
    }
}
