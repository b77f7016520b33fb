use crate::actions::{poll_status, trigger_job, CallFailure};
use crate::api::JobApi;
use crate::config::Config;
use crate::recorder::Recorder;
use crate::records::{ErrorCategory, FinalStatus, WorkerResult};
use crate::token::TokenCache;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

/// Shared state handed to every worker.
#[derive(Clone)]
pub struct RunContext {
    pub config: Arc<Config>,
    pub api: Arc<dyn JobApi>,
    pub tokens: Arc<TokenCache>,
    pub recorder: Arc<Recorder>,
}

impl RunContext {
    pub fn new(config: Config, api: Arc<dyn JobApi>) -> Self {
        let tokens = Arc::new(TokenCache::new(config.token_ttl()));
        Self {
            config: Arc::new(config),
            api,
            tokens,
            recorder: Arc::new(Recorder::new()),
        }
    }
}

/// Why a worker stopped before its job completed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StageFailure {
    #[error("token unavailable: {0}")]
    Token(String),
    #[error("trigger failed with {}: {}", .0.status, .0.detail)]
    Trigger(CallFailure),
    #[error("job ended with {0}")]
    Status(FinalStatus),
}

impl StageFailure {
    pub fn category(&self) -> ErrorCategory {
        match self {
            StageFailure::Token(_) => ErrorCategory::Token,
            StageFailure::Trigger(_) => ErrorCategory::Trigger,
            StageFailure::Status(_) => ErrorCategory::Status,
        }
    }

    pub fn final_status(&self) -> FinalStatus {
        match self {
            StageFailure::Token(_) => FinalStatus::TokenError,
            StageFailure::Trigger(failure) => failure.status.clone(),
            StageFailure::Status(status) => status.clone(),
        }
    }
}

async fn execute(ctx: &RunContext, result: &mut WorkerResult) -> Result<(), StageFailure> {
    let token = ctx
        .tokens
        .get_token(ctx.api.as_ref(), &ctx.recorder)
        .await;
    result.token_from_cache = token.from_cache;
    result.token_latency = token.latency;
    let token = match token.token {
        Some(value) => value,
        None => {
            return Err(StageFailure::Token(
                token.error.unwrap_or_else(|| "no token".to_string()),
            ))
        }
    };

    let start = Instant::now();
    let process_id = trigger_job(ctx, &token).await;
    result.trigger_latency = start.elapsed();
    let process_id = process_id.map_err(StageFailure::Trigger)?;
    result.process_id = Some(process_id.clone());

    let poll = poll_status(ctx, &token, &process_id).await;
    result.status_elapsed = poll.elapsed;
    result.status_checks = poll.attempts;
    if !poll.success {
        return Err(StageFailure::Status(poll.final_status));
    }
    result.final_status = poll.final_status;
    Ok(())
}

/// Runs token, trigger and poll once and reports how far it got.
pub async fn run_worker(worker_id: usize, ctx: RunContext) -> WorkerResult {
    let start = Instant::now();
    let mut result = WorkerResult::started(worker_id);

    match execute(&ctx, &mut result).await {
        Ok(()) => {
            result.success = true;
            info!(worker_id, process_id = ?result.process_id, "Worker completed");
        }
        Err(failure) => {
            warn!(worker_id, "Worker failed: {}", failure);
            result.final_status = failure.final_status();
            result.error_category = Some(failure.category());
            result.error = Some(failure.to_string());
        }
    }

    result.total_time = start.elapsed();
    result
}

/// Runs a worker on its own task and records exactly one result for it,
/// including when the worker panics.
pub async fn supervise(worker_id: usize, ctx: RunContext) {
    let started_at = chrono::Utc::now();
    let handle = tokio::spawn(run_worker(worker_id, ctx.clone()));

    let result = match handle.await {
        Ok(result) => result,
        Err(err) => {
            warn!(worker_id, "Worker crashed: {}", err);
            WorkerResult::crashed(worker_id, started_at, format!("worker crashed: {err}"))
        }
    };
    ctx.recorder.push_worker(result);
}
