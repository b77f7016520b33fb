use crate::api::{ApiReply, TransportError};
use crate::records::{FinalStatus, ProcessRecord, StatusSample};
use crate::worker::RunContext;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// A classified failure of a single endpoint call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFailure {
    pub status: FinalStatus,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct PollOutcome {
    /// Last status text the endpoint reported, if any parsed
    pub last_status: Option<String>,
    pub final_status: FinalStatus,
    pub elapsed: Duration,
    pub attempts: u32,
    pub success: bool,
}

fn transport_status(err: &TransportError) -> FinalStatus {
    match err {
        TransportError::Timeout(_) => FinalStatus::RequestTimeout,
        TransportError::Connect(_) | TransportError::Other(_) => FinalStatus::ConnectionError,
    }
}

/// Reads a string (or numeric) field from a JSON body.
fn json_field(reply: &ApiReply, field: &str) -> Result<String, String> {
    let body: serde_json::Value =
        serde_json::from_slice(&reply.body).map_err(|e| format!("malformed body: {e}"))?;
    match body.get(field) {
        Some(serde_json::Value::String(s)) => Ok(s.clone()),
        Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(format!("field `{field}` has unexpected value {other}")),
        None => Err(format!("field `{field}` missing from response")),
    }
}

/// Triggers one background job and returns its process identifier.
///
/// A `ProcessRecord` is appended whatever the outcome.
pub async fn trigger_job(ctx: &RunContext, token: &str) -> Result<String, CallFailure> {
    let start = Instant::now();
    let reply = ctx.api.trigger_job(token).await;
    let latency = start.elapsed();

    let (bytes_sent, bytes_received, outcome) = match reply {
        Ok(reply) if reply.is_ok() => {
            let outcome = json_field(&reply, &ctx.config.trigger.process_id_field).map_err(
                |detail| CallFailure {
                    status: FinalStatus::InvalidJson,
                    detail,
                },
            );
            (reply.bytes_sent, reply.bytes_received, outcome)
        }
        Ok(reply) => (
            reply.bytes_sent,
            reply.bytes_received,
            Err(CallFailure {
                status: FinalStatus::HttpError(reply.status),
                detail: format!("trigger returned HTTP {}", reply.status),
            }),
        ),
        Err(e) => (
            0,
            0,
            Err(CallFailure {
                status: transport_status(&e),
                detail: e.to_string(),
            }),
        ),
    };

    ctx.recorder.push_process(ProcessRecord {
        process_id: outcome.as_ref().ok().cloned(),
        latency,
        bytes_sent,
        bytes_received,
        success: outcome.is_ok(),
        final_status: match &outcome {
            Ok(_) => FinalStatus::Completed,
            Err(failure) => failure.status.clone(),
        },
    });

    match &outcome {
        Ok(process_id) => debug!(process_id = %process_id, "Job triggered"),
        Err(failure) => warn!("Trigger failed: {} ({})", failure.status, failure.detail),
    }
    outcome
}

/// Polls the status endpoint until the job reaches the terminal status, an
/// error occurs, or `max_checks` reads have been made.
///
/// Elapsed time and byte counters cover every read and every sleep in
/// between. Exactly one `StatusSample` is appended per call.
pub async fn poll_status(ctx: &RunContext, token: &str, process_id: &str) -> PollOutcome {
    let status_cfg = &ctx.config.status;
    let interval = ctx.config.poll_interval();
    let start = Instant::now();

    let mut attempts = 0u32;
    let mut bytes_sent = 0u64;
    let mut bytes_received = 0u64;
    let mut last_status: Option<String> = None;

    let final_status = loop {
        attempts += 1;
        match ctx.api.job_status(token, process_id).await {
            Err(e) => {
                warn!(process_id, attempt = attempts, "Status request failed: {}", e);
                break transport_status(&e);
            }
            Ok(reply) => {
                bytes_sent += reply.bytes_sent;
                bytes_received += reply.bytes_received;

                if !reply.is_ok() {
                    warn!(process_id, attempt = attempts, "Status returned HTTP {}", reply.status);
                    break FinalStatus::HttpError(reply.status);
                }
                match json_field(&reply, &status_cfg.status_field) {
                    Ok(status) => {
                        let terminal = status == status_cfg.terminal_status;
                        last_status = Some(status);
                        if terminal {
                            break FinalStatus::Completed;
                        }
                    }
                    Err(detail) => {
                        warn!(process_id, attempt = attempts, "Invalid status payload: {}", detail);
                        break FinalStatus::InvalidJson;
                    }
                }
            }
        }

        if attempts >= status_cfg.max_checks {
            let last = last_status.clone().unwrap_or_default();
            warn!(process_id, attempts, "Status checks exhausted, last status {}", last);
            break FinalStatus::Timeout { last };
        }
        sleep(interval).await;
    };

    let elapsed = start.elapsed();
    let success = final_status.is_completed();

    ctx.recorder.push_status(StatusSample {
        process_id: process_id.to_string(),
        elapsed,
        attempts,
        bytes_sent,
        bytes_received,
        last_status: last_status.clone(),
        final_status: final_status.clone(),
        success,
    });

    PollOutcome {
        last_status,
        final_status,
        elapsed,
        attempts,
        success,
    }
}
