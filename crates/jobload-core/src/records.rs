use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How a call or a whole worker ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinalStatus {
    Completed,
    HttpError(u16),
    InvalidJson,
    /// Status checks ran out while the job was still in `last`
    Timeout { last: String },
    RequestTimeout,
    ConnectionError,
    TokenError,
    Crashed,
}

impl FinalStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, FinalStatus::Completed)
    }
}

impl fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalStatus::Completed => write!(f, "Completed"),
            FinalStatus::HttpError(_) => write!(f, "HTTP Error"),
            FinalStatus::InvalidJson => write!(f, "Invalid JSON"),
            FinalStatus::Timeout { last } => write!(f, "Timeout - {}", last),
            FinalStatus::RequestTimeout => write!(f, "Request Timeout"),
            FinalStatus::ConnectionError => write!(f, "Connection Error"),
            FinalStatus::TokenError => write!(f, "Token Error"),
            FinalStatus::Crashed => write!(f, "Crashed"),
        }
    }
}

/// Stage that stopped a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    Token,
    Trigger,
    Status,
    Crash,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Token => "TokenFailure",
            ErrorCategory::Trigger => "TriggerFailure",
            ErrorCategory::Status => "StatusFailure",
            ErrorCategory::Crash => "WorkerCrash",
        };
        f.write_str(name)
    }
}

/// Byte counters and outcome shared by every endpoint sample.
pub trait Sample {
    fn succeeded(&self) -> bool;
    fn bytes_sent(&self) -> u64;
    fn bytes_received(&self) -> u64;
}

/// One network round-trip to the token endpoint. Cache hits are not sampled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSample {
    pub latency: Duration,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub process_id: Option<String>,
    pub latency: Duration,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub success: bool,
    pub final_status: FinalStatus,
}

/// Aggregate of every status check made for one process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSample {
    pub process_id: String,
    pub elapsed: Duration,
    pub attempts: u32,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub last_status: Option<String>,
    pub final_status: FinalStatus,
    pub success: bool,
}

macro_rules! impl_sample {
    ($($ty:ty),*) => {
        $(impl Sample for $ty {
            fn succeeded(&self) -> bool {
                self.success
            }

            fn bytes_sent(&self) -> u64 {
                self.bytes_sent
            }

            fn bytes_received(&self) -> u64 {
                self.bytes_received
            }
        })*
    };
}

impl_sample!(TokenSample, ProcessRecord, StatusSample);

/// Flat per-worker row for the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResult {
    pub worker_id: usize,
    pub started_at: DateTime<Utc>,
    pub total_time: Duration,
    pub token_from_cache: bool,
    pub token_latency: Duration,
    pub process_id: Option<String>,
    pub trigger_latency: Duration,
    pub status_elapsed: Duration,
    pub status_checks: u32,
    pub final_status: FinalStatus,
    pub success: bool,
    pub error_category: Option<ErrorCategory>,
    pub error: Option<String>,
}

impl WorkerResult {
    pub fn started(worker_id: usize) -> Self {
        Self {
            worker_id,
            started_at: Utc::now(),
            total_time: Duration::ZERO,
            token_from_cache: false,
            token_latency: Duration::ZERO,
            process_id: None,
            trigger_latency: Duration::ZERO,
            status_elapsed: Duration::ZERO,
            status_checks: 0,
            final_status: FinalStatus::Crashed,
            success: false,
            error_category: None,
            error: None,
        }
    }

    pub fn crashed(worker_id: usize, started_at: DateTime<Utc>, error: String) -> Self {
        Self {
            started_at,
            error_category: Some(ErrorCategory::Crash),
            error: Some(error),
            ..Self::started(worker_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_status_labels() {
        assert_eq!(FinalStatus::Completed.to_string(), "Completed");
        assert_eq!(FinalStatus::HttpError(503).to_string(), "HTTP Error");
        assert_eq!(FinalStatus::InvalidJson.to_string(), "Invalid JSON");
        assert_eq!(
            FinalStatus::Timeout {
                last: "Running".to_string()
            }
            .to_string(),
            "Timeout - Running"
        );
        assert!(FinalStatus::Completed.is_completed());
        assert!(!FinalStatus::Crashed.is_completed());
    }

    #[test]
    fn test_crashed_worker_result() {
        let result = WorkerResult::crashed(3, Utc::now(), "boom".to_string());
        assert_eq!(result.worker_id, 3);
        assert!(!result.success);
        assert_eq!(result.final_status, FinalStatus::Crashed);
        assert_eq!(result.error_category, Some(ErrorCategory::Crash));
        assert_eq!(result.error_category.unwrap().to_string(), "WorkerCrash");
        assert!(result.process_id.is_none());
    }
}
