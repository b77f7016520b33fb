use crate::records::{ProcessRecord, StatusSample, TokenSample, WorkerResult};
use parking_lot::Mutex;

/// Everything recorded during a run.
#[derive(Debug, Clone, Default)]
pub struct Collections {
    pub tokens: Vec<TokenSample>,
    pub processes: Vec<ProcessRecord>,
    pub statuses: Vec<StatusSample>,
    pub workers: Vec<WorkerResult>,
}

/// Result collections shared by all workers behind a single lock.
///
/// The lock is taken for the append only; callers finish their network
/// calls before recording.
#[derive(Debug, Default)]
pub struct Recorder {
    inner: Mutex<Collections>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_token(&self, sample: TokenSample) {
        self.inner.lock().tokens.push(sample);
    }

    pub fn push_process(&self, record: ProcessRecord) {
        self.inner.lock().processes.push(record);
    }

    pub fn push_status(&self, sample: StatusSample) {
        self.inner.lock().statuses.push(sample);
    }

    pub fn push_worker(&self, result: WorkerResult) {
        self.inner.lock().workers.push(result);
    }

    pub fn worker_count(&self) -> usize {
        self.inner.lock().workers.len()
    }

    /// Copy of the collections as they are right now.
    pub fn snapshot(&self) -> Collections {
        self.inner.lock().clone()
    }
}
