//! Scripted `JobApi` for unit tests.

use crate::api::{ApiFuture, ApiReply, JobApi, TransportError};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub(crate) const CALL_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Http { status: u16, body: String },
    Fail(TransportError),
    Panic,
}

impl Reply {
    pub(crate) fn json(status: u16, body: &str) -> Self {
        Reply::Http {
            status,
            body: body.to_string(),
        }
    }

    pub(crate) fn status(value: &str) -> Self {
        Reply::Http {
            status: 200,
            body: format!(r#"{{"status":"{value}"}}"#),
        }
    }

    pub(crate) fn timeout() -> Self {
        Reply::Fail(TransportError::Timeout("deadline elapsed".to_string()))
    }
}

#[derive(Default)]
pub(crate) struct ScriptedApi {
    tokens: Mutex<VecDeque<Reply>>,
    triggers: Mutex<VecDeque<Reply>>,
    statuses: Mutex<VecDeque<Reply>>,
    token_calls: AtomicUsize,
    trigger_calls: AtomicUsize,
    status_calls: AtomicUsize,
}

impl ScriptedApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_tokens(self, replies: Vec<Reply>) -> Self {
        *self.tokens.lock() = replies.into();
        self
    }

    pub(crate) fn with_triggers(self, replies: Vec<Reply>) -> Self {
        *self.triggers.lock() = replies.into();
        self
    }

    pub(crate) fn with_statuses(self, replies: Vec<Reply>) -> Self {
        *self.statuses.lock() = replies.into();
        self
    }

    pub(crate) fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn trigger_calls(&self) -> usize {
        self.trigger_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    async fn answer(
        queue: &Mutex<VecDeque<Reply>>,
        fallback: Reply,
    ) -> Result<ApiReply, TransportError> {
        let reply = queue.lock().pop_front().unwrap_or(fallback);
        tokio::time::sleep(CALL_DELAY).await;
        match reply {
            Reply::Http { status, body } => Ok(ApiReply {
                status,
                bytes_sent: 10,
                bytes_received: body.len() as u64,
                body: Bytes::from(body),
            }),
            Reply::Fail(err) => Err(err),
            Reply::Panic => panic!("scripted panic"),
        }
    }
}

impl JobApi for ScriptedApi {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn request_token(&self) -> ApiFuture<'_> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(Self::answer(
            &self.tokens,
            Reply::json(200, r#"{"access_token":"token"}"#),
        ))
    }

    fn trigger_job<'a>(&'a self, _token: &'a str) -> ApiFuture<'a> {
        self.trigger_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(Self::answer(
            &self.triggers,
            Reply::json(200, r#"{"processId":"p-1"}"#),
        ))
    }

    fn job_status<'a>(&'a self, _token: &'a str, _process_id: &'a str) -> ApiFuture<'a> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(Self::answer(&self.statuses, Reply::status("Completed")))
    }
}
