use crate::config::{Config, TriggerMethod};
use anyhow::{Context, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;

/// Raw answer of one endpoint call, before any classification.
#[derive(Debug, Clone)]
pub struct ApiReply {
    pub status: u16,
    pub body: Bytes,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl ApiReply {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

pub type ApiFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ApiReply, TransportError>> + Send + 'a>>;

/// The three endpoints a worker talks to.
pub trait JobApi: Send + Sync {
    fn name(&self) -> &'static str;

    fn request_token(&self) -> ApiFuture<'_>;

    fn trigger_job<'a>(&'a self, token: &'a str) -> ApiFuture<'a>;

    fn job_status<'a>(&'a self, token: &'a str, process_id: &'a str) -> ApiFuture<'a>;
}

/// Client over HTTPS, authenticated with a PKCS12 client certificate.
pub struct HttpJobApi {
    client: reqwest::Client,
    config: Config,
}

impl HttpJobApi {
    pub fn new(config: &Config) -> Result<Self> {
        let archive = std::fs::read(&config.tls.cert_path).with_context(|| {
            format!("Failed to read client certificate {:?}", config.tls.cert_path)
        })?;
        let identity = reqwest::Identity::from_pkcs12_der(&archive, &config.tls.cert_password)
            .context("Failed to load PKCS12 client identity")?;

        let client = reqwest::Client::builder()
            .use_native_tls()
            .identity(identity)
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<ApiReply, TransportError> {
        let request = request.build()?;
        let bytes_sent = request_size(&request);

        let response = self.client.execute(request).await?;
        let status = response.status().as_u16();
        let head = response_head_size(&response);
        let body = response.bytes().await?;

        Ok(ApiReply {
            status,
            bytes_received: head + body.len() as u64,
            body,
            bytes_sent,
        })
    }
}

impl JobApi for HttpJobApi {
    fn name(&self) -> &'static str {
        "http"
    }

    fn request_token(&self) -> ApiFuture<'_> {
        Box::pin(async move {
            let token = &self.config.token;
            let mut form = vec![
                ("grant_type", "client_credentials"),
                ("client_id", token.client_id.as_str()),
                ("client_secret", token.client_secret.as_str()),
            ];
            if let Some(scope) = token.scope.as_deref() {
                form.push(("scope", scope));
            }
            self.send(self.client.post(&token.url).form(&form)).await
        })
    }

    fn trigger_job<'a>(&'a self, token: &'a str) -> ApiFuture<'a> {
        Box::pin(async move {
            let trigger = &self.config.trigger;
            let request = match trigger.method {
                TriggerMethod::Post => self.client.post(&trigger.url),
                TriggerMethod::Get => self.client.get(&trigger.url),
            };
            self.send(request.bearer_auth(token)).await
        })
    }

    fn job_status<'a>(&'a self, token: &'a str, process_id: &'a str) -> ApiFuture<'a> {
        Box::pin(async move {
            let url = self.config.status.url_for(process_id);
            self.send(self.client.get(url).bearer_auth(token)).await
        })
    }
}

fn request_size(request: &reqwest::Request) -> u64 {
    let line = request.method().as_str().len()
        + request.url().as_str().len()
        + " HTTP/1.1\r\n".len();
    let headers: usize = request
        .headers()
        .iter()
        .map(|(name, value)| name.as_str().len() + value.len() + 4)
        .sum();
    let body = request
        .body()
        .and_then(|b| b.as_bytes())
        .map_or(0, |b| b.len());
    (line + headers + body) as u64
}

/// Length of `HTTP/1.1 <code> <reason>\r\n` for the given status.
fn status_line_len(status: reqwest::StatusCode) -> usize {
    let reason = status.canonical_reason().unwrap_or("");
    format!("HTTP/1.1 {} {}\r\n", status.as_u16(), reason).len()
}

fn response_head_size(response: &reqwest::Response) -> u64 {
    let line = status_line_len(response.status());
    let headers: usize = response
        .headers()
        .iter()
        .map(|(name, value)| name.as_str().len() + value.len() + 4)
        .sum();
    (line + headers) as u64
}

/// In-process stand-in for the three endpoints: every call succeeds after
/// `delay`, and each process reports `pending_checks` non-terminal statuses
/// before completing. Response fields follow the configuration.
pub struct MockJobApi {
    delay: Duration,
    pending_checks: u64,
    process_id_field: String,
    status_field: String,
    terminal_status: String,
    next_process: AtomicU64,
    status_reads: parking_lot::Mutex<HashMap<String, u64>>,
}

impl MockJobApi {
    pub fn new(config: &Config, delay: Duration, pending_checks: u64) -> Self {
        Self {
            delay,
            pending_checks,
            process_id_field: config.trigger.process_id_field.clone(),
            status_field: config.status.status_field.clone(),
            terminal_status: config.status.terminal_status.clone(),
            next_process: AtomicU64::new(1),
            status_reads: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn reply(&self, body: serde_json::Value) -> ApiReply {
        let body = Bytes::from(body.to_string());
        ApiReply {
            status: 200,
            bytes_sent: 64,
            bytes_received: body.len() as u64,
            body,
        }
    }

    fn field_reply(&self, field: &str, value: String) -> ApiReply {
        let mut body = serde_json::Map::new();
        body.insert(field.to_string(), serde_json::Value::String(value));
        self.reply(serde_json::Value::Object(body))
    }
}

impl JobApi for MockJobApi {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn request_token(&self) -> ApiFuture<'_> {
        Box::pin(async move {
            sleep(self.delay).await;
            Ok(self.reply(serde_json::json!({
                "access_token": "mock-token",
                "token_type": "Bearer",
            })))
        })
    }

    fn trigger_job<'a>(&'a self, _token: &'a str) -> ApiFuture<'a> {
        Box::pin(async move {
            sleep(self.delay).await;
            let id = self.next_process.fetch_add(1, Ordering::Relaxed);
            Ok(self.field_reply(&self.process_id_field, format!("mock-{id}")))
        })
    }

    fn job_status<'a>(&'a self, _token: &'a str, process_id: &'a str) -> ApiFuture<'a> {
        Box::pin(async move {
            sleep(self.delay).await;
            let reads = {
                let mut reads = self.status_reads.lock();
                let count = reads.entry(process_id.to_string()).or_insert(0);
                *count += 1;
                *count
            };
            let status = if reads > self.pending_checks {
                self.terminal_status.as_str()
            } else {
                "Running"
            };
            Ok(self.field_reply(&self.status_field, status.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_mock_api_completes_after_pending_checks() {
        let config = crate::config::test_config();
        let api = MockJobApi::new(&config, Duration::from_millis(5), 2);

        let token = api.request_token().await.unwrap();
        assert!(token.is_ok());

        let trigger = api.trigger_job("t").await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&trigger.body).unwrap();
        let pid = body["processId"].as_str().unwrap().to_string();
        assert_eq!(pid, "mock-1");

        let mut statuses = Vec::new();
        for _ in 0..3 {
            let reply = api.job_status("t", &pid).await.unwrap();
            let body: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
            statuses.push(body["status"].as_str().unwrap().to_string());
        }
        assert_eq!(statuses, vec!["Running", "Running", "Completed"]);
    }

    #[test]
    fn test_status_line_len_follows_status() {
        use reqwest::StatusCode;

        assert_eq!(status_line_len(StatusCode::OK), "HTTP/1.1 200 OK\r\n".len());
        assert_eq!(
            status_line_len(StatusCode::INTERNAL_SERVER_ERROR),
            "HTTP/1.1 500 Internal Server Error\r\n".len()
        );
        assert_eq!(
            status_line_len(StatusCode::from_u16(599).unwrap()),
            "HTTP/1.1 599 \r\n".len()
        );
    }

    #[test]
    fn test_http_api_requires_certificate() {
        let mut config = crate::config::test_config();
        config.tls.cert_path = "does/not/exist.p12".into();
        let err = HttpJobApi::new(&config).err().unwrap();
        assert!(err.to_string().contains("client certificate"));
    }
}
