use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Placeholder substituted with the process identifier in `status.url_template`.
pub const PROCESS_ID_PLACEHOLDER: &str = "{process_id}";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub run: RunConfig,
    pub token: TokenConfig,
    pub trigger: TriggerConfig,
    pub status: StatusConfig,
    pub tls: TlsConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.run.threads == 0 {
            anyhow::bail!("run.threads must be at least 1");
        }
        if self.status.max_checks == 0 {
            anyhow::bail!("status.max_checks must be at least 1");
        }
        if self.token.ttl_ms == 0 {
            anyhow::bail!("token.ttl_ms must be non-zero");
        }
        if !self.status.url_template.contains(PROCESS_ID_PLACEHOLDER) {
            anyhow::bail!(
                "status.url_template must contain {} (got {})",
                PROCESS_ID_PLACEHOLDER,
                self.status.url_template
            );
        }
        Ok(())
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_millis(self.token.ttl_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.status.interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.http.timeout_ms)
    }

    pub fn global_timeout(&self) -> Duration {
        Duration::from_millis(self.run.global_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of concurrent workers; each runs the full flow once
    #[serde(default = "default_threads")]
    pub threads: u32,
    /// Ceiling on how long the pool waits for workers, in milliseconds
    #[serde(default = "default_global_timeout_ms")]
    pub global_timeout_ms: u64,
    /// Directory receiving the spreadsheet and JSON summary
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            global_timeout_ms: default_global_timeout_ms(),
            output_dir: default_output_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Token endpoint (client-credentials grant)
    pub url: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scope: Option<String>,
    /// Cached token lifetime in milliseconds
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TriggerMethod {
    #[default]
    Post,
    Get,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub url: String,
    #[serde(default)]
    pub method: TriggerMethod,
    /// JSON field of the trigger response holding the process identifier
    #[serde(default = "default_process_id_field")]
    pub process_id_field: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Status URL, `{process_id}` is replaced per request
    pub url_template: String,
    #[serde(default = "default_status_field")]
    pub status_field: String,
    #[serde(default = "default_terminal_status")]
    pub terminal_status: String,
    /// Sleep between status checks in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Maximum number of status reads per process, including the first one
    #[serde(default = "default_max_checks")]
    pub max_checks: u32,
}

impl StatusConfig {
    pub fn url_for(&self, process_id: &str) -> String {
        self.url_template.replace(PROCESS_ID_PLACEHOLDER, process_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PKCS12 archive holding the client certificate and key
    pub cert_path: PathBuf,
    pub cert_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout in milliseconds
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_http_timeout_ms(),
        }
    }
}

fn default_threads() -> u32 {
    10
}

fn default_global_timeout_ms() -> u64 {
    600_000
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_ttl_ms() -> u64 {
    20_000
}

fn default_process_id_field() -> String {
    "processId".to_string()
}

fn default_status_field() -> String {
    "status".to_string()
}

fn default_terminal_status() -> String {
    "Completed".to_string()
}

fn default_interval_ms() -> u64 {
    2_000
}

fn default_max_checks() -> u32 {
    30
}

fn default_http_timeout_ms() -> u64 {
    30_000
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    toml::from_str(
        r#"
[token]
url = "https://auth.test/token"
client_id = "client"
client_secret = "secret"

[trigger]
url = "https://jobs.test/trigger"

[status]
url_template = "https://jobs.test/status/{process_id}"

[tls]
cert_path = "client.p12"
cert_password = "changeit"
        "#,
    )
    .expect("test config parses")
}
