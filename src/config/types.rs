use crate::record::SourceKind;
use crate::state::BackoffPolicy;
use crate::ConfigError;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

/// Default public GitHub REST endpoint
pub const DEFAULT_GITHUB_ENDPOINT: &str = "https://api.github.com";

/// Default public StackExchange API endpoint
pub const DEFAULT_STACKEXCHANGE_ENDPOINT: &str = "https://api.stackexchange.com";

/// Main configuration structure for Poll-Ingest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub embedding: Option<EmbeddingConfig>,
    #[serde(default, rename = "source")]
    pub sources: Vec<SourceConfig>,
}

/// Polling and backoff behavior shared by every source
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between polls of the same source
    #[serde(rename = "poll-interval-secs")]
    pub poll_interval_secs: u64,

    /// First backoff delay after a rate limit or exhausted retries
    #[serde(rename = "backoff-initial-secs")]
    pub backoff_initial_secs: u64,

    /// Upper bound for the exponential backoff delay
    #[serde(rename = "backoff-max-secs")]
    pub backoff_max_secs: u64,

    /// How many times a transient fetch error is retried inside one cycle
    #[serde(rename = "max-transient-retries")]
    pub max_transient_retries: u32,

    /// How long in-flight cycles may run after a shutdown signal
    #[serde(rename = "shutdown-timeout-secs")]
    pub shutdown_timeout_secs: u64,

    /// Items requested per page
    #[serde(rename = "page-size")]
    pub page_size: u32,
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_secs(self.backoff_initial_secs),
            Duration::from_secs(self.backoff_max_secs),
        )
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            backoff_initial_secs: 5,
            backoff_max_secs: 900,
            max_transient_retries: 3,
            shutdown_timeout_secs: 10,
            page_size: 100,
        }
    }
}

/// Client identification sent with every API request
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    #[serde(rename = "client-name")]
    pub client_name: String,

    #[serde(rename = "client-version")]
    pub client_version: String,

    /// URL with information about the client operator
    #[serde(rename = "contact-url")]
    pub contact_url: String,
}

impl UserAgentConfig {
    /// Format: ClientName/Version (+ContactURL)
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{})",
            self.client_name, self.client_version, self.contact_url
        )
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Metrics exposition endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(rename = "listen-addr")]
    pub listen_addr: String,
}

/// Optional vector generation for stored records
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    pub dimension: usize,
}

/// One configured source to poll
#[derive(Clone, Deserialize)]
pub struct SourceConfig {
    /// Unique name, used as the metrics label and cursor key
    pub name: String,

    pub kind: SourceKind,

    /// Repository owner (GitHub)
    #[serde(default)]
    pub owner: Option<String>,

    /// Repository name (GitHub)
    #[serde(default)]
    pub repo: Option<String>,

    /// Question tag (StackExchange)
    #[serde(default)]
    pub tag: Option<String>,

    /// StackExchange site parameter, defaults to "stackoverflow"
    #[serde(default)]
    pub site: Option<String>,

    /// API base URL, defaults to the public endpoint for `kind`
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub token: Option<String>,

    /// Environment variable holding the token
    #[serde(default, rename = "token-env")]
    pub token_env: Option<String>,

    /// Initial "since" window for a source without a stored cursor
    #[serde(default = "default_days_back", rename = "days-back")]
    pub days_back: u32,

    /// Per-source override of the scheduler interval
    #[serde(default, rename = "poll-interval-secs")]
    pub poll_interval_secs: Option<u64>,
}

fn default_days_back() -> u32 {
    90
}

/// What a source polls, derived from the structured config fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceTarget {
    Repository { owner: String, repo: String },
    Tag { tag: String, site: String },
}

impl SourceConfig {
    /// Resolves the structured target for this source
    pub fn target(&self) -> Result<SourceTarget, ConfigError> {
        match self.kind {
            SourceKind::GitHub => match (&self.owner, &self.repo) {
                (Some(owner), Some(repo)) => Ok(SourceTarget::Repository {
                    owner: owner.clone(),
                    repo: repo.clone(),
                }),
                _ => Err(ConfigError::Validation(format!(
                    "source '{}' of kind github requires both owner and repo",
                    self.name
                ))),
            },
            SourceKind::StackOverflow => match &self.tag {
                Some(tag) => Ok(SourceTarget::Tag {
                    tag: tag.clone(),
                    site: self
                        .site
                        .clone()
                        .unwrap_or_else(|| "stackoverflow".to_string()),
                }),
                None => Err(ConfigError::Validation(format!(
                    "source '{}' of kind stackexchange requires a tag",
                    self.name
                ))),
            },
        }
    }

    pub fn endpoint(&self) -> &str {
        match (&self.endpoint, self.kind) {
            (Some(endpoint), _) => endpoint.as_str(),
            (None, SourceKind::GitHub) => DEFAULT_GITHUB_ENDPOINT,
            (None, SourceKind::StackOverflow) => DEFAULT_STACKEXCHANGE_ENDPOINT,
        }
    }

    /// Returns the literal token, or the value of `token-env` if set
    pub fn resolve_token(&self) -> Option<String> {
        if let Some(token) = &self.token {
            return Some(token.clone());
        }

        let var = self.token_env.as_ref()?;
        match std::env::var(var) {
            Ok(value) if !value.is_empty() => Some(value),
            _ => {
                tracing::warn!(source = %self.name, "token-env {} is not set, polling unauthenticated", var);
                None
            }
        }
    }

    pub fn poll_interval(&self, scheduler: &SchedulerConfig) -> Duration {
        self.poll_interval_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| scheduler.poll_interval())
    }

    /// Hash of the fields that define which items this source yields.
    ///
    /// A stored cursor is only reused when its fingerprint matches, so editing
    /// a source's target restarts it from its `days-back` window.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.kind.to_db_string().as_bytes());
        for part in [&self.owner, &self.repo, &self.tag, &self.site] {
            hasher.update(b"\x1f");
            hasher.update(part.as_deref().unwrap_or("").as_bytes());
        }
        hasher.update(b"\x1f");
        hasher.update(self.endpoint().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(self.days_back.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

// Tokens stay out of logs.
impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("tag", &self.tag)
            .field("site", &self.site)
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("token_env", &self.token_env)
            .field("days_back", &self.days_back)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .finish()
    }
}
