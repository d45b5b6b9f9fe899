use crate::config::types::{
    Config, EmbeddingConfig, MetricsConfig, OutputConfig, SchedulerConfig, SourceConfig,
    UserAgentConfig,
};
use crate::state::MAX_WAIT;
use crate::ConfigError;
use std::collections::HashSet;
use std::net::SocketAddr;
use url::Url;

/// Furthest back a fresh source may start, in days
pub const MAX_DAYS_BACK: u32 = 36_500;

/// Validates the entire configuration
///
/// # Arguments
///
/// * `config` - A parsed configuration
///
/// # Returns
///
/// * `Ok(())` - Every section is within bounds
/// * `Err(ConfigError::Validation)` - The first problem found
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_scheduler_config(&config.scheduler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    if let Some(metrics) = &config.metrics {
        validate_metrics_config(metrics)?;
    }
    if let Some(embedding) = &config.embedding {
        validate_embedding_config(embedding)?;
    }
    validate_sources(&config.sources)?;
    Ok(())
}

fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.poll_interval_secs < 1 {
        return Err(ConfigError::Validation(
            "poll_interval_secs must be >= 1".to_string(),
        ));
    }

    if config.poll_interval_secs > MAX_WAIT.as_secs() {
        return Err(ConfigError::Validation(format!(
            "poll_interval_secs must be <= {}, got {}",
            MAX_WAIT.as_secs(),
            config.poll_interval_secs
        )));
    }

    if config.backoff_max_secs > MAX_WAIT.as_secs() {
        return Err(ConfigError::Validation(format!(
            "backoff_max_secs must be <= {}, got {}",
            MAX_WAIT.as_secs(),
            config.backoff_max_secs
        )));
    }

    if config.backoff_initial_secs < 1 {
        return Err(ConfigError::Validation(
            "backoff_initial_secs must be >= 1".to_string(),
        ));
    }

    if config.backoff_max_secs < config.backoff_initial_secs {
        return Err(ConfigError::Validation(format!(
            "backoff_max_secs ({}) must be >= backoff_initial_secs ({})",
            config.backoff_max_secs, config.backoff_initial_secs
        )));
    }

    if config.max_transient_retries > 10 {
        return Err(ConfigError::Validation(format!(
            "max_transient_retries must be between 0 and 10, got {}",
            config.max_transient_retries
        )));
    }

    if config.page_size < 1 || config.page_size > 100 {
        return Err(ConfigError::Validation(format!(
            "page_size must be between 1 and 100, got {}",
            config.page_size
        )));
    }

    Ok(())
}

fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.client_name.is_empty() {
        return Err(ConfigError::Validation(
            "client_name cannot be empty".to_string(),
        ));
    }

    if !config
        .client_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "client_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.client_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_metrics_config(config: &MetricsConfig) -> Result<(), ConfigError> {
    config.listen_addr.parse::<SocketAddr>().map_err(|e| {
        ConfigError::Validation(format!(
            "Invalid metrics listen_addr '{}': {}",
            config.listen_addr, e
        ))
    })?;
    Ok(())
}

fn validate_embedding_config(config: &EmbeddingConfig) -> Result<(), ConfigError> {
    if config.dimension == 0 || config.dimension > 4096 {
        return Err(ConfigError::Validation(format!(
            "embedding dimension must be between 1 and 4096, got {}",
            config.dimension
        )));
    }
    Ok(())
}

/// Validates source entries and rejects duplicate names
fn validate_sources(sources: &[SourceConfig]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();

    for source in sources {
        validate_source_name(&source.name)?;

        if !names.insert(source.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate source name '{}'",
                source.name
            )));
        }

        // Surfaces missing owner/repo/tag
        source.target()?;

        for (field, value) in [
            ("owner", &source.owner),
            ("repo", &source.repo),
            ("tag", &source.tag),
            ("site", &source.site),
        ] {
            if let Some(value) = value {
                validate_path_segment(&source.name, field, value)?;
            }
        }

        validate_endpoint(&source.name, source.endpoint())?;

        if source.days_back < 1 || source.days_back > MAX_DAYS_BACK {
            return Err(ConfigError::Validation(format!(
                "Source '{}': days_back must be between 1 and {}, got {}",
                source.name, MAX_DAYS_BACK, source.days_back
            )));
        }

        match source.poll_interval_secs {
            Some(secs) if secs < 1 || secs > MAX_WAIT.as_secs() => {
                return Err(ConfigError::Validation(format!(
                    "Source '{}': poll_interval_secs must be between 1 and {}, got {}",
                    source.name,
                    MAX_WAIT.as_secs(),
                    secs
                )));
            }
            _ => {}
        }
    }

    Ok(())
}

fn validate_source_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::Validation(
            "source name cannot be empty".to_string(),
        ));
    }

    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(ConfigError::Validation(format!(
            "source name '{}' may only contain alphanumerics, '-', '_' and '.'",
            name
        )));
    }

    Ok(())
}

/// Owner, repo and tag end up in request paths and query strings
fn validate_path_segment(source: &str, field: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() || value.contains('/') || value.chars().any(char::is_whitespace) {
        return Err(ConfigError::Validation(format!(
            "Source '{}': {} '{}' must be a single non-empty segment",
            source, field, value
        )));
    }
    Ok(())
}

fn validate_endpoint(source: &str, endpoint: &str) -> Result<(), ConfigError> {
    let url = Url::parse(endpoint).map_err(|e| {
        ConfigError::InvalidUrl(format!(
            "Source '{}': invalid endpoint '{}': {}",
            source, endpoint, e
        ))
    })?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::Validation(format!(
            "Source '{}': endpoint '{}' must use http or https",
            source, endpoint
        )));
    }

    Ok(())
}
