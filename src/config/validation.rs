use crate::config::types::{
    Config, EngineConfig, OutputConfig, RetryConfig, ScanConfiguration, MAX_REQUESTS_PER_SECOND,
    MAX_TIMEOUT, MIN_REQUESTS_PER_SECOND,
};
use crate::robots::product_token;
use crate::ConfigError;

/// Longest pause a throttling host may impose (seconds)
const MAX_THROTTLE_PENALTY: u64 = 3600;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_scan_configuration(&config.scan)?;
    validate_engine_config(&config.engine)?;
    validate_retry_config(&config.retry)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates the per-scan parameters
///
/// Exposed separately because scan configurations may also arrive from the
/// API collaborator rather than from a config file.
pub fn validate_scan_configuration(config: &ScanConfiguration) -> Result<(), ConfigError> {
    // max_depth >= 0 is always true for u32, so no check needed

    if config.max_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "max_pages must be >= 1, got {}",
            config.max_pages
        )));
    }

    let rps = config.requests_per_second;
    if !(MIN_REQUESTS_PER_SECOND..=MAX_REQUESTS_PER_SECOND).contains(&rps) {
        return Err(ConfigError::Validation(format!(
            "requests_per_second must be between {} and {}, got {}",
            MIN_REQUESTS_PER_SECOND, MAX_REQUESTS_PER_SECOND, rps
        )));
    }

    let max_timeout = MAX_TIMEOUT.as_secs_f64();
    if !(config.timeout > 0.0 && config.timeout <= max_timeout) {
        return Err(ConfigError::Validation(format!(
            "timeout must be greater than 0 and at most {} seconds, got {}",
            max_timeout, config.timeout
        )));
    }

    validate_user_agent(&config.user_agent)?;

    Ok(())
}

/// Validates engine configuration
fn validate_engine_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > 100 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 100, got {}",
            config.workers
        )));
    }

    if config.max_body_bytes < 1024 {
        return Err(ConfigError::Validation(format!(
            "max_body_bytes must be >= 1024, got {}",
            config.max_body_bytes
        )));
    }

    if config.robots_timeout < 1 {
        return Err(ConfigError::Validation(
            "robots_timeout must be >= 1 second".to_string(),
        ));
    }

    if config.throttle_penalty > MAX_THROTTLE_PENALTY {
        return Err(ConfigError::Validation(format!(
            "throttle_penalty must be <= {} seconds, got {}",
            MAX_THROTTLE_PENALTY, config.throttle_penalty
        )));
    }

    Ok(())
}

/// Validates retry policy
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.attempts > 10 {
        return Err(ConfigError::Validation(format!(
            "retry attempts must be <= 10, got {}",
            config.attempts
        )));
    }

    if !config.multiplier.is_finite() || config.multiplier < 1.0 {
        return Err(ConfigError::Validation(format!(
            "retry multiplier must be >= 1.0, got {}",
            config.multiplier
        )));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates the user agent string
///
/// The leading product token is what robots.txt groups are matched against,
/// so it must be present and limited to token characters.
fn validate_user_agent(user_agent: &str) -> Result<(), ConfigError> {
    if user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if user_agent.starts_with(char::is_whitespace) {
        return Err(ConfigError::Validation(
            "user_agent cannot start with whitespace".to_string(),
        ));
    }

    let product = product_token(user_agent);

    if !product
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "user_agent product token must contain only letters, digits, '-' or '_', got '{}'",
            product
        )));
    }

    Ok(())
}
