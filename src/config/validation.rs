use crate::config::types::{
    ChallengeConfig, Config, CrawlerConfig, FetchConfig, PoolConfig, RobotsConfig,
};
use crate::ConfigError;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_pool_config(&config.pool)?;
    validate_fetch_config(&config.fetch)?;
    validate_challenge_config(&config.challenge)?;
    validate_crawler_config(&config.crawler)?;
    validate_robots_config(&config.robots)?;
    Ok(())
}

fn validate_pool_config(config: &PoolConfig) -> Result<(), ConfigError> {
    if config.capacity < 1 || config.capacity > 64 {
        return Err(ConfigError::Validation(format!(
            "pool capacity must be between 1 and 64, got {}",
            config.capacity
        )));
    }

    if config.acquire_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "acquire-timeout-ms must be greater than 0".to_string(),
        ));
    }

    if config.max_session_uses < 1 {
        return Err(ConfigError::Validation(format!(
            "max-session-uses must be >= 1, got {}",
            config.max_session_uses
        )));
    }

    if config.max_session_failures < 1 {
        return Err(ConfigError::Validation(format!(
            "max-session-failures must be >= 1, got {}",
            config.max_session_failures
        )));
    }

    if config.creation_retries < 1 {
        return Err(ConfigError::Validation(format!(
            "creation-retries must be >= 1, got {}",
            config.creation_retries
        )));
    }

    if let Some(path) = &config.chrome_executable {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "chrome-executable cannot be empty".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if config.navigation_timeout_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "navigation-timeout-ms must be >= 100ms, got {}ms",
            config.navigation_timeout_ms
        )));
    }

    if config.action_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "action-timeout-ms must be greater than 0".to_string(),
        ));
    }

    if config.network_idle_ms == 0 {
        return Err(ConfigError::Validation(
            "network-idle-ms must be greater than 0".to_string(),
        ));
    }

    if config.network_idle_ms >= config.navigation_timeout_ms {
        return Err(ConfigError::Validation(format!(
            "network-idle-ms ({}) must be shorter than navigation-timeout-ms ({})",
            config.network_idle_ms, config.navigation_timeout_ms
        )));
    }

    if config.cache_capacity < 1 {
        return Err(ConfigError::Validation(
            "cache-capacity must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_challenge_config(config: &ChallengeConfig) -> Result<(), ConfigError> {
    if config.timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "challenge timeout-ms must be greater than 0".to_string(),
        ));
    }

    if config.poll_interval_ms == 0 || config.poll_interval_ms > config.timeout_ms {
        return Err(ConfigError::Validation(format!(
            "challenge poll-interval-ms must be between 1 and timeout-ms ({}), got {}",
            config.timeout_ms, config.poll_interval_ms
        )));
    }

    Ok(())
}

fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 64 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 64, got {}",
            config.concurrency
        )));
    }

    if config.idle_poll_ms == 0 {
        return Err(ConfigError::Validation(
            "idle-poll-ms must be greater than 0".to_string(),
        ));
    }

    if config.deadline_secs == Some(0) {
        return Err(ConfigError::Validation(
            "deadline-secs must be greater than 0 when set".to_string(),
        ));
    }

    Ok(())
}

fn validate_robots_config(config: &RobotsConfig) -> Result<(), ConfigError> {
    if config.fetch_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "robots fetch-timeout-ms must be greater than 0".to_string(),
        ));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "robots user-agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}
