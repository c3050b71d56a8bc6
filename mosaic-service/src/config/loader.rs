//! Configuration loading from files and environment variables.

use config::{Config, Environment, File};

use crate::error::{ServiceError, ServiceResult};

use super::ServiceConfig;

/// Load configuration from `config.*` (optional) and `MOSAIC__*` env vars
pub fn load_config() -> ServiceResult<ServiceConfig> {
    let config: ServiceConfig = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix("MOSAIC")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to build config: {}", e),
        })?
        .try_deserialize()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to deserialize config: {}", e),
        })?;

    validate(&config)?;
    Ok(config)
}

/// Reject settings the service cannot run with
pub(crate) fn validate(config: &ServiceConfig) -> ServiceResult<()> {
    if config.streaming.channel_capacity == 0 {
        return Err(ServiceError::Config {
            message: "streaming.channel_capacity must be at least 1".to_string(),
        });
    }
    if config.generation.default_max_new_tokens == 0
        || config.generation.default_max_new_tokens > config.generation.max_new_tokens_limit
    {
        return Err(ServiceError::Config {
            message: format!(
                "generation.default_max_new_tokens must be between 1 and {}",
                config.generation.max_new_tokens_limit
            ),
        });
    }
    if !(0.0..=2.0).contains(&config.generation.default_temperature) {
        return Err(ServiceError::Config {
            message: "generation.default_temperature must be within [0, 2]".to_string(),
        });
    }
    if config.engine.model.trim().is_empty() {
        return Err(ServiceError::Config {
            message: "engine.model must not be empty".to_string(),
        });
    }
    Ok(())
}
