use std::path::Path;

use crate::config::schema::{tile_driver, Config, TILE_FORMATS};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Semantic checks the schema cannot express. Also applied to configs built
/// in code, which never pass through the schema.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if tile_driver(&config.tile_format).is_none() {
        let supported: Vec<&str> = TILE_FORMATS.iter().map(|(ext, _)| *ext).collect();
        return Err(ConfigError::Validation {
            message: format!(
                "tile_format must be one of {}, got '{}'",
                supported.join(", "),
                config.tile_format
            ),
        });
    }

    if !(config.base_url.starts_with("http://") || config.base_url.starts_with("https://")) {
        return Err(ConfigError::Validation {
            message: format!("base_url must be an http(s) URL, got '{}'", config.base_url),
        });
    }

    if config.poll_interval_ms == 0 || config.tile_size == 0 || config.processes == 0 {
        return Err(ConfigError::Validation {
            message: "poll_interval_ms, tile_size and processes must be positive".to_string(),
        });
    }

    let t = &config.timeouts;
    if [
        t.connect_secs,
        t.download_secs,
        t.georeference_secs,
        t.probe_secs,
        t.tiling_secs,
    ]
    .contains(&0)
    {
        return Err(ConfigError::Validation {
            message: "Timeouts must be at least one second".to_string(),
        });
    }

    for (name, candidates) in [
        ("translate", &config.tools.translate),
        ("info", &config.tools.info),
        ("tiler", &config.tools.tiler),
    ] {
        if candidates.iter().all(|c| c.trim().is_empty()) {
            return Err(ConfigError::Validation {
                message: format!("tools.{} needs at least one command", name),
            });
        }
    }

    Ok(())
}
