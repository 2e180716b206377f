//! KDL configuration parser

use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::model::*;

/// Parse a configuration file from the given path
pub fn parse_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Load the configuration, falling back to defaults when the file is absent.
///
/// Environment overrides are applied on top of whatever was loaded.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let mut config = if path.exists() {
        parse_config(path)?
    } else {
        tracing::info!(
            "No configuration at {}, using built-in defaults",
            path.display()
        );
        Config::default()
    };
    config.global.apply_env_overrides();
    Ok(config)
}

/// Parse configuration from a string
pub fn parse_config_str(content: &str) -> Result<Config, ConfigError> {
    let doc: kdl::KdlDocument = content.parse().map_err(|e: kdl::KdlError| {
        // kdl pins an older miette, so rebuild the span from offset/len
        let offset = e.span.offset();
        let len = e.span.len();
        let span = miette::SourceSpan::from((offset, len));
        ConfigError::ParseError {
            src: content.to_string(),
            span,
            source: e,
        }
    })?;

    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "global" => {
                config.global = parse_global(node)?;
            }
            "device" => {
                config.device = parse_device(node)?;
            }
            name => {
                tracing::warn!("Unknown top-level node: {}", name);
            }
        }
    }

    Ok(config)
}

fn parse_global(node: &kdl::KdlNode) -> Result<GlobalConfig, ConfigError> {
    let mut global = GlobalConfig::default();

    let Some(children) = node.children() else {
        return Ok(global);
    };

    for child in children.nodes() {
        let option = child.name().value();
        match option {
            "log-level" => {
                let val = string_arg(child)?;
                global.log_level = val.parse().map_err(|message| ConfigError::Invalid {
                    option: option.to_string(),
                    message,
                })?;
            }
            "debug-keys" => {
                global.debug_keys = bool_arg(child)?;
            }
            "lock-path" => {
                let val = string_arg(child)?;
                global.lock_path = shellexpand::tilde(val).into_owned().into();
            }
            "status-interval-ms" => {
                global.status_interval = Duration::from_millis(positive_arg(child)?);
            }
            "stop-timeout-ms" => {
                global.stop_timeout = Duration::from_millis(positive_arg(child)?);
            }
            name => {
                tracing::warn!("Unknown global config option: {}", name);
            }
        }
    }

    Ok(global)
}

fn parse_device(node: &kdl::KdlNode) -> Result<DeviceSelector, ConfigError> {
    let mut device = DeviceSelector::default();

    let Some(children) = node.children() else {
        return Ok(device);
    };

    for child in children.nodes() {
        match child.name().value() {
            "index" => {
                let index = positive_arg(child)?;
                device.index = u32::try_from(index).map_err(|_| ConfigError::Invalid {
                    option: "index".to_string(),
                    message: format!("{} is out of range", index),
                })?;
            }
            name => {
                tracing::warn!("Unknown device option: {}", name);
            }
        }
    }

    Ok(device)
}

fn first_value(node: &kdl::KdlNode) -> Result<&kdl::KdlValue, ConfigError> {
    node.entries()
        .first()
        .map(|entry| entry.value())
        .ok_or_else(|| ConfigError::Invalid {
            option: node.name().value().to_string(),
            message: "missing value".to_string(),
        })
}

fn string_arg(node: &kdl::KdlNode) -> Result<&str, ConfigError> {
    first_value(node)?
        .as_string()
        .ok_or_else(|| ConfigError::Invalid {
            option: node.name().value().to_string(),
            message: "expected a string".to_string(),
        })
}

fn bool_arg(node: &kdl::KdlNode) -> Result<bool, ConfigError> {
    first_value(node)?
        .as_bool()
        .ok_or_else(|| ConfigError::Invalid {
            option: node.name().value().to_string(),
            message: "expected true or false".to_string(),
        })
}

fn positive_arg(node: &kdl::KdlNode) -> Result<u64, ConfigError> {
    let option = node.name().value();
    let value = first_value(node)?
        .as_i64()
        .ok_or_else(|| ConfigError::Invalid {
            option: option.to_string(),
            message: "expected an integer".to_string(),
        })?;
    if value <= 0 {
        return Err(ConfigError::Invalid {
            option: option.to_string(),
            message: format!("must be positive, got {}", value),
        });
    }
    Ok(value as u64)
}
