use super::types::*;
use crate::config::{env_var_pattern, expand_env_vars, expand_tilde};
use crate::feed::MAX_LIVE_BATCH;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    use std::io::Read;

    let mut file = File::open(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open config file '{}': {}", path.display(), e),
        ))
    })?;

    let mut yaml_string = String::new();
    file.read_to_string(&mut yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })
}

/// Parse and validate config text. Environment references are expanded
/// first, then `~` in paths.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml)?;

    let mut config: Config = serde_yaml::from_str(&yaml)?;
    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error.
/// References inside YAML comments are ignored.
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let mut unexpanded_vars: Vec<String> = yaml_string
        .lines()
        .map(strip_comment)
        .flat_map(|line| env_var_pattern().captures_iter(line))
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    let error_msg = if unexpanded_vars.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=...\n\
             2. Replace $env{{{0}}} in the config file with the actual value",
            unexpanded_vars[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variables (e.g., export ES_PASSWORD=...)\n\
             2. Replace the variables in the config file with actual values",
            unexpanded_vars.join(", ")
        )
    };

    Err(ConfigError::Validation(error_msg))
}

fn expand_paths(config: &mut Config) {
    if let Some(seed_path) = &config.store.seed_path {
        config.store.seed_path = Some(expand_tilde(seed_path));
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    validate_store(&config.store, &mut errors);
    validate_feed(&config.feed, &mut errors);
    validate_fields(&config.fields, &mut errors);

    if config.web.listen.trim().is_empty() {
        errors.push("web.listen cannot be empty".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_store(store: &StoreConfig, errors: &mut Vec<String>) {
    if store.index.trim().is_empty() {
        errors.push("store.index cannot be empty".to_string());
    }
    if store.time_field.trim().is_empty() {
        errors.push("store.time_field cannot be empty".to_string());
    }
    if store.timeout.is_zero() {
        errors.push("store.timeout must be greater than zero".to_string());
    }

    match store.store_type {
        StoreType::Elasticsearch => {
            if store.url.is_empty() {
                errors.push("store.url is required for the elasticsearch backend".to_string());
            } else if !(store.url.starts_with("http://") || store.url.starts_with("https://")) {
                errors.push(format!(
                    "store.url '{}' must start with http:// or https://",
                    store.url
                ));
            }
            if store.seed_path.is_some() {
                errors.push("store.seed_path is only valid for the memory backend".to_string());
            }
        }
        StoreType::Memory => {}
    }

    if store.password.is_some() && store.username.is_none() {
        errors.push("store.password requires store.username".to_string());
    }
}

fn validate_feed(feed: &FeedConfig, errors: &mut Vec<String>) {
    if feed.page_size == 0 || feed.page_size > MAX_LIVE_BATCH {
        errors.push(format!(
            "feed.page_size must be between 1 and {} (got {})",
            MAX_LIVE_BATCH, feed.page_size
        ));
    }
    if feed.backfill_size > MAX_LIVE_BATCH {
        errors.push(format!(
            "feed.backfill_size must be at most {} (got {})",
            MAX_LIVE_BATCH, feed.backfill_size
        ));
    }
    if feed.channel_capacity == 0 {
        errors.push("feed.channel_capacity must be at least 1".to_string());
    }
    if feed.min_interval.is_zero() {
        errors.push("feed.min_interval must be greater than zero".to_string());
    }
    if feed.min_interval > feed.max_interval {
        errors.push(format!(
            "feed.min_interval ({:?}) exceeds feed.max_interval ({:?})",
            feed.min_interval, feed.max_interval
        ));
    } else if feed.interval < feed.min_interval || feed.interval > feed.max_interval {
        errors.push(format!(
            "feed.interval ({:?}) must be between {:?} and {:?}",
            feed.interval, feed.min_interval, feed.max_interval
        ));
    }
}

fn validate_fields(fields: &FieldsConfig, errors: &mut Vec<String>) {
    let mut names: Vec<&String> = fields.overrides.keys().collect();
    names.sort();

    for name in names {
        let variants = &fields.overrides[name];
        if variants.is_empty() {
            errors.push(format!("fields.overrides '{}': variant list cannot be empty", name));
        }
        if variants.iter().any(|v| v.trim().is_empty()) {
            errors.push(format!("fields.overrides '{}': variant names cannot be empty", name));
        }
    }
}

/// Drop a trailing YAML comment. A `#` only starts a comment at the start
/// of a line or after whitespace.
fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'#' && (i == 0 || bytes[i - 1].is_ascii_whitespace()) {
            return &line[..i];
        }
    }
    line
}
