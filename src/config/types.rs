use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub fields: FieldsConfig,
    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(rename = "type", default = "default_store_type")]
    pub store_type: StoreType,
    #[serde(default)]
    pub url: String,
    pub index: String,
    #[serde(default = "default_time_field")]
    pub time_field: String,
    #[serde(with = "humantime_serde", default = "default_store_timeout")]
    pub timeout: Duration,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Newline-delimited JSON documents loaded into the memory backend.
    #[serde(default)]
    pub seed_path: Option<PathBuf>,
}

fn default_store_type() -> StoreType {
    StoreType::Elasticsearch
}

fn default_time_field() -> String {
    "@timestamp".to_string()
}

fn default_store_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    Elasticsearch,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(with = "humantime_serde", default = "default_interval")]
    pub interval: Duration,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_backfill_size")]
    pub backfill_size: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub on_store_error: OnStoreError,
    #[serde(with = "humantime_serde", default = "default_min_interval")]
    pub min_interval: Duration,
    #[serde(with = "humantime_serde", default = "default_max_interval")]
    pub max_interval: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            page_size: default_page_size(),
            backfill_size: default_backfill_size(),
            channel_capacity: default_channel_capacity(),
            on_store_error: OnStoreError::default(),
            min_interval: default_min_interval(),
            max_interval: default_max_interval(),
        }
    }
}

fn default_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_page_size() -> usize {
    100
}

fn default_backfill_size() -> usize {
    200
}

fn default_channel_capacity() -> usize {
    64
}

fn default_min_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_max_interval() -> Duration {
    Duration::from_secs(3600)
}

/// What the poller does with its watermark when a tick's store call fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnStoreError {
    /// Move past the failed window; its documents are never delivered.
    #[default]
    Advance,
    /// Keep the watermark so the next tick retries the widened window.
    Hold,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldsConfig {
    #[serde(with = "humantime_serde", default = "default_cache_ttl")]
    pub cache_ttl: Duration,
    #[serde(default)]
    pub overrides: HashMap<String, Vec<String>>,
}

impl Default for FieldsConfig {
    fn default() -> Self {
        Self {
            cache_ttl: default_cache_ttl(),
            overrides: HashMap::new(),
        }
    }
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(600)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub listen: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:7104".to_string(),
        }
    }
}
