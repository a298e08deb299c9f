use firewatch::config::{generate::generate_starter_config, load_config, ConfigError, StoreType};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_generated_config_is_valid() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    fs::write(&config_path, generate_starter_config()).unwrap();

    let config = load_config(&config_path).expect("Generated config should be valid");
    assert_eq!(config.store.store_type, StoreType::Elasticsearch);
    assert_eq!(config.store.url, "http://localhost:9200");
    assert_eq!(config.feed.interval, Duration::from_secs(5));
    assert_eq!(config.feed.backfill_size, 200);
    assert_eq!(config.fields.cache_ttl, Duration::from_secs(600));
    assert!(config.fields.overrides.is_empty());
}

#[test]
fn test_memory_store_seed_path_tilde_expanded() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");
    fs::write(
        &config_path,
        r#"
store:
  type: memory
  index: fw
  seed_path: ~/samples/fw.ndjson
"#,
    )
    .unwrap();

    let config = load_config(&config_path).unwrap();
    let seed_path = config.store.seed_path.unwrap();
    if let Some(home) = dirs::home_dir() {
        assert_eq!(seed_path, home.join("samples/fw.ndjson"));
    }
}

#[test]
fn test_invalid_feed_limits() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");
    fs::write(
        &config_path,
        r#"
store:
  type: memory
  index: fw
feed:
  min_interval: 10m
  max_interval: 1m
  backfill_size: 1000
"#,
    )
    .unwrap();

    match load_config(&config_path) {
        Err(ConfigError::ValidationList(errors)) => {
            assert_eq!(errors.len(), 2, "{:?}", errors);
            assert!(errors.iter().any(|e| e.contains("min_interval")));
            assert!(errors.iter().any(|e| e.contains("backfill_size")));
        }
        other => panic!("expected validation errors, got {:?}", other),
    }
}

#[test]
fn test_malformed_yaml_names_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("broken.yml");
    fs::write(&config_path, "store: [not, a, map").unwrap();

    let err = load_config(&config_path).unwrap_err();
    assert!(err.to_string().contains("broken.yml"));
}

#[test]
fn test_missing_file() {
    let err = load_config(std::path::Path::new("/nonexistent/firewatch.yml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}
