//! TOML round-trip tests for the aggregated pipeline configuration.

use promptgate::PipelineConfig;
use std::time::Duration;

#[test]
fn test_config_round_trips_through_toml() {
    let mut config = PipelineConfig::default();
    config.cache.max_entries = 42;
    config.cache.default_ttl = Duration::from_secs(123);
    config.retry.max_attempts = 7;
    config.batch.max_batch_size = 9;
    config.chunker.max_chunk_size = 1234;
    config.reserved_output_tokens = 2048;

    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("promptgate.toml");

    config.to_toml_file(&path).expect("write config");
    let loaded = PipelineConfig::from_toml_file(&path).expect("read config");

    assert_eq!(loaded.cache.max_entries, 42);
    assert_eq!(loaded.cache.default_ttl, Duration::from_secs(123));
    assert_eq!(loaded.retry.max_attempts, 7);
    assert_eq!(loaded.batch.max_batch_size, 9);
    assert_eq!(loaded.chunker.max_chunk_size, 1234);
    assert_eq!(loaded.reserved_output_tokens, 2048);
    assert_eq!(loaded.enable_cache, config.enable_cache);
}

#[test]
fn test_missing_config_file_reports_context() {
    let error = PipelineConfig::from_toml_file("/definitely/not/here.toml").unwrap_err();
    assert!(error.to_string().contains("Failed to read configuration"));
}

#[test]
fn test_defaults_are_internally_consistent() {
    let config = PipelineConfig::default();
    assert!(config.cache.max_entry_bytes <= config.cache.max_total_bytes);
    assert!(config.batch.min_batch_size <= config.batch.max_batch_size);
    assert!(config.chunker.chunk_overlap < config.chunker.max_chunk_size);
    assert!(config.chunker.max_chunk_size <= config.chunker.max_context_size);
    assert!(config.retry.base_delay <= config.retry.max_delay);
}
