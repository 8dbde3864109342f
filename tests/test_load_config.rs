use serial_test::serial;
use std::env;
use std::fs::write;
use tempfile::NamedTempFile;

use catalog_sync::load_config::{load_config, API_KEY_ENV};

fn config_file(yaml: &str) -> NamedTempFile {
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), yaml).unwrap();
    config_file
}

/// A static config plus the API key env var produces a merged config with defaults filled in.
#[test]
#[serial]
fn test_load_config_success_injects_env_and_defaults() {
    let file = config_file(
        r#"
sync:
  locales: [en, de]
  collection_prefix: mirror
  products:
    page_count: 150
  filter:
    min_reviews: 5
upstream:
  base_url: "https://api.example.test/partner"
store:
  url: "http://localhost:9200"
"#,
    );
    env::set_var(API_KEY_ENV, "top-secret-test-key");

    let config = load_config(file.path()).expect("Config should load");

    assert_eq!(config.sync.locales, vec!["en", "de"]);
    assert_eq!(config.sync.collection_prefix, "mirror");
    assert_eq!(config.sync.products.page_count, 150);
    assert_eq!(config.sync.products.bootstrap_count, 10);
    assert_eq!(config.sync.schedules.page_count, 500);
    assert_eq!(config.sync.filter.min_reviews, 5);
    assert_eq!(config.sync.filter.denied_tags, vec![12044, 20238]);
    assert_eq!(config.sync.staleness.taxonomy_after_secs, 43_200);
    assert_eq!(config.sync.staleness.exchange_rates_after_secs, 14_400);

    assert_eq!(config.upstream.api_key, "top-secret-test-key");
    assert_eq!(config.upstream.max_attempts, 4);
    assert_eq!(config.upstream.timeout_secs, 90);
    assert_eq!(config.upstream.target_currencies, vec!["AUD", "EUR", "USD", "GBP"]);
    assert!(config.upstream.source_currencies.contains(&"ZAR".to_string()));
    assert!(config.store.audit);
}

/// Missing the API key makes the loader fail and name the variable.
#[test]
#[serial]
fn test_load_config_errors_on_missing_env() {
    let file = config_file(
        "upstream:\n  base_url: \"https://api.example.test\"\nstore:\n  url: \"http://localhost:9200\"\n",
    );
    env::remove_var(API_KEY_ENV);

    let err = load_config(file.path()).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains(API_KEY_ENV), "Must error for missing env var, got: {msg}");
}

/// Invalid YAML is reported as such.
#[test]
#[serial]
fn test_load_config_errors_for_invalid_file() {
    let file = config_file("not: [valid yaml");
    env::set_var(API_KEY_ENV, "k");

    let err = load_config(file.path()).unwrap_err();
    assert!(err.to_string().contains("parse config YAML"), "got: {err}");
}

/// A config without locales is rejected before anything else happens.
#[test]
#[serial]
fn test_load_config_rejects_empty_locale_list() {
    let file = config_file(
        "sync:\n  locales: []\nupstream:\n  base_url: \"https://api.example.test\"\nstore:\n  url: \"http://localhost:9200\"\n",
    );
    env::set_var(API_KEY_ENV, "k");

    let err = load_config(file.path()).unwrap_err();
    assert!(err.to_string().contains("locale"), "got: {err}");
}

/// Locales are used as single field keys, so dotted values are refused.
#[test]
#[serial]
fn test_load_config_rejects_dotted_locale() {
    let file = config_file(
        "sync:\n  locales: [en.gb]\nupstream:\n  base_url: \"https://api.example.test\"\nstore:\n  url: \"http://localhost:9200\"\n",
    );
    env::set_var(API_KEY_ENV, "k");

    let err = load_config(file.path()).unwrap_err();
    assert!(err.to_string().contains("en.gb"), "got: {err}");
}

#[test]
#[serial]
fn test_load_config_errors_for_missing_file() {
    env::set_var(API_KEY_ENV, "k");
    let err = load_config("/definitely/not/here.yaml").unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"), "got: {err}");
}
