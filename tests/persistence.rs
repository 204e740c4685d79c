//! Persistence integration tests: settings survive process restarts.
//!
//! These tests exercise the full stack from [`ConfigStore`] down through
//! [`FileStore`] to real files in a temp directory. They verify:
//! - saved settings survive a close-and-reopen cycle
//! - a corrupt store file is set aside and replaced by defaults
//! - a corrupt config payload inside a healthy store falls back to defaults
//! - an assistant built over a file store picks up the persisted config

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use teller::store::{FileStore, KeyValueStore};
use teller::{Assistant, ConfigStore, LocalAiConfig};

const DEAD_ENDPOINT: &str = "http://127.0.0.1:9";

fn custom_config() -> LocalAiConfig {
    LocalAiConfig::default()
        .with_endpoint_url("http://10.0.0.5:11434")
        .with_default_model("mistral")
        .with_fallback_enabled(false)
        .with_timeout_ms(30_000)
}

#[test]
fn defaults_until_first_save() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::open(dir.path().join("store.toml")).unwrap());
    let config_store = ConfigStore::new(store);

    assert_eq!(config_store.load(), LocalAiConfig::default());
}

#[test]
fn config_round_trips_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.toml");

    {
        let store = Arc::new(FileStore::open(&path).unwrap());
        ConfigStore::new(store).save(&custom_config()).unwrap();
    }

    let reopened = Arc::new(FileStore::open(&path).unwrap());
    assert_eq!(ConfigStore::new(reopened).load(), custom_config());
}

#[test]
fn saved_endpoint_lands_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.toml");

    let store = Arc::new(FileStore::open(&path).unwrap());
    ConfigStore::new(store).save(&custom_config()).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("10.0.0.5"), "store file: {text}");
}

#[test]
fn corrupt_store_file_is_preserved_and_defaults_apply() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.toml");
    std::fs::write(&path, "not = [valid toml").unwrap();

    let store = Arc::new(FileStore::open(&path).unwrap());
    let config_store = ConfigStore::new(store);

    assert_eq!(config_store.load(), LocalAiConfig::default());
    assert!(path.with_extension("toml.corrupt").exists());

    // The next save repairs the store.
    config_store.save(&custom_config()).unwrap();
    let reopened = Arc::new(FileStore::open(&path).unwrap());
    assert_eq!(ConfigStore::new(reopened).load(), custom_config());
}

#[test]
fn corrupt_config_payload_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.toml");

    let store = Arc::new(FileStore::open(&path).unwrap());
    store.set("local_ai_config", "{this is not json").unwrap();

    let config_store = ConfigStore::new(store);
    assert_eq!(config_store.load(), LocalAiConfig::default());

    config_store.save(&custom_config()).unwrap();
    assert_eq!(config_store.load(), custom_config());
}

#[tokio::test]
async fn assistant_over_file_store_picks_up_persisted_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.toml");

    {
        let assistant = Assistant::builder()
            .store(Arc::new(FileStore::open(&path).unwrap()))
            .cloud_base_url(DEAD_ENDPOINT)
            .build()
            .unwrap();
        assistant.save_config(&custom_config()).unwrap();
    }

    let assistant = Assistant::builder()
        .store(Arc::new(FileStore::open(&path).unwrap()))
        .cloud_base_url(DEAD_ENDPOINT)
        .build()
        .unwrap();
    assert_eq!(assistant.config(), custom_config());
}
