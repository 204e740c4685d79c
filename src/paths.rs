//! Centralized application directory paths for teller.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//! All paths can be overridden for testing or custom deployments:
//! - `TELLER_DATA_DIR` overrides [`data_dir`]
//! - `TELLER_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

/// Application data root directory.
///
/// Holds the durable key/value store backing connection settings.
/// Resolves to `dirs::data_dir()/teller/` by default.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("TELLER_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("teller"))
        .unwrap_or_else(|| PathBuf::from("/tmp/teller-data"))
}

/// Application config directory.
///
/// Resolves to `dirs::config_dir()/teller/` by default.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("TELLER_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("teller"))
        .unwrap_or_else(|| PathBuf::from("/tmp/teller-config"))
}

/// Default on-disk location of the key/value store (`data_dir()/store.toml`).
#[must_use]
pub fn store_file() -> PathBuf {
    data_dir().join("store.toml")
}
