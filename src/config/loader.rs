// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;
    debug!(path = %path.display(), tests = config.test.len(), "loaded config");

    Ok(config)
}

/// Load a configuration file from path and validate it.
///
/// Checks for:
/// - at least one test,
/// - sane cluster ids,
/// - intervals, filter specs, thresholds and return expressions that parse.
///
/// Unknown probe types are only detected when the tests are assembled,
/// since the probe registry is supplied by the caller.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// Parse and validate a config held in memory.
pub fn parse_and_validate(contents: &str) -> Result<ConfigFile> {
    let raw_config: RawConfigFile = toml::from_str(contents)?;
    ConfigFile::try_from(raw_config)
}

/// Default config path: `Checkdag.toml` in the current working directory,
/// unless `CHECKDAG_CONFIG` points elsewhere.
pub fn default_config_path() -> PathBuf {
    std::env::var_os("CHECKDAG_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("Checkdag.toml"))
}
