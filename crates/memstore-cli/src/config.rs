//! CLI configuration – reads/writes `~/.memstore/config.toml`.
//!
//! Values are resolved in layers: built-in defaults, then the config file,
//! then `MEMSTORE_*` environment variables. Command-line flags are applied on
//! top of the result in `main`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use memstore_core::MemError;
use memstore_types::DEFAULT_VECTOR_DIM;

/// Persisted user configuration stored in `~/.memstore/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Store file. Relative paths resolve against the working directory.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Vector dimension for newly created stores.
    #[serde(default = "default_vector_dim")]
    pub vector_dim: usize,

    #[serde(default = "default_search_limit")]
    pub search_limit: usize,

    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,

    #[serde(default = "default_compact_keep")]
    pub compact_keep: usize,

    /// Fail a write when the store file changed since it was read.
    #[serde(default = "default_strict_writes")]
    pub strict_writes: bool,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("memory").join("memories.hnsw")
}
fn default_vector_dim() -> usize {
    DEFAULT_VECTOR_DIM
}
fn default_search_limit() -> usize {
    3
}
fn default_recent_limit() -> usize {
    20
}
fn default_compact_keep() -> usize {
    5000
}
fn default_strict_writes() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            vector_dim: default_vector_dim(),
            search_limit: default_search_limit(),
            recent_limit: default_recent_limit(),
            compact_keep: default_compact_keep(),
            strict_writes: default_strict_writes(),
        }
    }
}

/// Return the path to `~/.memstore/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".memstore").join("config.toml")
}

/// Load the config at `path`, falling back to defaults when the file is
/// absent. Environment overrides are applied either way.
pub fn resolve(path: &Path) -> Result<Config, MemError> {
    let mut cfg = load_from(path)?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path. Returns `None` if the file does not
/// exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, MemError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| MemError::io("read", path, e))?;
    let cfg: Config = toml::from_str(&raw).map_err(|e| {
        MemError::Validation(format!("invalid config at {}: {e}", path.display()))
    })?;
    Ok(Some(cfg))
}

/// Apply `MEMSTORE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `MEMSTORE_PATH` | `store_path` |
/// | `MEMSTORE_VECTOR_DIM` | `vector_dim` |
/// | `MEMSTORE_STRICT_WRITES` | `strict_writes` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("MEMSTORE_PATH")
        && !v.trim().is_empty()
    {
        cfg.store_path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("MEMSTORE_VECTOR_DIM")
        && let Ok(dim) = v.trim().parse::<usize>()
    {
        cfg.vector_dim = dim;
    }
    if let Ok(v) = std::env::var("MEMSTORE_STRICT_WRITES")
        && let Some(strict) = parse_bool(&v)
    {
        cfg.strict_writes = strict;
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// `cfg` as TOML, in the layout `load_from` reads.
pub fn render(cfg: &Config) -> Result<String, MemError> {
    toml::to_string_pretty(cfg)
        .map_err(|e| MemError::Validation(format!("cannot serialize config: {e}")))
}

/// Write `cfg` to `path`, creating parent directories. An existing file is
/// never overwritten.
pub fn init_at(cfg: &Config, path: &Path) -> Result<(), MemError> {
    if path.exists() {
        return Err(MemError::Validation(format!(
            "config already exists at {}",
            path.display()
        )));
    }
    save_to(cfg, path)
}

/// Save the config to a specific path, creating parent directories.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), MemError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| MemError::io("create_dir", parent, e))?;
    }
    fs::write(path, render(cfg)?).map_err(|e| MemError::io("write", path, e))
}
