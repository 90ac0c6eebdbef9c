use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    schema::{MappingBackend, TelefeedConfig},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "telefeed.toml",
    "telefeed.yaml",
    "telefeed.yml",
    "telefeed.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<TelefeedConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./telefeed.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/telefeed/telefeed.{toml,yaml,yml,json}` (user-global)
///
/// Returns `TelefeedConfig::default()` if no config file is found or the
/// file fails to parse.
pub fn discover_and_load() -> TelefeedConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    TelefeedConfig::default()
}

/// Apply `TELEFEED_*` environment overrides on top of a loaded config.
pub fn apply_env_overrides(config: TelefeedConfig) -> TelefeedConfig {
    apply_overrides_with(config, |name| std::env::var(name).ok())
}

fn apply_overrides_with(
    mut config: TelefeedConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> TelefeedConfig {
    if let Some(dir) = lookup("TELEFEED_DATA_DIR").filter(|d| !d.is_empty()) {
        config.storage.data_dir = Some(PathBuf::from(dir));
    }
    if let Some(backend) = lookup("TELEFEED_MAPPING_BACKEND") {
        match backend.to_ascii_lowercase().as_str() {
            "memory" => config.storage.mapping_backend = MappingBackend::Memory,
            "sqlite" => config.storage.mapping_backend = MappingBackend::Sqlite,
            other => warn!(value = other, "ignoring unknown TELEFEED_MAPPING_BACKEND"),
        }
    }
    if let Some(capacity) = lookup("TELEFEED_QUEUE_CAPACITY").and_then(|v| v.parse().ok()) {
        config.engine.queue_capacity = capacity;
    }
    config
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/telefeed/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "telefeed").map(|d| d.config_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<TelefeedConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
