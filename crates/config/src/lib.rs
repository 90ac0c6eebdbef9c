//! Configuration loading and env substitution.
//!
//! Config files: `telefeed.toml`, `telefeed.yaml`, or `telefeed.json`
//! Searched in `./` then `~/.config/telefeed/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{apply_env_overrides, config_dir, discover_and_load, load_config},
    schema::{
        EngineConfig, MappingBackend, RetryConfig, SessionsConfig, StorageConfig, TelefeedConfig,
        TelegramConfig,
    },
};
