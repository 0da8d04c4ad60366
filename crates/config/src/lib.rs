//! Engine configuration: schema, TOML loading, default-file generation.

pub mod error;
pub mod loader;
pub mod schema;

pub use {
    error::{Error, Result},
    loader::{CONFIG_FILENAME, LoadOutcome, ensure_config, load_config, write_default},
    schema::BotConfig,
};
