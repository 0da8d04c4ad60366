//! Config file loading and default generation.

use {
    crate::{
        error::Result,
        schema::BotConfig,
    },
    std::path::{Path, PathBuf},
    tracing::{debug, info},
};

pub const CONFIG_FILENAME: &str = "botway.toml";

/// What [`ensure_config`] found.
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(BotConfig),
    /// No config existed; a commented default was written here. The caller
    /// is expected to tell the operator and exit cleanly.
    Generated(PathBuf),
}

/// Load and validate a config file.
pub fn load_config(path: &Path) -> Result<BotConfig> {
    let raw = std::fs::read_to_string(path)?;
    let config: BotConfig = toml::from_str(&raw)?;
    config.validate()?;
    debug!(path = %path.display(), "config loaded");
    Ok(config)
}

/// Load `dir/botway.toml`, generating a commented default when absent.
pub fn ensure_config(dir: &Path) -> Result<LoadOutcome> {
    let path = dir.join(CONFIG_FILENAME);
    if path.exists() {
        return Ok(LoadOutcome::Loaded(load_config(&path)?));
    }
    let written = write_default(dir)?;
    info!(path = %written.display(), "no config found, default generated");
    Ok(LoadOutcome::Generated(written))
}

/// Write the commented default config into `dir`, creating it if needed.
pub fn write_default(dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(CONFIG_FILENAME);
    std::fs::write(&path, DEFAULT_CONFIG_TEXT)?;
    Ok(path)
}

const DEFAULT_CONFIG_TEXT: &str = r#"# botway default configuration

# Websocket host of the upstream connector.
connect_host = "localhost"
# Websocket port of the upstream connector.
connect_port = 8080
# Maximum reconnect attempts (-1 retries forever).
max_conn_try = -1
# Seconds between reconnect attempts.
conn_try_interval = 2.0
# Minimum spacing between outgoing sends, in seconds.
cooldown_time = 0.5
# Number of parallel event worker tasks.
event_handler_num = 8
# Bound on outbound frame placement, in seconds.
kernel_timeout = 5.0
# Log filter (trace, debug, info, warn, error).
log_level = "info"
"#;

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_then_loads() {
        let dir = tempfile::tempdir().unwrap();

        let outcome = ensure_config(dir.path()).unwrap();
        let path = match outcome {
            LoadOutcome::Generated(path) => path,
            other => panic!("expected generation, got {other:?}"),
        };
        assert!(path.exists());

        // Second call loads the generated file, which must itself be valid.
        match ensure_config(dir.path()).unwrap() {
            LoadOutcome::Loaded(config) => {
                assert_eq!(config.connect_port, 8080);
                assert_eq!(config.log_level, "info");
            },
            other => panic!("expected load, got {other:?}"),
        }
    }

    #[test]
    fn load_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "event_handler_num = 0\n").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn load_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "connect_port = {\n").unwrap();
        assert!(load_config(&path).is_err());
    }
}
