//! The configuration schema the engine consumes.

use {
    crate::error::{Error, Result},
    serde::{Deserialize, Serialize},
    std::time::Duration,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Websocket target host of the upstream connector.
    pub connect_host: String,
    pub connect_port: u16,
    /// Reconnect attempts; `-1` retries forever.
    pub max_conn_try: i64,
    /// Seconds between reconnect attempts.
    pub conn_try_interval: f64,
    /// Minimum inter-send spacing, seconds.
    pub cooldown_time: f64,
    /// Event worker task count; priority workers are a quarter of this.
    pub event_handler_num: usize,
    /// Bound on outbound frame placement, seconds.
    pub kernel_timeout: f64,
    /// Default tracing filter used by the CLI.
    pub log_level: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            connect_host: "localhost".into(),
            connect_port: 8080,
            max_conn_try: -1,
            conn_try_interval: 2.0,
            cooldown_time: 0.5,
            event_handler_num: 8,
            kernel_timeout: 5.0,
            log_level: "info".into(),
        }
    }
}

impl BotConfig {
    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.connect_host, self.connect_port)
    }

    pub fn conn_try_interval(&self) -> Duration {
        Duration::from_secs_f64(self.conn_try_interval.max(0.0))
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.cooldown_time.max(0.0))
    }

    pub fn kernel_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.kernel_timeout)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connect_host.is_empty() {
            return Err(Error::Invalid("connect_host is empty".into()));
        }
        if self.connect_port == 0 {
            return Err(Error::Invalid("connect_port must be non-zero".into()));
        }
        if self.event_handler_num == 0 {
            return Err(Error::Invalid("event_handler_num must be at least 1".into()));
        }
        if self.cooldown_time < 0.0 {
            return Err(Error::Invalid("cooldown_time must not be negative".into()));
        }
        if self.kernel_timeout <= 0.0 {
            return Err(Error::Invalid("kernel_timeout must be positive".into()));
        }
        Ok(())
    }
}
