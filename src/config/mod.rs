pub mod settings;

pub use settings::{SettingsError, TrustSettings};

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

/// Who answers decision requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RendererMode {
    /// A remote user interface polls the renderer endpoints
    Remote,
    /// Answer every request positively
    TrustAll,
    /// Answer every request negatively
    TrustNone,
    /// Nobody; every prompt fails as unavailable
    None,
}

/// Trust decision service configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "trustgate")]
#[command(about = "Application trust decision service")]
pub struct Config {
    /// HTTP server listen address
    #[arg(long, default_value = "127.0.0.1:8088", env = "TRUSTGATE_LISTEN_ADDR")]
    pub listen_addr: String,

    /// Trust settings file (YAML, optional)
    #[arg(long, env = "TRUSTGATE_SETTINGS_PATH")]
    pub settings_path: Option<PathBuf>,

    /// Deployment rule package (zip or XML, optional)
    #[arg(long, env = "TRUSTGATE_RULESET_PATH")]
    pub ruleset_path: Option<PathBuf>,

    /// User decision store file
    #[arg(long, default_value = "trust.store", env = "TRUSTGATE_STORE_PATH")]
    pub store_path: PathBuf,

    /// System-wide decision store, consulted read-only after the user store
    #[arg(long, env = "TRUSTGATE_GLOBAL_STORE_PATH")]
    pub global_store_path: Option<PathBuf>,

    /// Custom grant policy (YAML) used for allowed applications
    #[arg(long, env = "TRUSTGATE_GRANT_POLICY_PATH")]
    pub grant_policy_path: Option<PathBuf>,

    /// Decision renderer
    #[arg(long, value_enum, default_value = "remote", env = "TRUSTGATE_RENDERER")]
    pub renderer: RendererMode,

    /// Seconds a caller waits for an answer (0 waits forever)
    #[arg(long, default_value = "300", env = "TRUSTGATE_DECISION_TIMEOUT_SECS")]
    pub decision_timeout_secs: u64,

    /// Requests queued for the renderer before callers wait to enqueue
    #[arg(long, default_value = "64", env = "TRUSTGATE_QUEUE_CAPACITY")]
    pub queue_capacity: usize,

    /// Rule package reload check interval in seconds
    #[arg(long, default_value = "30", env = "TRUSTGATE_RULESET_RELOAD_SECS")]
    pub ruleset_reload_secs: u64,

    /// Renderer long-poll wait in seconds
    #[arg(long, default_value = "25", env = "TRUSTGATE_RENDERER_POLL_SECS")]
    pub renderer_poll_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, default_value = "text", env = "TRUSTGATE_LOG_FORMAT")]
    pub log_format: String,

    /// Enable graceful shutdown
    #[arg(long, default_value = "true", env = "TRUSTGATE_GRACEFUL_SHUTDOWN")]
    pub graceful_shutdown: bool,
}

impl Config {
    /// Caller wait limit, `None` when disabled.
    pub fn decision_timeout(&self) -> Option<Duration> {
        (self.decision_timeout_secs > 0).then(|| Duration::from_secs(self.decision_timeout_secs))
    }

    pub fn ruleset_reload_interval(&self) -> Duration {
        Duration::from_secs(self.ruleset_reload_secs)
    }

    pub fn renderer_poll(&self) -> Duration {
        Duration::from_secs(self.renderer_poll_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_addr: "127.0.0.1:8088".to_string(),
            settings_path: None,
            ruleset_path: None,
            store_path: PathBuf::from("trust.store"),
            global_store_path: None,
            grant_policy_path: None,
            renderer: RendererMode::Remote,
            decision_timeout_secs: 300,
            queue_capacity: 64,
            ruleset_reload_secs: 30,
            renderer_poll_secs: 25,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            graceful_shutdown: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.listen_addr, "127.0.0.1:8088");
        assert_eq!(config.renderer, RendererMode::Remote);
        assert_eq!(config.queue_capacity, 64);
    }

    #[test]
    fn test_duration_helpers() {
        let config = Config {
            decision_timeout_secs: 0,
            ruleset_reload_secs: 60,
            renderer_poll_secs: 10,
            ..Default::default()
        };

        assert_eq!(config.decision_timeout(), None);
        assert_eq!(config.ruleset_reload_interval(), Duration::from_secs(60));
        assert_eq!(config.renderer_poll(), Duration::from_secs(10));
        assert_eq!(Config::default().decision_timeout(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_parse_flags() {
        let config = Config::try_parse_from([
            "trustgate",
            "--renderer",
            "trust-none",
            "--ruleset-path",
            "/etc/trustgate/ruleset.jar",
            "--decision-timeout-secs",
            "5",
        ])
        .unwrap();

        assert_eq!(config.renderer, RendererMode::TrustNone);
        assert_eq!(config.ruleset_path, Some(PathBuf::from("/etc/trustgate/ruleset.jar")));
        assert_eq!(config.decision_timeout(), Some(Duration::from_secs(5)));
    }
}
