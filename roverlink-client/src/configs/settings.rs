use std::env;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotSettings {
    /// Address assumed before any discovery has run; the robot's hotspot
    pub default_base_url: String,
    /// Port the robot's HTTP API listens on
    pub api_port: u16,
    /// First three octets of the robot's hotspot /24
    pub hotspot_prefix: String,
    /// Fixed address the robot takes when serving its own access point
    pub hotspot_address: String,
    /// Advertised-name prefix used to filter radio scan results
    pub device_name_prefix: String,
}

impl Default for RobotSettings {
    fn default() -> Self {
        Self {
            default_base_url: "http://192.168.4.1:8000".to_string(),
            api_port: 8000,
            hotspot_prefix: "192.168.4".to_string(),
            hotspot_address: "192.168.4.1".to_string(),
            device_name_prefix: "rover-".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    /// Per-candidate liveness probe timeout
    pub probe_timeout_ms: u64,
    /// Upper bound on candidates tested in one sweep; `None` means the
    /// full generated list
    pub sweep_limit: Option<usize>,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 900,
            sweep_limit: Some(300),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Fixed interval between unattended status refreshes
    pub poll_interval_secs: u64,
    /// Overall timeout for session HTTP calls
    pub http_timeout_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            http_timeout_secs: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logger {
    pub level: String,
}

impl Default for Logger {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub robot: RobotSettings,
    pub discovery: DiscoverySettings,
    pub session: SessionSettings,
    pub logger: Logger,
}

impl Settings {
    /// Layers `configs/default.toml`, a `RUN_MODE`-named overlay, and the
    /// environment over the built-in defaults. Every file is optional so
    /// the library is usable with no configuration on disk.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or("development".into());

        Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::with_name("configs/default").required(false))
            .add_source(File::with_name(&format!("configs/{run_mode}")).required(false))
            .add_source(Environment::default().separator("_"))
            .build()?
            .try_deserialize()
    }
}
