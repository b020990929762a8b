use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::state::Settings;

/// alertnet emergency alert distribution server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "alertnet-server", version, about = "Real-time emergency alert distribution server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "ALERTNET_PORT", default_value = "8600")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "ALERTNET_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./alertnet.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "ALERTNET_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for the JWT signing key
    #[arg(long, env = "ALERTNET_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Redis URL for the shared store and cluster backplane.
    /// Unset means single-node mode: in-process store and backplane.
    #[arg(long, env = "ALERTNET_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Seconds without a heartbeat before a connection is dropped
    #[arg(long, env = "ALERTNET_HEARTBEAT_TIMEOUT_SECS", default_value = "90")]
    pub heartbeat_timeout_secs: u64,

    /// Seconds between stale-connection sweep passes
    #[arg(long, env = "ALERTNET_SWEEP_INTERVAL_SECS", default_value = "15")]
    pub sweep_interval_secs: u64,

    /// Seconds between metrics snapshots
    #[arg(long, env = "ALERTNET_METRICS_INTERVAL_SECS", default_value = "30")]
    pub metrics_interval_secs: u64,

    /// Default nearby-alert query radius in kilometers
    #[arg(long, env = "ALERTNET_NEARBY_RADIUS_KM", default_value = "50")]
    pub nearby_radius_km: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8600,
            bind_address: "0.0.0.0".to_string(),
            config: "./alertnet.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            redis_url: None,
            heartbeat_timeout_secs: 90,
            sweep_interval_secs: 15,
            metrics_interval_secs: 30,
            nearby_radius_km: 50.0,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (ALERTNET_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("ALERTNET_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }

    /// Runtime tunables for the service graph.
    pub fn settings(&self) -> Settings {
        Settings {
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            metrics_interval: Duration::from_secs(self.metrics_interval_secs),
            nearby_radius_km: self.nearby_radius_km,
        }
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# alertnet server configuration
# Place this file at ./alertnet.toml or specify with --config <path>
# All settings can be overridden via environment variables (ALERTNET_PORT, etc.)
# or CLI flags (--port, etc.)

# HTTP/WebSocket port (default: 8600)
# port = 8600

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the JWT signing key.
# Every process serving the same cluster must share this key.
# data_dir = "./data"

# Redis URL for the shared ephemeral store and the cluster backplane.
# Leave unset for single-node mode (in-process store and backplane);
# required when running multiple processes behind a load balancer.
# redis_url = "redis://127.0.0.1:6379"

# Seconds without a client heartbeat before forced disconnect (default: 90)
# heartbeat_timeout_secs = 90

# Seconds between stale-connection sweep passes (default: 15)
# sweep_interval_secs = 15

# Seconds between metrics snapshots (default: 30)
# metrics_interval_secs = 30

# Default nearby-alert query radius in kilometers (default: 50)
# nearby_radius_km = 50
"#
    .to_string()
}
