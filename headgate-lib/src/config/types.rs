use serde::Deserialize;
use std::net::SocketAddr;

/// Shared-secret access configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// Value every HTTP and WebSocket request must present in the
    /// `shiny-shared-secret` header, compared byte-for-byte
    pub shared_secret: String,
}

/// Bootstrap snippet configuration
#[derive(Debug, Deserialize, Clone)]
pub struct InjectionConfig {
    /// Enable client-side session reconnection
    /// Default: false
    #[serde(default)]
    pub reconnect: bool,
    /// Transport protocol names the client must not attempt
    /// Rendered into the bootstrap call as a quoted list
    /// Default: empty
    #[serde(default)]
    pub disable_protocols: Vec<String>,
    /// Analytics tracking id (optional)
    /// Ids with the legacy "UA-" prefix select the ga.js template,
    /// anything else the gtag.js template
    #[serde(default)]
    pub ga_tracking_id: Option<String>,
    /// URL prefix the client asset tags point at
    /// Default: "__assets__"
    #[serde(default = "default_asset_prefix")]
    pub asset_prefix: String,
    /// Upper bound on the per-response accumulation buffer in bytes.
    /// When exceeded before `</head>` appears, the response streams
    /// through uninjected.
    /// Default: 262144 (256 KiB)
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            reconnect: false,
            disable_protocols: Vec::new(),
            ga_tracking_id: None,
            asset_prefix: default_asset_prefix(),
            max_buffer_bytes: default_max_buffer_bytes(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    /// Default: "info"
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Show module path (target) in log messages
    /// Default: false
    #[serde(default)]
    pub show_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), show_target: false }
    }
}

/// Timeout configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    /// Upstream connect timeout in milliseconds
    /// Default: 5000 (5 seconds)
    #[serde(default = "default_connect_timeout")]
    pub connect_ms: u64,
    /// Graceful shutdown timeout in seconds
    /// Default: 30
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: default_connect_timeout(),
            shutdown_secs: default_shutdown_timeout(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Address and port the gateway listens on
    /// Example: "127.0.0.1:7300"
    pub listen: SocketAddr,
    /// Application server authority (host:port) exchanges are forwarded to
    /// Example: "127.0.0.1:8100"
    pub upstream: String,
    /// Shared-secret access configuration (required)
    pub auth: AuthConfig,
    /// Bootstrap snippet configuration
    #[serde(default)]
    pub injection: InjectionConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Timeout configuration
    #[serde(default)]
    pub timeout: TimeoutConfig,
}

fn default_asset_prefix() -> String {
    "__assets__".to_string()
}

fn default_max_buffer_bytes() -> usize {
    256 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_shutdown_timeout() -> u64 {
    30
}
