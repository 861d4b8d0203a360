//! # Configuration Management
//!
//! Centralized configuration for the daemon client, the daemon process it may
//! own, framing limits and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`
//!
//! ## Feature flags
//! [`DaemonFlags::normalize`] resolves contradictory daemon options before any
//! process is started: DHT full mode wins over client mode and GossipSub wins
//! over FloodSub.

use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::{warn, Level};

/// Max allowed length of one framed message (64 KiB)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Default daemon executable looked up on `PATH`
pub const DEFAULT_DAEMON_BINARY: &str = "p2pd";

/// Default control socket of the daemon
pub const DEFAULT_CONTROL_ADDR: &str = "/unix/tmp/p2pd.sock";

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Daemon process configuration
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Control client configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Framing configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("P2P_PROTOCOL_CONTROL_ADDR") {
            config.client.control_addr = addr;
        }

        if let Ok(binary) = std::env::var("P2P_PROTOCOL_DAEMON_BINARY") {
            config.daemon.binary = binary;
        }

        if let Ok(size) = std::env::var("P2P_PROTOCOL_MAX_MESSAGE_SIZE") {
            let val = size.parse::<usize>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid P2P_PROTOCOL_MAX_MESSAGE_SIZE: {e}"))
            })?;
            config.transport.max_message_size = val;
        }

        if let Ok(peers) = std::env::var("P2P_PROTOCOL_MIN_PEERS") {
            let val = peers.parse::<usize>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid P2P_PROTOCOL_MIN_PEERS: {e}"))
            })?;
            config.daemon.min_peers = val;
        }

        if let Ok(dir) = std::env::var("P2P_PROTOCOL_HANDLER_DIR") {
            config.client.handler_socket_dir = dir;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.daemon.validate());
        errors.extend(self.client.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    ///
    /// Entries prefixed with `WARNING:` are logged and do not fail validation.
    pub fn validate_strict(&self) -> Result<()> {
        let (warnings, errors): (Vec<String>, Vec<String>) = self
            .validate()
            .into_iter()
            .partition(|e| e.starts_with("WARNING:"));
        for warning in &warnings {
            warn!("{}", warning);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Daemon feature flags rendered into `p2pd` command line options
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DaemonFlags {
    /// Run the DHT in full mode
    pub dht: bool,
    /// Run the DHT in client-only mode
    pub dht_client: bool,
    /// Connect to the bootstrap peers on start
    pub bootstrap: bool,
    /// Enable the connection manager
    pub conn_manager: bool,
    /// Verbose daemon logging (sets the daemon's logging environment)
    pub logging: bool,
    /// Map the listening port through the NAT
    pub nat_portmap: bool,
    /// Enable the AutoNAT service
    pub auto_nat: bool,
    /// Enable circuit relay
    pub relay: bool,
    /// Actively dial through relays
    pub relay_active: bool,
    /// Act as a relay hop
    pub relay_hop: bool,
    /// Discover relays automatically
    pub relay_discovery: bool,
    /// Use the GossipSub router
    pub gossipsub: bool,
    /// Use the FloodSub router
    pub floodsub: bool,
    /// Sign published messages
    pub pubsub_sign: bool,
    /// Reject unsigned messages
    pub pubsub_sign_strict: bool,
}

impl DaemonFlags {
    /// Resolve mutually exclusive options.
    ///
    /// DHT full mode drops client mode; GossipSub drops FloodSub.
    pub fn normalize(mut self) -> Self {
        if self.dht && self.dht_client {
            warn!("Both DHT modes requested, using full mode");
            self.dht_client = false;
        }
        if self.gossipsub && self.floodsub {
            warn!("Both pubsub routers requested, using GossipSub");
            self.floodsub = false;
        }
        self
    }

    pub fn pubsub_enabled(&self) -> bool {
        self.gossipsub || self.floodsub
    }

    /// Command line options for these flags. Call on normalized flags.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        let mut push = |enabled: bool, arg: &str| {
            if enabled {
                args.push(arg.to_string());
            }
        };
        push(self.dht, "-dht");
        push(self.dht_client, "-dhtClient");
        push(self.bootstrap, "-b");
        push(self.conn_manager, "-connManager");
        push(self.nat_portmap, "-natPortMap");
        push(self.auto_nat, "-autonat");
        push(self.relay, "-relay");
        push(self.relay_active, "-relayActive");
        push(self.relay_hop, "-relayHop");
        push(self.relay_discovery, "-relayDiscovery");
        if self.pubsub_enabled() {
            push(true, "-pubsub");
            if self.gossipsub {
                push(true, "-pubsubRouter=gossipsub");
            } else {
                push(true, "-pubsubRouter=floodsub");
            }
        }
        push(self.pubsub_sign, "-pubsubSign");
        push(self.pubsub_sign_strict, "-pubsubSignStrict");
        args
    }

    /// Environment variables for the daemon process
    pub fn to_env(&self) -> Vec<(String, String)> {
        if self.logging {
            vec![
                ("IPFS_LOGGING_FMT".to_string(), "nocolor".to_string()),
                ("IPFS_LOGGING".to_string(), "debug".to_string()),
                ("GOLOG_LOG_LEVEL".to_string(), "debug".to_string()),
            ]
        } else {
            Vec::new()
        }
    }
}

/// Daemon process configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Path or name of the daemon executable
    pub binary: String,

    /// Listen addresses for the daemon's host (multiaddr text)
    #[serde(default)]
    pub host_addrs: Vec<String>,

    /// Bootstrap peers (multiaddr text)
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,

    /// Identity key file
    #[serde(default)]
    pub id_file: Option<String>,

    /// Low / high water marks for the connection manager
    pub conn_low: usize,
    pub conn_high: usize,

    /// Peers the daemon must report before startup completes (0 disables the wait)
    pub min_peers: usize,

    /// Upper bound on waiting for the control socket
    #[serde(with = "duration_serde")]
    pub startup_timeout: Duration,

    /// Fixed interval between control socket probes
    #[serde(with = "duration_serde")]
    pub poll_interval: Duration,

    /// Upper bound on waiting for `min_peers`
    #[serde(with = "duration_serde")]
    pub bootstrap_timeout: Duration,

    /// Additional raw arguments appended last
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Feature flags
    #[serde(default)]
    pub flags: DaemonFlags,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            binary: String::from(DEFAULT_DAEMON_BINARY),
            host_addrs: Vec::new(),
            bootstrap_peers: Vec::new(),
            id_file: None,
            conn_low: 128,
            conn_high: 256,
            min_peers: 0,
            startup_timeout: timeout::STARTUP_TIMEOUT,
            poll_interval: timeout::POLL_INTERVAL,
            bootstrap_timeout: timeout::BOOTSTRAP_TIMEOUT,
            extra_args: Vec::new(),
            flags: DaemonFlags::default(),
        }
    }
}

impl DaemonConfig {
    /// Full argument list for spawning the daemon listening on `control_addr`
    pub fn to_args(&self, control_addr: &str) -> Vec<String> {
        let flags = self.flags.clone().normalize();
        let mut args = vec![format!("-listen={control_addr}")];
        args.extend(flags.to_args());
        if flags.conn_manager {
            args.push(format!("-connLo={}", self.conn_low));
            args.push(format!("-connHi={}", self.conn_high));
        }
        if !self.host_addrs.is_empty() {
            args.push(format!("-hostAddrs={}", self.host_addrs.join(",")));
        }
        if !self.bootstrap_peers.is_empty() {
            args.push(format!("-bootstrapPeers={}", self.bootstrap_peers.join(",")));
        }
        if let Some(ref id) = self.id_file {
            args.push(format!("-id={id}"));
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Validate daemon configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.binary.is_empty() {
            errors.push("Daemon binary cannot be empty".to_string());
        }

        if self.flags.conn_manager && self.conn_low > self.conn_high {
            errors.push(format!(
                "Connection manager low water mark {} exceeds high water mark {}",
                self.conn_low, self.conn_high
            ));
        }

        if self.poll_interval.as_millis() < 10 {
            errors.push("Poll interval too short (minimum: 10ms)".to_string());
        }

        if self.startup_timeout < self.poll_interval {
            errors.push("Startup timeout must be at least one poll interval".to_string());
        }

        if self.min_peers > 0 && self.bootstrap_timeout.as_secs() == 0 {
            errors.push("Bootstrap timeout must be at least 1s when min_peers is set".to_string());
        }

        if self.flags.dht && self.flags.dht_client {
            errors.push("WARNING: dht and dht_client both set, dht_client will be ignored".to_string());
        }

        if self.flags.gossipsub && self.flags.floodsub {
            errors.push("WARNING: gossipsub and floodsub both set, floodsub will be ignored".to_string());
        }

        errors
    }
}

/// Control client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Daemon control address: multiaddr text, socket path, or `host:port`
    pub control_addr: String,

    /// Directory for Unix sockets bound by stream handlers
    pub handler_socket_dir: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            control_addr: String::from(DEFAULT_CONTROL_ADDR),
            handler_socket_dir: std::env::temp_dir().to_string_lossy().into_owned(),
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.control_addr.is_empty() {
            errors.push("Control address cannot be empty".to_string());
        } else if self
            .control_addr
            .parse::<crate::transport::local::ControlAddr>()
            .is_err()
        {
            errors.push(format!(
                "Invalid control address: '{}' (expected '/unix/<path>', '/ip4/<ip>/tcp/<port>' or 'host:port')",
                self.control_addr
            ));
        }

        if self.handler_socket_dir.is_empty() {
            errors.push("Handler socket directory cannot be empty".to_string());
        }

        errors
    }
}

/// Framing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Maximum allowed length of one framed message in bytes
    pub max_message_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_message_size == 0 {
            errors.push("Max message size cannot be 0".to_string());
        } else if self.max_message_size < 1024 {
            errors.push("Max message size too small (minimum: 1 KB)".to_string());
        } else if self.max_message_size > 16 * 1024 * 1024 {
            errors.push(format!(
                "Max message size too large: {} bytes (maximum recommended: 16 MB)",
                self.max_message_size
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("p2p-protocol"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_dht_full_mode_wins() {
        let flags = DaemonFlags {
            dht: true,
            dht_client: true,
            ..Default::default()
        }
        .normalize();
        assert!(flags.dht);
        assert!(!flags.dht_client);
    }

    #[test]
    fn test_gossipsub_wins() {
        let flags = DaemonFlags {
            gossipsub: true,
            floodsub: true,
            ..Default::default()
        }
        .normalize();
        assert!(flags.gossipsub);
        assert!(!flags.floodsub);
        let args = flags.to_args();
        assert!(args.contains(&"-pubsubRouter=gossipsub".to_string()));
        assert!(!args.iter().any(|a| a.contains("floodsub")));
    }

    #[test]
    fn test_daemon_args() {
        let config = DaemonConfig {
            flags: DaemonFlags {
                dht_client: true,
                conn_manager: true,
                ..Default::default()
            },
            bootstrap_peers: vec!["/ip4/1.2.3.4/tcp/4001".into()],
            ..Default::default()
        };
        let args = config.to_args("/unix/tmp/test.sock");
        assert_eq!(args[0], "-listen=/unix/tmp/test.sock");
        assert!(args.contains(&"-dhtClient".to_string()));
        assert!(args.contains(&"-connLo=128".to_string()));
        assert!(args.contains(&"-bootstrapPeers=/ip4/1.2.3.4/tcp/4001".to_string()));
    }

    #[test]
    fn test_toml_roundtrip() {
        let text = NetworkConfig::example_config();
        let parsed = NetworkConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.transport.max_message_size, MAX_MESSAGE_SIZE);
        assert_eq!(parsed.client.control_addr, DEFAULT_CONTROL_ADDR);
    }
}
