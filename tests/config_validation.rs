//! Integration tests for configuration validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use p2p_protocol::config::{DaemonFlags, LoggingConfig, NetworkConfig, TransportConfig};
use p2p_protocol::ProtocolError;
use std::time::Duration;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = NetworkConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_control_address_forms() {
    for addr in ["/unix/tmp/p2pd.sock", "/ip4/127.0.0.1/tcp/5005", "127.0.0.1:5005", "/tmp/p2pd.sock"] {
        let config = NetworkConfig::default_with_overrides(|c| c.client.control_addr = addr.to_string());
        assert!(config.validate().is_empty(), "{addr} should be accepted");
    }
}

#[test]
fn test_invalid_control_address() {
    let mut config = NetworkConfig::default();
    config.client.control_addr = "not an address".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid control address")));
}

#[test]
fn test_empty_control_address() {
    let mut config = NetworkConfig::default();
    config.client.control_addr = String::new();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_empty_daemon_binary() {
    let mut config = NetworkConfig::default();
    config.daemon.binary = String::new();

    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Daemon binary cannot be empty")));
}

#[test]
fn test_conn_manager_water_marks() {
    let mut config = NetworkConfig::default();
    config.daemon.conn_low = 300;
    config.daemon.conn_high = 200;
    // Marks are ignored unless the connection manager is on.
    assert!(config.validate().is_empty());

    config.daemon.flags.conn_manager = true;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("low water mark 300 exceeds high water mark 200")));
}

#[test]
fn test_poll_interval_bounds() {
    let mut config = NetworkConfig::default();
    config.daemon.poll_interval = Duration::from_millis(5);
    assert!(config.validate().iter().any(|e| e.contains("Poll interval too short")));

    config.daemon.poll_interval = Duration::from_secs(2);
    config.daemon.startup_timeout = Duration::from_secs(1);
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("at least one poll interval")));
}

#[test]
fn test_bootstrap_timeout_required_with_min_peers() {
    let mut config = NetworkConfig::default();
    config.daemon.min_peers = 3;
    config.daemon.bootstrap_timeout = Duration::from_millis(500);
    assert!(config.validate().iter().any(|e| e.contains("Bootstrap timeout")));
}

#[test]
fn test_message_size_limits() {
    for (size, fragment) in [
        (0, "cannot be 0"),
        (512, "too small"),
        (32 * 1024 * 1024, "too large"),
    ] {
        let transport = TransportConfig {
            max_message_size: size,
        };
        let errors = transport.validate();
        assert!(errors.iter().any(|e| e.contains(fragment)), "{size}: {errors:?}");
    }
}

#[test]
fn test_conflicting_flags_warn_but_pass() {
    let mut config = NetworkConfig::default();
    config.daemon.flags.dht = true;
    config.daemon.flags.dht_client = true;
    config.daemon.flags.gossipsub = true;
    config.daemon.flags.floodsub = true;

    let errors = config.validate();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|e| e.starts_with("WARNING:")));
    assert!(config.validate_strict().is_ok());
}

#[test]
fn test_validate_strict_reports_errors() {
    let mut config = NetworkConfig::default();
    config.daemon.binary = String::new();
    config.transport.max_message_size = 0;

    match config.validate_strict() {
        Err(ProtocolError::ConfigError(msg)) => {
            assert!(msg.contains("Daemon binary"));
            assert!(msg.contains("Max message size"));
        }
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn test_flags_normalize_exclusive_pairs() {
    let flags = DaemonFlags {
        dht: true,
        dht_client: true,
        gossipsub: true,
        floodsub: true,
        ..DaemonFlags::default()
    }
    .normalize();

    assert!(flags.dht && !flags.dht_client);
    assert!(flags.gossipsub && !flags.floodsub);

    let client_only = DaemonFlags {
        dht_client: true,
        floodsub: true,
        ..DaemonFlags::default()
    }
    .normalize();
    assert!(client_only.dht_client);
    assert!(client_only.floodsub);
}

#[test]
fn test_daemon_arguments() {
    let mut config = NetworkConfig::default();
    config.daemon.flags = DaemonFlags {
        dht: true,
        dht_client: true,
        conn_manager: true,
        gossipsub: true,
        pubsub_sign: true,
        ..DaemonFlags::default()
    };
    config.daemon.conn_low = 10;
    config.daemon.conn_high = 20;
    config.daemon.bootstrap_peers = vec!["/ip4/1.2.3.4/tcp/4001".to_string()];
    config.daemon.extra_args = vec!["-quiet".to_string()];

    let args = config.daemon.to_args("/unix/tmp/p2pd.sock");
    assert_eq!(args[0], "-listen=/unix/tmp/p2pd.sock");
    assert!(args.contains(&"-dht".to_string()));
    assert!(!args.contains(&"-dhtClient".to_string()));
    assert!(args.contains(&"-pubsub".to_string()));
    assert!(args.contains(&"-pubsubRouter=gossipsub".to_string()));
    assert!(args.contains(&"-pubsubSign".to_string()));
    assert!(args.contains(&"-connLo=10".to_string()));
    assert!(args.contains(&"-connHi=20".to_string()));
    assert!(args.contains(&"-bootstrapPeers=/ip4/1.2.3.4/tcp/4001".to_string()));
    assert_eq!(args.last().map(String::as_str), Some("-quiet"));
}

#[test]
fn test_logging_flag_sets_daemon_environment() {
    let quiet = DaemonFlags::default();
    assert!(quiet.to_env().is_empty());

    let verbose = DaemonFlags {
        logging: true,
        ..DaemonFlags::default()
    };
    assert!(verbose
        .to_env()
        .iter()
        .any(|(k, v)| k == "IPFS_LOGGING" && v == "debug"));
}

#[test]
fn test_logging_outputs() {
    let config = LoggingConfig {
        log_to_console: false,
        log_to_file: false,
        ..LoggingConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("At least one logging output")));

    let config = LoggingConfig {
        log_to_file: true,
        log_file_path: None,
        ..LoggingConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("log_file_path must be specified")));
}

#[test]
fn test_toml_partial_config() {
    let config = NetworkConfig::from_toml(
        r#"
        [client]
        control_addr = "127.0.0.1:5005"
        handler_socket_dir = "/tmp"

        [daemon.flags]
        dht = true
        gossipsub = true
        "#,
    )
    .unwrap();

    assert_eq!(config.client.control_addr, "127.0.0.1:5005");
    assert!(config.daemon.flags.dht);
    assert!(config.daemon.flags.gossipsub);
    assert_eq!(config.daemon.binary, "p2pd");
    assert_eq!(config.logging.log_level, Level::INFO);
    assert!(config.validate().is_empty());
}

#[test]
fn test_example_config_parses() {
    let example = NetworkConfig::example_config();
    let parsed = NetworkConfig::from_toml(&example).unwrap();
    assert_eq!(parsed.daemon.startup_timeout, NetworkConfig::default().daemon.startup_timeout);
    assert_eq!(parsed.transport.max_message_size, 64 * 1024);
}

#[test]
fn test_invalid_toml() {
    assert!(matches!(
        NetworkConfig::from_toml("[client\ncontrol_addr = 1"),
        Err(ProtocolError::ConfigError(_))
    ));
}
