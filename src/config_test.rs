use super::*;

const ENV_KEYS: [&str; 7] = [
    "RPC_URL",
    "RPC_BASE_URL",
    "RPC_RECONNECT",
    "RPC_RECONNECT_INTERVAL_MS",
    "RPC_RECONNECT_MAX_ATTEMPTS",
    "RPC_REQUEST_TIMEOUT_SECS",
    "RPC_RESUBSCRIBE",
];

/// # Safety
/// Only `from_env_reads_every_variable` touches these keys, so no other
/// test thread races on them.
unsafe fn clear_rpc_env() {
    for key in ENV_KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

#[test]
fn ws_url_maps_http_schemes() {
    assert_eq!(ws_url("http://127.0.0.1:9867").expect("url"), "ws://127.0.0.1:9867/ws-rpc");
    assert_eq!(ws_url("https://keys.example/").expect("url"), "wss://keys.example/ws-rpc");
}

#[test]
fn ws_url_rejects_other_schemes() {
    let err = ws_url("ftp://host").expect_err("scheme should be rejected");
    assert_eq!(err, ConfigError::InvalidBaseUrl("ftp://host".to_owned()));
}

#[test]
fn bounded_policy_stops_after_max_attempts() {
    let policy = ReconnectPolicy::bounded(3, Duration::from_secs(3));
    assert!(policy.should_reconnect(1));
    assert!(policy.should_reconnect(3));
    assert!(!policy.should_reconnect(4));
}

#[test]
fn forever_and_never_policies() {
    let forever = ReconnectPolicy::forever(Duration::from_secs(3));
    assert!(forever.should_reconnect(u32::MAX));

    let never = ReconnectPolicy::never();
    assert!(!never.should_reconnect(1));
}

#[test]
fn new_config_uses_defaults() {
    let config = ClientConfig::new("ws://localhost:1/ws-rpc");
    assert_eq!(config.request_timeout, Duration::from_secs(30));
    assert_eq!(config.reconnect, ReconnectPolicy::bounded(10, Duration::from_secs(3)));
    assert!(!config.resubscribe_on_handshake);
}

#[test]
fn from_env_reads_every_variable() {
    unsafe { clear_rpc_env() };
    let defaults = ClientConfig::from_env().expect("defaults");
    assert_eq!(defaults.url, "ws://127.0.0.1:9867/ws-rpc");
    assert_eq!(defaults, ClientConfig::new("ws://127.0.0.1:9867/ws-rpc"));

    unsafe {
        std::env::set_var("RPC_BASE_URL", "https://daemon.local");
        std::env::set_var("RPC_RECONNECT_MAX_ATTEMPTS", "0");
        std::env::set_var("RPC_RECONNECT_INTERVAL_MS", "500");
        std::env::set_var("RPC_REQUEST_TIMEOUT_SECS", "5");
        std::env::set_var("RPC_RESUBSCRIBE", "true");
    }
    let tuned = ClientConfig::from_env().expect("tuned");
    assert_eq!(tuned.url, "wss://daemon.local/ws-rpc");
    assert_eq!(tuned.reconnect, ReconnectPolicy::forever(Duration::from_millis(500)));
    assert_eq!(tuned.request_timeout, Duration::from_secs(5));
    assert!(tuned.resubscribe_on_handshake);

    unsafe {
        std::env::set_var("RPC_URL", "ws://override:1/socket");
        std::env::set_var("RPC_RECONNECT", "never");
    }
    let explicit = ClientConfig::from_env().expect("explicit");
    assert_eq!(explicit.url, "ws://override:1/socket");
    assert_eq!(explicit.reconnect, ReconnectPolicy::never());

    unsafe { std::env::set_var("RPC_RECONNECT", "sometimes") };
    let err = ClientConfig::from_env().expect_err("bad policy");
    assert_eq!(err, ConfigError::InvalidValue { var: "RPC_RECONNECT", value: "sometimes".to_owned() });

    unsafe {
        std::env::remove_var("RPC_RECONNECT");
        std::env::set_var("RPC_REQUEST_TIMEOUT_SECS", "soon");
    }
    let err = ClientConfig::from_env().expect_err("bad timeout");
    assert!(matches!(err, ConfigError::InvalidValue { var: "RPC_REQUEST_TIMEOUT_SECS", .. }));

    unsafe { clear_rpc_env() };
}
