//! Method names the daemon answers over `query` and `command`.

// Queries: read-only.
pub const GET_PROFILES: &str = "get_profiles";
pub const GET_CONFIG: &str = "get_config";
pub const GET_LAYERS: &str = "get_layers";
pub const GET_DEVICES: &str = "get_devices";
pub const GET_LATENCY: &str = "get_latency";
pub const GET_EVENTS: &str = "get_events";

// Commands: change daemon state.
pub const CREATE_PROFILE: &str = "create_profile";
pub const ACTIVATE_PROFILE: &str = "activate_profile";
pub const DELETE_PROFILE: &str = "delete_profile";
pub const DUPLICATE_PROFILE: &str = "duplicate_profile";
pub const RENAME_PROFILE: &str = "rename_profile";
pub const UPDATE_CONFIG: &str = "update_config";
pub const SET_KEY_MAPPING: &str = "set_key_mapping";
pub const DELETE_KEY_MAPPING: &str = "delete_key_mapping";
pub const RENAME_DEVICE: &str = "rename_device";
pub const SET_SCOPE_DEVICE: &str = "set_scope_device";
pub const FORGET_DEVICE: &str = "forget_device";
pub const CLEAR_EVENTS: &str = "clear_events";
pub const SIMULATE: &str = "simulate";
pub const RESET_SIMULATOR: &str = "reset_simulator";
pub const RESTART_DAEMON: &str = "restart_daemon";

pub const QUERIES: [&str; 6] = [GET_PROFILES, GET_CONFIG, GET_LAYERS, GET_DEVICES, GET_LATENCY, GET_EVENTS];

pub const COMMANDS: [&str; 15] = [
    CREATE_PROFILE,
    ACTIVATE_PROFILE,
    DELETE_PROFILE,
    DUPLICATE_PROFILE,
    RENAME_PROFILE,
    UPDATE_CONFIG,
    SET_KEY_MAPPING,
    DELETE_KEY_MAPPING,
    RENAME_DEVICE,
    SET_SCOPE_DEVICE,
    FORGET_DEVICE,
    CLEAR_EVENTS,
    SIMULATE,
    RESET_SIMULATOR,
    RESTART_DAEMON,
];

#[must_use]
pub fn is_query(method: &str) -> bool {
    QUERIES.contains(&method)
}

#[must_use]
pub fn is_command(method: &str) -> bool {
    COMMANDS.contains(&method)
}
