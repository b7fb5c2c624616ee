/// Prefix of the fast-path cache key for a server record
pub const SERVER_CACHE_PREFIX: &str = "server:";

/// Schema version of the cached server record envelope
pub const CACHE_SCHEMA_VERSION: u32 = 1;

/// Default topic heartbeats are published to
pub const DEFAULT_TOPIC: &str = "healthcheck";

/// Heartbeat intake path
pub const HEALTHCHECK_PATH: &str = "/healthcheck";

/// API path prefix
pub const API_PREFIX: &str = "/v1";

/// Fast-path cache key for an address, e.g. "server:10.0.0.5"
pub fn server_cache_key(address: &str) -> String {
    format!("{}{}", SERVER_CACHE_PREFIX, address)
}
