use std::time::Duration;

/// SessionConfig bounds the resources of each Session.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct SessionConfig {
    /// Pushes fail once the index of the topmost frame reaches this depth.
    pub max_nesting_depth: usize,
    /// Exclusive upper bound of query ids which may back a cursor.
    pub max_query_id: u64,
    /// Interval between interrupt checks while awaiting the runtime.
    #[serde(with = "humantime_serde")]
    pub read_poll_interval: Duration,
    pub default_fetch_count: i32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_nesting_depth: 15,
            max_query_id: i16::MAX as u64,
            read_poll_interval: Duration::from_millis(500),
            default_fetch_count: 1000,
        }
    }
}

/// PoolConfig addresses the runtime and sizes its ConnectionPool.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct PoolConfig {
    /// host:port of the runtime.
    pub address: String,
    /// Maximum number of idle connections retained.
    pub capacity: usize,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:5500".to_string(),
            capacity: 10,
            connect_timeout: Duration::from_secs(5),
        }
    }
}
