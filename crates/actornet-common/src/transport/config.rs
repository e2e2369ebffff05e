//! Transport tuning.
//!
//! Values come from the node's configuration source. Anything unset or out of
//! range is reset to a positive default by [`TransportConfig::normalized`]
//! before a server or client starts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default read deadline (30 seconds)
pub const DEFAULT_READ_DEADLINE_MS: u64 = 30_000;
/// Default write deadline (30 seconds)
pub const DEFAULT_WRITE_DEADLINE_MS: u64 = 30_000;
/// Default live-connection ceiling for a server
pub const DEFAULT_MAX_CONN_NUM: usize = 1_000_000;
/// Default outbound queue depth per connection
pub const DEFAULT_PENDING_WRITE_NUM: usize = 100_000;
/// Default minimum payload length in bytes
pub const DEFAULT_MIN_MSG_LEN: u32 = 2;
/// Default length-prefix width in bytes
pub const DEFAULT_LEN_MSG_LEN: usize = 2;
/// Default maximum payload length in bytes
pub const DEFAULT_MAX_MSG_LEN: u32 = 65_535;

/// Largest payload a length prefix of `len_msg_len` bytes can describe.
///
/// Returns `None` for widths other than 1, 2 or 4.
pub fn max_len_for_width(len_msg_len: usize) -> Option<u32> {
    match len_msg_len {
        1 => Some(u8::MAX as u32),
        2 => Some(u16::MAX as u32),
        4 => Some(u32::MAX),
        _ => None,
    }
}

/// Per-connection framing and resource limits.
///
/// # Example
///
/// ```
/// use actornet_common::transport::TransportConfig;
///
/// let config = TransportConfig {
///     max_conn_num: 0,
///     len_msg_len: 1,
///     max_msg_len: 70_000,
///     ..TransportConfig::default()
/// }
/// .normalized();
///
/// assert_eq!(config.max_conn_num, 1_000_000);
/// assert_eq!(config.max_msg_len, 255);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Live connections a server accepts before refusing new ones
    pub max_conn_num: usize,
    /// Capacity of each connection's outbound queue
    pub pending_write_num: usize,
    /// Width of the length prefix in bytes (1, 2 or 4)
    pub len_msg_len: usize,
    /// Smallest accepted payload length
    pub min_msg_len: u32,
    /// Largest accepted payload length
    pub max_msg_len: u32,
    /// Byte order of the length prefix
    pub little_endian: bool,
    /// Deadline for reading one frame, in milliseconds
    pub read_deadline_ms: u64,
    /// Deadline for writing one frame, in milliseconds
    pub write_deadline_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_conn_num: DEFAULT_MAX_CONN_NUM,
            pending_write_num: DEFAULT_PENDING_WRITE_NUM,
            len_msg_len: DEFAULT_LEN_MSG_LEN,
            min_msg_len: DEFAULT_MIN_MSG_LEN,
            max_msg_len: DEFAULT_MAX_MSG_LEN,
            little_endian: false,
            read_deadline_ms: DEFAULT_READ_DEADLINE_MS,
            write_deadline_ms: DEFAULT_WRITE_DEADLINE_MS,
        }
    }
}

impl TransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_conn_num(mut self, max_conn_num: usize) -> Self {
        self.max_conn_num = max_conn_num;
        self
    }

    pub fn with_pending_write_num(mut self, pending_write_num: usize) -> Self {
        self.pending_write_num = pending_write_num;
        self
    }

    pub fn with_msg_len(mut self, len_msg_len: usize, min_msg_len: u32, max_msg_len: u32) -> Self {
        self.len_msg_len = len_msg_len;
        self.min_msg_len = min_msg_len;
        self.max_msg_len = max_msg_len;
        self
    }

    pub fn with_little_endian(mut self, little_endian: bool) -> Self {
        self.little_endian = little_endian;
        self
    }

    pub fn with_read_deadline(mut self, deadline: Duration) -> Self {
        self.read_deadline_ms = deadline.as_millis() as u64;
        self
    }

    pub fn with_write_deadline(mut self, deadline: Duration) -> Self {
        self.write_deadline_ms = deadline.as_millis() as u64;
        self
    }

    pub fn read_deadline(&self) -> Duration {
        Duration::from_millis(self.read_deadline_ms)
    }

    pub fn write_deadline(&self) -> Duration {
        Duration::from_millis(self.write_deadline_ms)
    }

    /// Returns a copy with every unset or invalid value replaced by its default.
    ///
    /// `max_msg_len` is additionally capped at what the prefix width can
    /// represent, and `min_msg_len` may never exceed `max_msg_len`.
    pub fn normalized(&self) -> Self {
        let mut config = self.clone();

        if config.max_conn_num == 0 {
            config.max_conn_num = DEFAULT_MAX_CONN_NUM;
            tracing::debug!(max_conn_num = config.max_conn_num, "invalid max_conn_num, reset");
        }

        if config.pending_write_num == 0 {
            config.pending_write_num = DEFAULT_PENDING_WRITE_NUM;
            tracing::debug!(
                pending_write_num = config.pending_write_num,
                "invalid pending_write_num, reset"
            );
        }

        let width_max = match max_len_for_width(config.len_msg_len) {
            Some(max) => max,
            None => {
                config.len_msg_len = DEFAULT_LEN_MSG_LEN;
                tracing::debug!(len_msg_len = config.len_msg_len, "invalid len_msg_len, reset");
                u16::MAX as u32
            }
        };

        if config.max_msg_len == 0 {
            config.max_msg_len = DEFAULT_MAX_MSG_LEN;
            tracing::debug!(max_msg_len = config.max_msg_len, "invalid max_msg_len, reset");
        }

        if config.max_msg_len > width_max {
            config.max_msg_len = width_max;
            tracing::debug!(max_msg_len = width_max, "max_msg_len exceeds prefix width, reset");
        }

        if config.min_msg_len == 0 {
            config.min_msg_len = DEFAULT_MIN_MSG_LEN;
            tracing::debug!(min_msg_len = config.min_msg_len, "invalid min_msg_len, reset");
        }

        if config.min_msg_len > config.max_msg_len {
            config.min_msg_len = DEFAULT_MIN_MSG_LEN.min(config.max_msg_len);
            tracing::debug!(min_msg_len = config.min_msg_len, "min_msg_len exceeds max_msg_len, reset");
        }

        if config.write_deadline_ms == 0 {
            config.write_deadline_ms = DEFAULT_WRITE_DEADLINE_MS;
            tracing::debug!(write_deadline_ms = config.write_deadline_ms, "invalid write deadline, reset");
        }

        if config.read_deadline_ms == 0 {
            config.read_deadline_ms = DEFAULT_READ_DEADLINE_MS;
            tracing::debug!(read_deadline_ms = config.read_deadline_ms, "invalid read deadline, reset");
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TransportConfig::default();
        assert_eq!(config.max_conn_num, 1_000_000);
        assert_eq!(config.pending_write_num, 100_000);
        assert_eq!(config.len_msg_len, 2);
        assert_eq!(config.min_msg_len, 2);
        assert_eq!(config.max_msg_len, 65_535);
        assert_eq!(config.read_deadline(), Duration::from_secs(30));
        assert_eq!(config.write_deadline(), Duration::from_secs(30));
    }

    #[test]
    fn test_default_is_already_normalized() {
        let config = TransportConfig::default();
        assert_eq!(config.normalized(), config);
    }

    #[test]
    fn test_zero_values_reset() {
        let config = TransportConfig {
            max_conn_num: 0,
            pending_write_num: 0,
            len_msg_len: 0,
            min_msg_len: 0,
            max_msg_len: 0,
            little_endian: true,
            read_deadline_ms: 0,
            write_deadline_ms: 0,
        }
        .normalized();

        assert_eq!(config.max_conn_num, DEFAULT_MAX_CONN_NUM);
        assert_eq!(config.pending_write_num, DEFAULT_PENDING_WRITE_NUM);
        assert_eq!(config.len_msg_len, DEFAULT_LEN_MSG_LEN);
        assert_eq!(config.min_msg_len, DEFAULT_MIN_MSG_LEN);
        assert_eq!(config.max_msg_len, DEFAULT_MAX_MSG_LEN);
        assert!(config.little_endian);
        assert_eq!(config.read_deadline_ms, DEFAULT_READ_DEADLINE_MS);
        assert_eq!(config.write_deadline_ms, DEFAULT_WRITE_DEADLINE_MS);
    }

    #[test]
    fn test_max_msg_len_capped_by_width() {
        let config = TransportConfig::new().with_msg_len(1, 2, 1000).normalized();
        assert_eq!(config.max_msg_len, 255);

        let config = TransportConfig::new().with_msg_len(4, 2, 10_000_000).normalized();
        assert_eq!(config.max_msg_len, 10_000_000);
    }

    #[test]
    fn test_invalid_width_reset() {
        let config = TransportConfig::new().with_msg_len(3, 2, 100).normalized();
        assert_eq!(config.len_msg_len, 2);
        assert_eq!(config.max_msg_len, 100);
    }

    #[test]
    fn test_min_above_max_reset() {
        let config = TransportConfig::new().with_msg_len(2, 500, 100).normalized();
        assert_eq!(config.min_msg_len, 2);
        assert_eq!(config.max_msg_len, 100);
    }

    #[test]
    fn test_builder_pattern_chaining() {
        let config = TransportConfig::new()
            .with_max_conn_num(10)
            .with_pending_write_num(16)
            .with_little_endian(true)
            .with_read_deadline(Duration::from_millis(1500))
            .with_write_deadline(Duration::from_secs(2));

        assert_eq!(config.max_conn_num, 10);
        assert_eq!(config.pending_write_num, 16);
        assert!(config.little_endian);
        assert_eq!(config.read_deadline_ms, 1500);
        assert_eq!(config.write_deadline_ms, 2000);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: TransportConfig =
            serde_json::from_str(r#"{"max_conn_num": 5, "little_endian": true}"#).unwrap();
        assert_eq!(config.max_conn_num, 5);
        assert!(config.little_endian);
        assert_eq!(config.pending_write_num, DEFAULT_PENDING_WRITE_NUM);
    }
}
