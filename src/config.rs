use std::fmt::Debug;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Tuning knobs for a store's watch subsystem.
///
/// Deserializable so embedding applications can splice it into their own
/// configuration tree; all fields fall back to defaults when omitted.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoreConfig {
    /// Admission ceiling: the maximum number of concurrently registered
    /// watchers. Exceeding it fails admission, it does not block or
    /// evict.
    #[serde(default = "default_max_watchers")]
    pub max_watchers: usize,

    /// Capacity of the consumer-facing event channel handed out by
    /// `watch`. A slow consumer applies backpressure to the dispatch
    /// loop once this many events are in flight.
    #[serde(default = "default_watch_channel_capacity")]
    pub watch_channel_capacity: usize,
}

fn default_max_watchers() -> usize {
    64
}

fn default_watch_channel_capacity() -> usize {
    1
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_watchers: default_max_watchers(),
            watch_channel_capacity: default_watch_channel_capacity(),
        }
    }
}

impl StoreConfig {
    /// Validates the configuration before a store is built with it.
    pub fn validate(&self) -> Result<()> {
        if self.max_watchers == 0 {
            return Err(Error::Config(
                "max_watchers must be greater than 0".into(),
            ));
        }
        if self.watch_channel_capacity == 0 {
            return Err(Error::Config(
                "watch_channel_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_should_initialize_with_hardcoded_values() {
        let config = StoreConfig::default();

        assert_eq!(config.max_watchers, 64);
        assert_eq!(config.watch_channel_capacity, 1);
    }

    #[test]
    fn omitted_fields_should_fall_back_to_defaults() {
        let config: StoreConfig = serde_json::from_str(r#"{ "max_watchers": 8 }"#).unwrap();

        assert_eq!(config.max_watchers, 8);
        assert_eq!(config.watch_channel_capacity, 1);
    }

    #[test]
    fn zero_ceiling_should_fail_validation() {
        let config = StoreConfig {
            max_watchers: 0,
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }
}
