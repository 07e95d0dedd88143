//! Cache configuration.
//!
//! Controls expiry defaults and request fencing via the `[cache]` settings section.

use serde::Deserialize;

use super::entry::DEFAULT_EXPIRES_IN_SECS;

/// Cache configuration shared by every TTL store.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Expiry applied when a Set/Append event carries none.
    pub default_expires_in_seconds: u64,
    /// Drop terminal events whose epoch was superseded by a newer request.
    pub fencing: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_expires_in_seconds: DEFAULT_EXPIRES_IN_SECS,
            fencing: true,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            default_expires_in_seconds: settings.default_expires_in_seconds.get(),
            fencing: settings.fencing,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU64;

    use super::*;
    use crate::config::CacheSettings;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.default_expires_in_seconds, 3600);
        assert!(config.fencing);
    }

    #[test]
    fn built_from_settings() {
        let settings = CacheSettings {
            default_expires_in_seconds: NonZeroU64::new(90).expect("non-zero"),
            fencing: false,
        };
        let config = CacheConfig::from(&settings);
        assert_eq!(config.default_expires_in_seconds, 90);
        assert!(!config.fencing);
    }

    #[test]
    fn deserializes_partial_sections() {
        let config: CacheConfig =
            serde_json::from_str(r#"{"fencing": false}"#).expect("partial config parses");
        assert_eq!(config.default_expires_in_seconds, DEFAULT_EXPIRES_IN_SECS);
        assert!(!config.fencing);
    }
}
