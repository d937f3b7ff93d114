//! # config
//!
//! why: tune how recovery treats legacy storage
//! relations: owned by the RecoveryCoordinator
//! what: RecoveryConfig, LegacyStatePolicy

use serde::{Deserialize, Serialize};

/// What to do with the raw state bytes of a legacy snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegacyStatePolicy {
    /// discard the bytes; the cohort state is rebuilt by replay and captured afresh
    #[default]
    Regenerate,
    /// ask the cohort to decode the bytes first, falling back to regenerate
    Decode,
}

/// Configuration for startup recovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// rewrite storage into the current format when legacy records are seen
    pub migrate_on_recovery: bool,
    pub legacy_state: LegacyStatePolicy,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            migrate_on_recovery: true,
            legacy_state: LegacyStatePolicy::Regenerate,
        }
    }
}

impl RecoveryConfig {
    /// parse from json; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
