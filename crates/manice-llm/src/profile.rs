//! Model tiers and per-tier model profiles

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Which of the two model classes serves a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Slower reasoning model for analysis-heavy requests
    Large,
    /// Fast model for simple edits and formulas
    Small,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Large => "large",
            ModelTier::Small => "small",
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for one locally hosted model.
///
/// Field names on the wire follow the server configuration keys
/// (`name`, `max_tokens`, `timeout`, `memory_gb`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Display identifier reported as `model_used`
    #[serde(rename = "name")]
    pub identifier: String,
    /// Tier this profile serves
    pub tier: ModelTier,
    /// Model name as known to the backend (e.g. "phi3:medium")
    pub model_path: String,
    /// Maximum tokens to generate
    #[serde(rename = "max_tokens")]
    pub max_output_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Per-request deadline in seconds
    #[serde(rename = "timeout")]
    pub timeout_seconds: u64,
    /// Memory the backend is expected to need for this model
    #[serde(rename = "memory_gb")]
    pub memory_budget_gb: f32,
}

impl ModelProfile {
    /// Default large-tier profile, sized for 8 GB machines
    pub fn large() -> Self {
        Self {
            identifier: "phi3-medium".to_string(),
            tier: ModelTier::Large,
            model_path: "phi3:medium".to_string(),
            max_output_tokens: 4096,
            temperature: 0.3,
            timeout_seconds: 45,
            memory_budget_gb: 4.0,
        }
    }

    /// Default small-tier profile
    pub fn small() -> Self {
        Self {
            identifier: "phi3-mini".to_string(),
            tier: ModelTier::Small,
            model_path: "phi3:mini".to_string(),
            max_output_tokens: 2048,
            temperature: 0.5,
            timeout_seconds: 15,
            memory_budget_gb: 2.0,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// The pair of profiles, one per tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfiles {
    pub large: ModelProfile,
    pub small: ModelProfile,
}

impl ModelProfiles {
    pub fn new(large: ModelProfile, small: ModelProfile) -> Self {
        Self { large, small }
    }

    /// Resolve the profile for a tier
    pub fn for_tier(&self, tier: ModelTier) -> &ModelProfile {
        match tier {
            ModelTier::Large => &self.large,
            ModelTier::Small => &self.small,
        }
    }
}

impl Default for ModelProfiles {
    fn default() -> Self {
        Self::new(ModelProfile::large(), ModelProfile::small())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_lookup_by_tier() {
        let profiles = ModelProfiles::default();
        assert_eq!(profiles.for_tier(ModelTier::Large).model_path, "phi3:medium");
        assert_eq!(profiles.for_tier(ModelTier::Small).model_path, "phi3:mini");
    }

    #[test]
    fn test_profile_uses_config_key_names() {
        let json = serde_json::to_value(ModelProfile::small()).unwrap();
        assert_eq!(json["name"], "phi3-mini");
        assert_eq!(json["max_tokens"], 2048);
        assert_eq!(json["timeout"], 15);
        assert_eq!(json["tier"], "small");
    }
}
