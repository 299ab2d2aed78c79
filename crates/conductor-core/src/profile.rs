use crate::ConductorError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A named cost/quality tradeoff used by the router to pick a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingProfile {
    /// Prefer local, zero-marginal-cost providers.
    Cheap,
    /// The profile's preferred model, else the head of the fallback chain.
    #[default]
    Balanced,
    /// Prefer hosted, higher-capability providers.
    Premium,
}

impl RoutingProfile {
    /// All profiles, in cost order.
    pub const ALL: [RoutingProfile; 3] = [
        RoutingProfile::Cheap,
        RoutingProfile::Balanced,
        RoutingProfile::Premium,
    ];

    /// The lowercase profile name used in configuration and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingProfile::Cheap => "cheap",
            RoutingProfile::Balanced => "balanced",
            RoutingProfile::Premium => "premium",
        }
    }
}

impl std::fmt::Display for RoutingProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingProfile {
    type Err = ConductorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cheap" => Ok(RoutingProfile::Cheap),
            "balanced" => Ok(RoutingProfile::Balanced),
            "premium" => Ok(RoutingProfile::Premium),
            other => Err(ConductorError::Validation(format!(
                "invalid profile '{other}': expected cheap, balanced or premium"
            ))),
        }
    }
}
