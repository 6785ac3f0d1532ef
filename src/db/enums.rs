use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Reachability verdict stored in `discoveries.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryStatus {
    Pending,
    Up,
    Down,
}

impl DiscoveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryStatus::Pending => "pending",
            DiscoveryStatus::Up => "up",
            DiscoveryStatus::Down => "down",
        }
    }
}

impl FromStr for DiscoveryStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DiscoveryStatus::Pending),
            "up" => Ok(DiscoveryStatus::Up),
            "down" => Ok(DiscoveryStatus::Down),
            _ => Err(()),
        }
    }
}

impl fmt::Display for DiscoveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
