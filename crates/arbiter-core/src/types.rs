use serde::{Deserialize, Serialize};
use std::fmt;

/// Admission class of a principal. Ordering matters: quota checks compare
/// tiers with `rank()`, so variants are declared lowest-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Anonymous,
    Free,
    Premium,
    Enterprise,
}

impl Tier {
    /// Numeric rank for tier comparisons: anonymous < free < premium < enterprise.
    pub fn rank(&self) -> u8 {
        match self {
            Tier::Anonymous => 0,
            Tier::Free => 1,
            Tier::Premium => 2,
            Tier::Enterprise => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Anonymous => "anonymous",
            Tier::Free => "free",
            Tier::Premium => "premium",
            Tier::Enterprise => "enterprise",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "anonymous" => Some(Tier::Anonymous),
            "free" => Some(Tier::Free),
            "premium" => Some(Tier::Premium),
            "enterprise" => Some(Tier::Enterprise),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-tier admission limits. All counts are per UTC calendar day except
/// `ip_per_minute`, which is a rolling 60-second window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierLimits {
    pub requests_per_day: u64,
    pub tokens_per_day: u64,
    pub max_output_tokens: u32,
    pub ip_per_minute: u64,
}

/// The closed set of per-tier limits. Tiers form a small fixed enum, so this
/// is a record per tag rather than anything polymorphic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierTable {
    pub anonymous: TierLimits,
    pub free: TierLimits,
    pub premium: TierLimits,
    pub enterprise: TierLimits,
}

impl TierTable {
    pub fn limits(&self, tier: Tier) -> &TierLimits {
        match tier {
            Tier::Anonymous => &self.anonymous,
            Tier::Free => &self.free,
            Tier::Premium => &self.premium,
            Tier::Enterprise => &self.enterprise,
        }
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            anonymous: TierLimits {
                requests_per_day: 3,
                tokens_per_day: 10_000,
                max_output_tokens: 1_000,
                ip_per_minute: 10,
            },
            free: TierLimits {
                requests_per_day: 50,
                tokens_per_day: 100_000,
                max_output_tokens: 2_000,
                ip_per_minute: 10,
            },
            premium: TierLimits {
                requests_per_day: 500,
                tokens_per_day: 1_000_000,
                max_output_tokens: 4_000,
                ip_per_minute: 10,
            },
            enterprise: TierLimits {
                requests_per_day: 10_000,
                tokens_per_day: 10_000_000,
                max_output_tokens: 8_000,
                ip_per_minute: 10,
            },
        }
    }
}

/// The authenticated identity attached to a request after session resolve.
/// This is exactly the blob stored under the session token in the KV store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: String,
    pub email: String,
    pub tier: Tier,
}
