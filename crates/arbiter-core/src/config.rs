use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::types::TierTable;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Hard floor for the Argon2 memory parameter. Below this a verification
/// finishes well under the 50 ms target on commodity hardware.
pub const MIN_KDF_MIB: u32 = 19;

/// Minimum entropy for the session secret; the process refuses to boot
/// with anything shorter.
pub const MIN_SECRET_LEN: usize = 32;

/// Trimmed chat message bounds enforced by the schema validator.
pub const MESSAGE_MAX_CHARS: usize = 4000;

/// Output sanitizer truncation point (code points).
pub const RESPONSE_MAX_CHARS: usize = 10_000;

/// Top-level config (arbiter.toml + ARBITER_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbiterConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub tiers: TierTable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Allowed CORS origin for the browser client.
    #[serde(default)]
    pub origin: Option<String>,
    /// Development mode: error bodies include backtrace detail.
    #[serde(default)]
    pub dev: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            origin: None,
            dev: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Session secret — at least 32 chars, checked at load.
    pub secret: String,
    /// Argon2 memory cost in MiB. Floored at `MIN_KDF_MIB`.
    #[serde(default = "default_kdf_mib")]
    pub memory: u32,
    /// Rolling session lifetime in days.
    #[serde(default = "default_session_days")]
    pub days: u32,
    /// Concurrent KDF verifications allowed — password hashing is CPU-bound
    /// and must not starve request handlers.
    #[serde(default = "default_kdf_parallel")]
    pub parallel: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Upstream completion API key.
    pub key: String,
    /// Model identifier sent to the upstream. Unknown models fail closed in
    /// the pricing table.
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base: String,
    /// Hard deadline for one completion call, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Process-wide daily spend ceiling, in millicents (1/100 000 dollar).
    #[serde(default = "default_daily_budget")]
    pub daily: u64,
    /// Alert thresholds as CSV percentages, e.g. "50,75,90".
    #[serde(default = "default_thresholds")]
    pub thresholds: String,
    /// Per-conversation cumulative token cap before summarize-and-continue.
    #[serde(default = "default_saturation")]
    pub saturation: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily: default_daily_budget(),
            thresholds: default_thresholds(),
            saturation: default_saturation(),
        }
    }
}

impl BudgetConfig {
    /// Parse the CSV threshold list into ascending percentages.
    pub fn alert_thresholds(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for part in self.thresholds.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let pct: u8 = part.parse().map_err(|_| {
                GatewayError::Config(format!("bad alert threshold '{part}' (want 1-100)"))
            })?;
            if pct == 0 || pct > 100 {
                return Err(GatewayError::Config(format!(
                    "alert threshold {pct} out of range 1-100"
                )));
            }
            out.push(pct);
        }
        out.sort_unstable();
        out.dedup();
        Ok(out)
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.arbiter/arbiter.db", home)
}
fn default_kdf_mib() -> u32 {
    MIN_KDF_MIB
}
fn default_session_days() -> u32 {
    7
}
fn default_kdf_parallel() -> usize {
    2
}
fn default_model() -> String {
    "claude-sonnet-4-6".to_string()
}
fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_daily_budget() -> u64 {
    1_000_000 // $10.00/day
}
fn default_thresholds() -> String {
    "50,75,90".to_string()
}
fn default_saturation() -> u64 {
    150_000
}

impl ArbiterConfig {
    /// Load config from a TOML file with ARBITER_* env var overrides, then
    /// fail-fast validate. Checks in order: explicit path argument, then
    /// ~/.arbiter/arbiter.toml.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: ArbiterConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("ARBITER_").split("_"))
            .extract()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Startup invariants. A bad value here is a refusal to boot, not a
    /// degraded run.
    pub fn validate(&self) -> Result<()> {
        if self.auth.secret.len() < MIN_SECRET_LEN {
            return Err(GatewayError::Config(format!(
                "auth.secret must be at least {MIN_SECRET_LEN} chars"
            )));
        }
        if self.auth.memory < MIN_KDF_MIB {
            return Err(GatewayError::Config(format!(
                "auth.memory {} MiB is below the {MIN_KDF_MIB} MiB floor",
                self.auth.memory
            )));
        }
        if self.upstream.key.is_empty() {
            return Err(GatewayError::Config("upstream.key is required".into()));
        }
        let thresholds = self.budget.alert_thresholds()?;
        if thresholds.is_empty() {
            return Err(GatewayError::Config(
                "budget.thresholds must name at least one percentage".into(),
            ));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.arbiter/arbiter.toml", home)
}
