use std::sync::Arc;
use std::time::Duration;

use ring::rand::{SecureRandom, SystemRandom};
use tracing::{debug, info, instrument, warn};

use arbiter_core::error::{GatewayError, Result};
use arbiter_core::types::{Principal, Tier};
use arbiter_kv::KvStore;
use arbiter_users::error::UserError;
use arbiter_users::vault::{validate_email, validate_strength};
use arbiter_users::{CredentialVault, UserStore};

/// Bytes of entropy per session token (hex-encoded on the wire).
const TOKEN_BYTES: usize = 32;

fn sess_key(token: &str) -> String {
    format!("sess:{token}")
}

/// Issues, resolves, and destroys opaque session tokens.
///
/// Verification cost note: `register` and `login` run the Argon2 KDF and are
/// CPU-bound for tens of milliseconds — callers on the async surface run
/// them under `spawn_blocking` with a parallelism cap.
pub struct SessionManager {
    kv: Arc<KvStore>,
    users: Arc<UserStore>,
    vault: Arc<CredentialVault>,
    ttl: Duration,
    rng: SystemRandom,
}

impl SessionManager {
    pub fn new(
        kv: Arc<KvStore>,
        users: Arc<UserStore>,
        vault: Arc<CredentialVault>,
        ttl_days: u32,
    ) -> Self {
        Self {
            kv,
            users,
            vault,
            ttl: Duration::from_secs(u64::from(ttl_days) * 86_400),
            rng: SystemRandom::new(),
        }
    }

    /// Create an account and log it straight in.
    ///
    /// Failure modes, all mapped to field-level validation errors: malformed
    /// email, weak password (full error list), email already taken.
    #[instrument(skip(self, password))]
    pub fn register(&self, email: &str, password: &str) -> Result<(String, Principal)> {
        let email = email.trim().to_lowercase();
        if !validate_email(&email) {
            return Err(GatewayError::field("email", "Enter a valid email address"));
        }
        let weaknesses = validate_strength(password);
        if !weaknesses.is_empty() {
            return Err(GatewayError::Validation {
                details: weaknesses
                    .into_iter()
                    .map(|m| arbiter_core::error::FieldError::new("password", m))
                    .collect(),
            });
        }

        let digest = self
            .vault
            .hash(password)
            .map_err(|e| GatewayError::Internal(e.to_string()))?;

        let user = match self.users.create(&email, &digest) {
            Ok(u) => u,
            Err(UserError::EmailTaken) => {
                return Err(GatewayError::field("email", "Email is already registered"));
            }
            Err(e) => return Err(GatewayError::Internal(e.to_string())),
        };

        let principal = Principal {
            user_id: user.id,
            email: user.email,
            tier: user.tier,
        };
        let token = self.issue(&principal)?;
        info!(user_id = %principal.user_id, "registered");
        Ok((token, principal))
    }

    /// Verify credentials and mint a session.
    ///
    /// Unknown email and wrong password are indistinguishable to the caller:
    /// same error, and the KDF runs in both branches so timing does not
    /// become an enumeration oracle.
    #[instrument(skip(self, password))]
    pub fn login(&self, email: &str, password: &str) -> Result<(String, Principal)> {
        let email = email.trim().to_lowercase();

        let user = self
            .users
            .find_by_email(&email)
            .map_err(|e| GatewayError::Internal(e.to_string()))?;

        let user = match user {
            Some(u) => u,
            None => {
                self.vault.verify_decoy(password);
                return Err(GatewayError::InvalidCredentials);
            }
        };

        if !self.vault.verify(password, &user.password_hash) {
            return Err(GatewayError::InvalidCredentials);
        }

        let principal = Principal {
            user_id: user.id,
            email: user.email,
            tier: user.tier,
        };
        let token = self.issue(&principal)?;
        debug!(user_id = %principal.user_id, "login");
        Ok((token, principal))
    }

    /// Destroy the presented session. Unknown tokens are a no-op — logout is
    /// idempotent.
    pub fn logout(&self, token: &str) {
        self.kv.del(&sess_key(token));
    }

    /// Resolve a token to its principal.
    ///
    /// Live session + live user: refreshes the rolling TTL, re-reads the
    /// tier from the user row (an upgrade applies immediately), and returns
    /// the principal. A session whose user is gone is destroyed on the spot.
    pub fn resolve(&self, token: &str) -> Option<Principal> {
        let key = sess_key(token);
        let blob = self.kv.get(&key)?;
        let mut principal: Principal = match serde_json::from_str(&blob) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "corrupt session blob; destroying");
                self.kv.del(&key);
                return None;
            }
        };

        match self.users.get(&principal.user_id) {
            Ok(Some(user)) => {
                principal.tier = user.tier;
                self.kv.expire(&key, self.ttl);
                Some(principal)
            }
            _ => {
                // User soft-deleted or lookup failed: the session must die.
                self.kv.del(&key);
                None
            }
        }
    }

    /// Tier gate used by admission filters. Ordering is
    /// anonymous < free < premium < enterprise.
    pub fn require_tier(principal: &Principal, min: Tier) -> Result<()> {
        if principal.tier.rank() >= min.rank() {
            Ok(())
        } else {
            Err(GatewayError::InsufficientTier {
                required: min,
                current: principal.tier,
            })
        }
    }

    fn issue(&self, principal: &Principal) -> Result<String> {
        let mut bytes = [0u8; TOKEN_BYTES];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| GatewayError::Internal("token entropy unavailable".into()))?;
        let token = hex::encode(bytes);
        let blob = serde_json::to_string(principal)
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        self.kv.set_ex(&sess_key(&token), &blob, self.ttl);
        Ok(token)
    }
}
