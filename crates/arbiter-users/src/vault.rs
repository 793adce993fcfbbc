//! Password custody: Argon2id hashing, the strength policy, and the
//! email-shape check. The vault never surfaces whether an account exists —
//! strength errors talk about the password, nothing else.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

use arbiter_core::config::MIN_KDF_MIB;

use crate::error::{Result, UserError};

const PASSWORD_MIN: usize = 12;
const PASSWORD_MAX: usize = 128;
const EMAIL_MAX: usize = 255;

/// Substring blocklist of the most common leaked passwords. A candidate
/// containing any of these fails the strength policy outright.
const COMMON_PASSWORDS: &[&str] = &[
    "password",
    "123456",
    "12345678",
    "qwerty",
    "letmein",
    "welcome",
    "iloveyou",
    "admin",
    "monkey",
    "dragon",
    "abc123",
    "football",
    "baseball",
    "sunshine",
    "princess",
];

pub struct CredentialVault {
    hasher: Argon2<'static>,
    /// Digest of a throwaway password, verified against when login hits an
    /// unknown email so both branches pay the same KDF cost.
    decoy: String,
}

impl CredentialVault {
    /// Build a vault with the given Argon2 memory cost in MiB. Values below
    /// the floor are raised to it — the cost parameter is configurable but
    /// may never make verification cheap.
    pub fn new(memory_mib: u32) -> Result<Self> {
        let m_kib = memory_mib.max(MIN_KDF_MIB) * 1024;
        let params = Params::new(m_kib, 2, 1, None)
            .map_err(|e| UserError::Hash(e.to_string()))?;
        let hasher = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let salt = SaltString::generate(&mut OsRng);
        let decoy = hasher
            .hash_password(b"arbiter-decoy-verification-subject", &salt)
            .map_err(|e| UserError::Hash(e.to_string()))?
            .to_string();
        Ok(Self { hasher, decoy })
    }

    /// Hash a password into a PHC string (salt + params embedded).
    pub fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        Ok(self
            .hasher
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| UserError::Hash(e.to_string()))?
            .to_string())
    }

    /// Verify a password against a stored digest. Malformed digests verify
    /// as false rather than erroring — a corrupt row must not become an
    /// account-existence oracle.
    pub fn verify(&self, password: &str, digest: &str) -> bool {
        match PasswordHash::new(digest) {
            Ok(parsed) => self
                .hasher
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }

    /// Burn one KDF verification without a real account. Login calls this on
    /// unknown emails so timing matches the known-email branch.
    pub fn verify_decoy(&self, password: &str) {
        let _ = self.verify(password, &self.decoy);
    }
}

/// Apply the strength policy. Returns the full list of failures — empty
/// means acceptable.
pub fn validate_strength(password: &str) -> Vec<String> {
    let mut errors = Vec::new();
    let len = password.chars().count();

    if len < PASSWORD_MIN {
        errors.push(format!(
            "Password must be at least {PASSWORD_MIN} characters long"
        ));
    }
    if len > PASSWORD_MAX {
        errors.push(format!(
            "Password must be at most {PASSWORD_MAX} characters long"
        ));
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        errors.push("Password must contain a lowercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        errors.push("Password must contain an uppercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        errors.push("Password must contain a digit".to_string());
    }
    if !password.chars().any(|c| !c.is_alphanumeric()) {
        errors.push("Password must contain a symbol".to_string());
    }

    let lowered = password.to_lowercase();
    if COMMON_PASSWORDS.iter().any(|c| lowered.contains(c)) {
        errors.push("Password is too close to a commonly used password".to_string());
    }

    errors
}

/// Syntactic email check: ≤255 chars, exactly one `@` between a nonempty
/// local part and a dotted domain. Callers lowercase before storing.
pub fn validate_email(email: &str) -> bool {
    if email.is_empty() || email.chars().count() > EMAIL_MAX {
        return false;
    }
    let mut parts = email.splitn(3, '@');
    let local = parts.next().unwrap_or("");
    let domain = match parts.next() {
        Some(d) => d,
        None => return false,
    };
    if parts.next().is_some() {
        // more than one '@'
        return false;
    }
    if local.is_empty() || domain.is_empty() {
        return false;
    }
    // Dotted domain: at least one dot, no empty labels.
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|l| !l.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Keep the KDF cheap-ish in tests; the floor still applies.
    fn vault() -> CredentialVault {
        CredentialVault::new(MIN_KDF_MIB).expect("vault init")
    }

    #[test]
    fn hash_then_verify_roundtrip() {
        let v = vault();
        let digest = v.hash("Correct-Horse-9!").unwrap();
        assert!(v.verify("Correct-Horse-9!", &digest));
        assert!(!v.verify("correct-horse-9!", &digest));
    }

    #[test]
    fn malformed_digest_verifies_false() {
        let v = vault();
        assert!(!v.verify("whatever", "not-a-phc-string"));
    }

    #[test]
    fn strength_accepts_good_password() {
        assert!(validate_strength("Aaaaaaaaa1!x").is_empty());
    }

    #[test]
    fn strength_boundary_lengths() {
        // 11 chars fails, 12 passes; 128 passes, 129 fails.
        assert!(!validate_strength("Aaaaaaaa1!x").is_empty());
        assert!(validate_strength("Aaaaaaaaa1!x").is_empty());
        let base = "Aa1!";
        let ok = format!("{}{}", base, "x".repeat(124));
        assert_eq!(ok.chars().count(), 128);
        assert!(validate_strength(&ok).is_empty());
        let long = format!("{}{}", base, "x".repeat(125));
        assert!(!validate_strength(&long).is_empty());
    }

    #[test]
    fn strength_requires_all_classes() {
        assert!(validate_strength("aaaaaaaaaaa1!")
            .iter()
            .any(|e| e.contains("uppercase")));
        assert!(validate_strength("AAAAAAAAAAA1!")
            .iter()
            .any(|e| e.contains("lowercase")));
        assert!(validate_strength("Aaaaaaaaaaaa!")
            .iter()
            .any(|e| e.contains("digit")));
        assert!(validate_strength("Aaaaaaaaaaaa1")
            .iter()
            .any(|e| e.contains("symbol")));
    }

    #[test]
    fn strength_blocks_common_substrings() {
        assert!(!validate_strength("MyPassword123!x").is_empty());
        assert!(!validate_strength("Qwerty!9qwerty").is_empty());
    }

    #[test]
    fn email_shapes() {
        assert!(validate_email("a@b.co"));
        assert!(validate_email("user.name@sub.example.com"));
        assert!(!validate_email(""));
        assert!(!validate_email("nodomain@"));
        assert!(!validate_email("@nolocal.com"));
        assert!(!validate_email("two@@ats.com"));
        assert!(!validate_email("a@b@c.com"));
        assert!(!validate_email("plain"));
        assert!(!validate_email("a@nodot"));
        assert!(!validate_email("a@dot..dot.com"));
        let long = format!("{}@example.com", "x".repeat(250));
        assert!(!validate_email(&long));
    }
}
