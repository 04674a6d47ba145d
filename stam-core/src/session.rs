//! Per-connection login scratch data.
//!
//! The password is never sent. The login carries a blake3 keyed hash of
//! the password, keyed by a key derived from the salt and the random
//! challenge handed out with the session port.

use std::fmt;
use std::time::Instant;

/// Context string for deriving the login key.
const LOGIN_KEY_CONTEXT: &str = "StamOrga 2017 login material v1";

/// Hex encoded keyed hash of `password` for one `(salt, random)` pair.
pub fn login_material(password: &str, salt: &str, random: &str) -> String {
    let mut key_input = Vec::with_capacity(salt.len() + random.len() + 1);
    key_input.extend_from_slice(salt.as_bytes());
    key_input.push(0);
    key_input.extend_from_slice(random.as_bytes());
    let key = blake3::derive_key(LOGIN_KEY_CONTEXT, &key_input);
    blake3::keyed_hash(&key, password.as_bytes())
        .to_hex()
        .to_string()
}

#[derive(Clone, Default)]
pub struct SessionCredentials {
    user_name: String,
    password: String,
    salt: String,
    random: String,
    last_success: Option<Instant>,
}

impl SessionCredentials {
    pub fn new(user_name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// Same user and password.
    pub fn matches(&self, user_name: &str, password: &str) -> bool {
        self.user_name == user_name && self.password == password
    }

    /// Store the challenge that came with the session port.
    pub fn set_challenge(&mut self, salt: impl Into<String>, random: impl Into<String>) {
        self.salt = salt.into();
        self.random = random.into();
    }

    /// Material for the login request.
    pub fn material(&self) -> String {
        login_material(&self.password, &self.salt, &self.random)
    }

    /// Material for an arbitrary password under the current challenge.
    pub fn material_for(&self, password: &str) -> String {
        login_material(password, &self.salt, &self.random)
    }

    /// Adopt a new password after the server accepted a change.
    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = password.into();
    }

    pub fn mark_success(&mut self, now: Instant) {
        self.last_success = Some(now);
    }

    /// Forget the last success so the next request logs in again.
    pub fn reset_success(&mut self) {
        self.last_success = None;
    }

    pub fn last_success(&self) -> Option<Instant> {
        self.last_success
    }

    /// Copy without the secret parts.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            user_name: self.user_name.clone(),
            has_challenge: !self.salt.is_empty() || !self.random.is_empty(),
            last_success: self.last_success,
        }
    }
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("user_name", &self.user_name)
            .field("password", &"<redacted>")
            .field("last_success", &self.last_success)
            .finish()
    }
}

/// Redacted view of the credentials, safe to hand to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub user_name: String,
    pub has_challenge: bool,
    pub last_success: Option<Instant>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn material_depends_on_challenge() {
        let a = login_material("secret", "salt", "r1");
        let b = login_material("secret", "salt", "r2");
        assert_ne!(a, b);
        assert_eq!(a, login_material("secret", "salt", "r1"));
        assert_eq!(a.len(), 64);
        assert!(!a.contains("secret"));
    }

    #[test]
    fn salt_random_boundary_is_unambiguous() {
        assert_ne!(
            login_material("pw", "ab", "c"),
            login_material("pw", "a", "bc")
        );
    }

    #[test]
    fn credentials_material_uses_challenge() {
        let mut creds = SessionCredentials::new("alice", "pw");
        creds.set_challenge("s", "r");
        assert_eq!(creds.material(), login_material("pw", "s", "r"));
        assert!(creds.matches("alice", "pw"));
        assert!(!creds.matches("alice", "other"));
    }

    #[test]
    fn debug_and_snapshot_hide_password() {
        let creds = SessionCredentials::new("alice", "hunter2");
        assert!(!format!("{creds:?}").contains("hunter2"));
        let snap = creds.snapshot();
        assert_eq!(snap.user_name, "alice");
        assert!(!snap.has_challenge);
        assert!(snap.last_success.is_none());
    }
}
