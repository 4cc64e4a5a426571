//! Token validation seam.
//!
//! The gateway derives a user id from the transport credentials before
//! any tool can execute. Real deployments plug in their identity
//! provider; [`SharedTokenValidator`] covers pre-shared tokens and
//! [`OpenValidator`] is for development only.

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use teller_domain::{Error, Result};

/// Constant-time token comparison via SHA-256 digest.
/// Hashing normalizes lengths so `ct_eq` always compares 32 bytes.
fn token_eq(a: &str, b: &str) -> bool {
    let ha = Sha256::digest(a.as_bytes());
    let hb = Sha256::digest(b.as_bytes());
    ha.ct_eq(&hb).into()
}

pub trait TokenValidator: Send + Sync {
    /// Validate a transport credential and return the owning user id.
    fn validate(&self, token: &str) -> Result<String>;
}

/// Pre-shared per-user tokens, compared in constant time.
pub struct SharedTokenValidator {
    /// user id → token.
    tokens: HashMap<String, String>,
}

impl SharedTokenValidator {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

impl TokenValidator for SharedTokenValidator {
    fn validate(&self, token: &str) -> Result<String> {
        if token.is_empty() {
            return Err(Error::Auth("missing token".into()));
        }
        self.tokens
            .iter()
            .find(|(_, expected)| token_eq(expected, token))
            .map(|(user_id, _)| user_id.clone())
            .ok_or_else(|| Error::Auth("invalid token".into()))
    }
}

/// Development-only validator: the token is taken as the user id.
pub struct OpenValidator;

impl TokenValidator for OpenValidator {
    fn validate(&self, token: &str) -> Result<String> {
        if token.is_empty() {
            return Err(Error::Auth("missing token".into()));
        }
        Ok(token.to_string())
    }
}
