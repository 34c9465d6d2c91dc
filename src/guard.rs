//! Cross-site request forgery protection for mutating authoring actions.
//! Token issuance belongs to whatever serves the forms; this module only
//! checks what was submitted.

use tracing::warn;

/// Checks the token submitted with a mutating action.
pub trait CsrfGuard: Send + Sync {
    /// Fails when `token` is absent or not valid.
    fn verify(&self, token: Option<&str>) -> Result<(), Forbidden>;
}

/// Returned when a mutating action is submitted without a valid token.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("forbidden: {0}")]
pub struct Forbidden(pub &'static str);

/// A [`CsrfGuard`] accepting exactly one configured token.
#[derive(Clone)]
pub struct SharedSecret {
    secret: String,
}

impl SharedSecret {
    pub fn new(secret: &str) -> SharedSecret {
        SharedSecret {
            secret: secret.to_owned(),
        }
    }
}

impl CsrfGuard for SharedSecret {
    fn verify(&self, token: Option<&str>) -> Result<(), Forbidden> {
        let token = match token {
            Some(token) if !token.is_empty() => token,
            _ => {
                warn!("mutating action without a token");
                return Err(Forbidden("missing token"));
            }
        };
        if self.secret.is_empty() || !constant_time_eq(self.secret.as_bytes(), token.as_bytes()) {
            warn!("mutating action with an invalid token");
            return Err(Forbidden("invalid token"));
        }
        Ok(())
    }
}

// Compares every byte regardless of where the first difference is.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
