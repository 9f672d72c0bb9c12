//! Authentication is out of scope for the core (registration, 2FA, password reset all live in the
//! external API layer). What the core keeps is the minimum needed to authenticate an HTTP request
//! down to a `user::Id`, and to keep one API key per user around for webhook HMAC signing.

use crate::{hex::Hex, user};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("access denied")]
pub struct AccessDenied;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApiKeyId(pub Uuid);

/// A hash of an API key/token. Currently SHA256, unsalted: tokens are generated with enough
/// entropy that salting buys nothing.
pub struct TokenHash(Hex);

impl TokenHash {
    pub(crate) fn generate(token: &str) -> Self {
        use sha2::Digest;
        let mut hasher = sha2::Sha256::new();
        hasher.update(token);
        Self(Hex::encode(&hasher.finalize()))
    }

    pub(crate) fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// A user's API key. Kept around after authentication purely so the webhook dispatcher can key
/// its HMAC off of it (see `crate::webhook`).
#[derive(Debug, Clone, Copy)]
pub struct ApiKey {
    pub id: ApiKeyId,
    pub user_id: user::Id,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_is_deterministic() {
        assert_eq!(
            TokenHash::generate("my-token").as_str(),
            TokenHash::generate("my-token").as_str()
        );
    }

    #[test]
    fn generate_differs_across_tokens() {
        assert_ne!(
            TokenHash::generate("token-a").as_str(),
            TokenHash::generate("token-b").as_str()
        );
    }

    #[test]
    fn generate_produces_64_char_lowercase_hex() {
        let hash = TokenHash::generate("my-token");
        assert_eq!(hash.as_str().len(), 64);
        assert!(hash.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
