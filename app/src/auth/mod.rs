use crate::{database::Database, user};

mod entities;

pub use entities::{AccessDenied, ApiKey, ApiKeyId, TokenHash};

/// Authenticates a raw token from the `X-Auth-Token` header down to a user id. This is the only
/// piece of request authentication the core retains; everything else (registration, scoped
/// permissions, session management) belongs to the external API layer.
pub async fn authenticate(db: &Database, token: &str) -> Result<user::Id, AccessDenied> {
    queries::get_user_for_token(db, token).await.ok_or(AccessDenied)
}

/// Fetches any one of the user's API keys, used to key the webhook HMAC (see `crate::webhook`).
pub async fn any_api_key(db: &Database, user_id: user::Id) -> Option<ApiKey> {
    queries::get_any_api_key(db, user_id).await
}

mod queries {
    use super::{ApiKey, ApiKeyId, TokenHash};
    use crate::{database::Database, user};
    use uuid::Uuid;

    pub(super) async fn get_user_for_token(db: &Database, token: &str) -> Option<user::Id> {
        let token_hash = TokenHash::generate(token);
        sqlx::query_as::<_, (Uuid,)>(
            "SELECT user_id FROM api_keys WHERE token_hash = $1 AND disabled_at IS NULL",
        )
        .bind(token_hash.as_str())
        .fetch_optional(db)
        .await
        .unwrap()
        .map(|(user_id,)| user::Id(user_id))
    }

    pub(super) async fn get_any_api_key(db: &Database, user_id: user::Id) -> Option<ApiKey> {
        sqlx::query_as::<_, (Uuid, Uuid)>(
            "SELECT id, user_id FROM api_keys WHERE user_id = $1 AND disabled_at IS NULL LIMIT 1",
        )
        .bind(user_id.0)
        .fetch_optional(db)
        .await
        .unwrap()
        .map(|(id, user_id)| ApiKey {
            id: ApiKeyId(id),
            user_id: user::Id(user_id),
        })
    }
}
