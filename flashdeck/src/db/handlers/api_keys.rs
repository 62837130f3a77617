//! Database repository for users' provider keys.
//!
//! Keys are stored sealed; this repository never sees plaintext.

use crate::db::{errors::Result, models::api_keys::ApiKeyDBResponse};
use crate::types::{UserId, abbrev_uuid};
use sqlx::PgConnection;
use tracing::instrument;

pub struct ApiKeys<'c> {
    db: &'c mut PgConnection,
}

impl<'c> ApiKeys<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn get(&mut self, user_id: UserId, provider: &str) -> Result<Option<ApiKeyDBResponse>> {
        Ok(sqlx::query_as::<_, ApiKeyDBResponse>(
            "SELECT user_id, provider, key_ciphertext, created_at, updated_at
             FROM user_api_keys WHERE user_id = $1 AND provider = $2",
        )
        .bind(user_id)
        .bind(provider)
        .fetch_optional(&mut *self.db)
        .await?)
    }

    /// Store or replace the sealed key for `provider`.
    #[instrument(skip(self, key_ciphertext), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn upsert(&mut self, user_id: UserId, provider: &str, key_ciphertext: &str) -> Result<ApiKeyDBResponse> {
        Ok(sqlx::query_as::<_, ApiKeyDBResponse>(
            "INSERT INTO user_api_keys (user_id, provider, key_ciphertext) VALUES ($1, $2, $3)
             ON CONFLICT (user_id, provider) DO UPDATE
                SET key_ciphertext = EXCLUDED.key_ciphertext, updated_at = NOW()
             RETURNING user_id, provider, key_ciphertext, created_at, updated_at",
        )
        .bind(user_id)
        .bind(provider)
        .bind(key_ciphertext)
        .fetch_one(&mut *self.db)
        .await?)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn delete(&mut self, user_id: UserId, provider: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM user_api_keys WHERE user_id = $1 AND provider = $2")
            .bind(user_id)
            .bind(provider)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::Users;
    use crate::db::models::api_keys::OPENAI_PROVIDER;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_upsert_replaces_key(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let user = Users::new(&mut conn).resolve_by_email("keys@example.com", false).await.unwrap();
        let mut keys = ApiKeys::new(&mut conn);

        assert!(keys.get(user.id, OPENAI_PROVIDER).await.unwrap().is_none());

        keys.upsert(user.id, OPENAI_PROVIDER, "sealed-1").await.unwrap();
        let replaced = keys.upsert(user.id, OPENAI_PROVIDER, "sealed-2").await.unwrap();
        assert_eq!(replaced.key_ciphertext, "sealed-2");
        assert_eq!(
            keys.get(user.id, OPENAI_PROVIDER).await.unwrap().unwrap().key_ciphertext,
            "sealed-2"
        );

        assert!(keys.delete(user.id, OPENAI_PROVIDER).await.unwrap());
        assert!(!keys.delete(user.id, OPENAI_PROVIDER).await.unwrap());
        assert!(keys.get(user.id, OPENAI_PROVIDER).await.unwrap().is_none());
    }
}
