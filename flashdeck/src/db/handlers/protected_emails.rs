//! Database repository for protected emails.
//!
//! The table is rebuilt from configuration at startup. Users holding one of these addresses
//! cannot be deleted or demoted, and the address itself cannot be unlinked.

use crate::db::errors::Result;
use crate::db::handlers::users::normalize_email;
use sqlx::{Connection, PgConnection};
use tracing::{info, instrument};

pub struct ProtectedEmails<'c> {
    db: &'c mut PgConnection,
}

impl<'c> ProtectedEmails<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), err)]
    pub async fn list(&mut self) -> Result<Vec<String>> {
        Ok(sqlx::query_scalar::<_, String>("SELECT email FROM protected_emails ORDER BY email")
            .fetch_all(&mut *self.db)
            .await?)
    }

    /// Replace the stored set with `emails`.
    #[instrument(skip(self, emails), err)]
    pub async fn replace_all(&mut self, emails: &[String]) -> Result<()> {
        let mut normalized: Vec<String> = emails
            .iter()
            .map(|e| normalize_email(e))
            .filter(|e| !e.is_empty())
            .collect();
        normalized.sort();
        normalized.dedup();

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM protected_emails WHERE NOT (email = ANY($1))")
            .bind(&normalized)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO protected_emails (email) SELECT UNNEST($1::text[]) ON CONFLICT (email) DO NOTHING")
            .bind(&normalized)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(count = normalized.len(), "Protected emails seeded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_replace_all(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = ProtectedEmails::new(&mut conn);

        repo.replace_all(&["Root@Example.com".to_string(), "ops@example.com".to_string(), "root@example.com".to_string()])
            .await
            .unwrap();
        assert_eq!(repo.list().await.unwrap(), vec!["ops@example.com", "root@example.com"]);

        repo.replace_all(&["ops@example.com".to_string()]).await.unwrap();
        assert_eq!(repo.list().await.unwrap(), vec!["ops@example.com"]);
    }
}
