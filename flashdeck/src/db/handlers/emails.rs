//! Database repository for the emails linked to a user.
//!
//! Every user keeps exactly one primary email. The primary cannot be removed, and protected
//! addresses can be neither removed nor renamed.

use crate::db::{
    errors::{DbError, Result},
    handlers::users::normalize_email,
    models::users::EmailDBResponse,
};
use crate::types::{EmailId, Operation, UserId, abbrev_uuid};
use sqlx::{Connection, PgConnection};
use tracing::instrument;
use uuid::Uuid;

const EMAIL_COLUMNS: &str = "id, user_id, email, is_primary, created_at";

pub struct Emails<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Emails<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Primary first, then oldest first.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn list_for_user(&mut self, user_id: UserId) -> Result<Vec<EmailDBResponse>> {
        Ok(sqlx::query_as::<_, EmailDBResponse>(&format!(
            "SELECT {EMAIL_COLUMNS} FROM user_emails WHERE user_id = $1 ORDER BY is_primary DESC, created_at ASC"
        ))
        .bind(user_id)
        .fetch_all(&mut *self.db)
        .await?)
    }

    async fn get_owned(&mut self, user_id: UserId, email_id: EmailId) -> Result<EmailDBResponse> {
        sqlx::query_as::<_, EmailDBResponse>(&format!(
            "SELECT {EMAIL_COLUMNS} FROM user_emails WHERE id = $1 AND user_id = $2"
        ))
        .bind(email_id)
        .bind(user_id)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)
    }

    async fn is_protected(&mut self, email: &str) -> Result<bool> {
        Ok(
            sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM protected_emails WHERE email = $1)")
                .bind(email)
                .fetch_one(&mut *self.db)
                .await?,
        )
    }

    /// Link a new address. A taken address fails on `user_emails_email_unique`.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn add(&mut self, user_id: UserId, email: &str, make_primary: bool) -> Result<EmailDBResponse> {
        let email = normalize_email(email);
        let email_id = Uuid::new_v4();

        let mut tx = self.db.begin().await?;
        sqlx::query("INSERT INTO user_emails (id, user_id, email, is_primary) VALUES ($1, $2, $3, FALSE)")
            .bind(email_id)
            .bind(user_id)
            .bind(&email)
            .execute(&mut *tx)
            .await?;
        if make_primary {
            promote(&mut *tx, user_id, email_id).await?;
        }
        let created = sqlx::query_as::<_, EmailDBResponse>(&format!(
            "SELECT {EMAIL_COLUMNS} FROM user_emails WHERE id = $1"
        ))
        .bind(email_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(created)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id), email_id = %abbrev_uuid(&email_id)), err)]
    pub async fn update_address(&mut self, user_id: UserId, email_id: EmailId, email: &str) -> Result<EmailDBResponse> {
        let existing = self.get_owned(user_id, email_id).await?;
        let email = normalize_email(email);
        if existing.email != email && self.is_protected(&existing.email).await? {
            return Err(protected(Operation::UpdateAll, "Cannot change a protected email.", existing.email));
        }

        Ok(sqlx::query_as::<_, EmailDBResponse>(&format!(
            "UPDATE user_emails SET email = $2 WHERE id = $1 RETURNING {EMAIL_COLUMNS}"
        ))
        .bind(email_id)
        .bind(&email)
        .fetch_one(&mut *self.db)
        .await?)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id), email_id = %abbrev_uuid(&email_id)), err)]
    pub async fn remove(&mut self, user_id: UserId, email_id: EmailId) -> Result<()> {
        let existing = self.get_owned(user_id, email_id).await?;
        if existing.is_primary {
            return Err(protected(Operation::DeleteOwn, "Cannot remove the primary email.", existing.email));
        }
        if self.is_protected(&existing.email).await? {
            return Err(protected(Operation::DeleteAll, "Cannot remove a protected email.", existing.email));
        }

        sqlx::query("DELETE FROM user_emails WHERE id = $1")
            .bind(email_id)
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id), email_id = %abbrev_uuid(&email_id)), err)]
    pub async fn set_primary(&mut self, user_id: UserId, email_id: EmailId) -> Result<()> {
        self.get_owned(user_id, email_id).await?;
        let mut tx = self.db.begin().await?;
        promote(&mut *tx, user_id, email_id).await?;
        tx.commit().await?;
        Ok(())
    }
}

fn protected(operation: Operation, reason: &str, email: String) -> DbError {
    DbError::ProtectedEntity {
        operation,
        reason: reason.to_string(),
        entity_type: "email".to_string(),
        entity_id: Some(email),
    }
}

async fn promote(conn: &mut PgConnection, user_id: UserId, email_id: EmailId) -> Result<()> {
    // Clear first so the one-primary index never sees two
    sqlx::query("UPDATE user_emails SET is_primary = FALSE WHERE user_id = $1 AND is_primary")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("UPDATE user_emails SET is_primary = TRUE WHERE id = $1")
        .bind(email_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::Users;
    use sqlx::PgPool;

    async fn user_with_email(conn: &mut PgConnection, email: &str) -> UserId {
        Users::new(conn).resolve_by_email(email, false).await.unwrap().id
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_add_and_promote(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let user_id = user_with_email(&mut conn, "first@example.com").await;
        let mut emails = Emails::new(&mut conn);

        let second = emails.add(user_id, " Second@Example.com", false).await.unwrap();
        assert_eq!(second.email, "second@example.com");
        assert!(!second.is_primary);

        emails.set_primary(user_id, second.id).await.unwrap();
        let listed = emails.list_for_user(user_id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert!(listed[0].is_primary);
        assert!(!listed[1].is_primary);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_add_as_primary(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let user_id = user_with_email(&mut conn, "first@example.com").await;
        let mut emails = Emails::new(&mut conn);

        let added = emails.add(user_id, "work@example.com", true).await.unwrap();
        assert!(added.is_primary);
        let primaries = emails
            .list_for_user(user_id)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.is_primary)
            .count();
        assert_eq!(primaries, 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_duplicate_address_is_rejected(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let alice = user_with_email(&mut conn, "alice@example.com").await;
        user_with_email(&mut conn, "bob@example.com").await;
        let mut emails = Emails::new(&mut conn);

        let err = emails.add(alice, "BOB@example.com", false).await.unwrap_err();
        match err {
            DbError::UniqueViolation { constraint, .. } => {
                assert_eq!(constraint.as_deref(), Some("user_emails_email_unique"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_primary_cannot_be_removed(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let user_id = user_with_email(&mut conn, "only@example.com").await;
        let mut emails = Emails::new(&mut conn);
        let primary = emails.list_for_user(user_id).await.unwrap().remove(0);

        let err = emails.remove(user_id, primary.id).await.unwrap_err();
        assert!(matches!(err, DbError::ProtectedEntity { .. }));

        let extra = emails.add(user_id, "extra@example.com", false).await.unwrap();
        emails.remove(user_id, extra.id).await.unwrap();
        assert_eq!(emails.list_for_user(user_id).await.unwrap().len(), 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_protected_address_is_locked(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        sqlx::query("INSERT INTO protected_emails (email) VALUES ('keep@example.com')")
            .execute(&mut *conn)
            .await
            .unwrap();
        let user_id = user_with_email(&mut conn, "main@example.com").await;
        let mut emails = Emails::new(&mut conn);
        let kept = emails.add(user_id, "keep@example.com", false).await.unwrap();

        assert!(matches!(
            emails.remove(user_id, kept.id).await.unwrap_err(),
            DbError::ProtectedEntity { .. }
        ));
        assert!(matches!(
            emails.update_address(user_id, kept.id, "other@example.com").await.unwrap_err(),
            DbError::ProtectedEntity { .. }
        ));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_foreign_email_ids_are_not_found(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let alice = user_with_email(&mut conn, "alice@example.com").await;
        let bob = user_with_email(&mut conn, "bob@example.com").await;
        let mut emails = Emails::new(&mut conn);
        let bobs = emails.list_for_user(bob).await.unwrap().remove(0);

        assert!(matches!(emails.set_primary(alice, bobs.id).await.unwrap_err(), DbError::NotFound));
        assert!(matches!(
            emails.update_address(alice, bobs.id, "x@example.com").await.unwrap_err(),
            DbError::NotFound
        ));
    }
}
