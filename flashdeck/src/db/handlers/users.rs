//! Database repository for users.

use crate::types::{Operation, UserId, abbrev_uuid};
use crate::db::{
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::users::{EmailDBResponse, UserCreateDBRequest, UserDBResponse, UserUpdateDBRequest},
};
use chrono::{DateTime, Utc};
use sqlx::{Connection, FromRow, PgConnection};
use std::collections::HashMap;
use tracing::{debug, instrument};
use uuid::Uuid;

pub const DELETE_PROTECTED_MESSAGE: &str = "Cannot delete a protected admin profile.";
pub const DEMOTE_PROTECTED_MESSAGE: &str = "Cannot revoke admin from a protected account.";

/// Filter for listing users
#[derive(Debug, Clone)]
pub struct UserFilter {
    pub skip: i64,
    pub limit: i64,
}

impl UserFilter {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self { skip, limit }
    }
}

// Database entity model
#[derive(Debug, Clone, FromRow)]
struct User {
    pub id: UserId,
    pub native_language: Option<String>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<(Vec<EmailDBResponse>, User)> for UserDBResponse {
    fn from((emails, user): (Vec<EmailDBResponse>, User)) -> Self {
        Self {
            id: user.id,
            native_language: user.native_language,
            is_admin: user.is_admin,
            created_at: user.created_at,
            updated_at: user.updated_at,
            emails,
        }
    }
}

/// Trim and lowercase an address. All stored and looked-up emails go through this.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub struct Users<'c> {
    db: &'c mut PgConnection,
}

const USER_COLUMNS: &str = "id, native_language, is_admin, created_at, updated_at";

async fn emails_for(conn: &mut PgConnection, user_ids: &[UserId]) -> Result<HashMap<UserId, Vec<EmailDBResponse>>> {
    let rows = sqlx::query_as::<_, EmailDBResponse>(
        "SELECT id, user_id, email, is_primary, created_at FROM user_emails
         WHERE user_id = ANY($1)
         ORDER BY is_primary DESC, created_at ASC",
    )
    .bind(user_ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut grouped: HashMap<UserId, Vec<EmailDBResponse>> = HashMap::new();
    for row in rows {
        grouped.entry(row.user_id).or_default().push(row);
    }
    Ok(grouped)
}

#[async_trait::async_trait]
impl<'c> Repository for Users<'c> {
    type CreateRequest = UserCreateDBRequest;
    type UpdateRequest = UserUpdateDBRequest;
    type Response = UserDBResponse;
    type Id = UserId;
    type Filter = UserFilter;

    #[instrument(skip(self, request), fields(email = %request.email), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let user_id = Uuid::new_v4();
        let email = normalize_email(&request.email);

        let mut tx = self.db.begin().await?;
        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (id, native_language, is_admin) VALUES ($1, $2, $3) RETURNING {USER_COLUMNS}"
        ))
        .bind(user_id)
        .bind(request.native_language.as_deref())
        .bind(request.is_admin)
        .fetch_one(&mut *tx)
        .await?;

        let primary = sqlx::query_as::<_, EmailDBResponse>(
            "INSERT INTO user_emails (id, user_id, email, is_primary) VALUES ($1, $2, $3, TRUE)
             RETURNING id, user_id, email, is_primary, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&email)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(UserDBResponse::from((vec![primary], user)))
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        let Some(user) = user else {
            return Ok(None);
        };
        let mut emails = emails_for(&mut *self.db, &[id]).await?;
        Ok(Some(UserDBResponse::from((emails.remove(&id).unwrap_or_default(), user))))
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn get_bulk(&mut self, ids: Vec<UserId>) -> Result<HashMap<Self::Id, UserDBResponse>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let users = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ANY($1)"))
            .bind(&ids)
            .fetch_all(&mut *self.db)
            .await?;
        let mut emails = emails_for(&mut *self.db, &ids).await?;

        Ok(users
            .into_iter()
            .map(|user| {
                let user_emails = emails.remove(&user.id).unwrap_or_default();
                (user.id, UserDBResponse::from((user_emails, user)))
            })
            .collect())
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC, id LIMIT $1 OFFSET $2"
        ))
        .bind(filter.limit)
        .bind(filter.skip)
        .fetch_all(&mut *self.db)
        .await?;

        let ids: Vec<UserId> = users.iter().map(|u| u.id).collect();
        let mut emails = emails_for(&mut *self.db, &ids).await?;

        Ok(users
            .into_iter()
            .map(|user| {
                let user_emails = emails.remove(&user.id).unwrap_or_default();
                UserDBResponse::from((user_emails, user))
            })
            .collect())
    }

    /// Delete a user. Decks, card groups, emails and keys go with it through `ON DELETE CASCADE`.
    ///
    /// Users holding a protected email are refused.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let mut tx = self.db.begin().await?;

        if let Some(email) = protected_email_of(&mut *tx, id).await? {
            return Err(DbError::ProtectedEntity {
                operation: Operation::DeleteAll,
                reason: DELETE_PROTECTED_MESSAGE.to_string(),
                entity_type: "user".to_string(),
                entity_id: Some(email),
            });
        }

        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        {
            let mut tx = self.db.begin().await?;

            if request.is_admin == Some(false)
                && let Some(email) = protected_email_of(&mut *tx, id).await?
            {
                return Err(DbError::ProtectedEntity {
                    operation: Operation::UpdateAll,
                    reason: DEMOTE_PROTECTED_MESSAGE.to_string(),
                    entity_type: "user".to_string(),
                    entity_id: Some(email),
                });
            }

            let result = sqlx::query(
                "UPDATE users SET
                    native_language = COALESCE($2, native_language),
                    is_admin = COALESCE($3, is_admin),
                    updated_at = NOW()
                 WHERE id = $1",
            )
            .bind(id)
            .bind(request.native_language.as_deref().map(str::trim))
            .bind(request.is_admin)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(DbError::NotFound);
            }

            tx.commit().await?;
        }

        self.get_by_id(id).await?.ok_or(DbError::NotFound)
    }
}

async fn protected_email_of(conn: &mut PgConnection, user_id: UserId) -> Result<Option<String>> {
    Ok(sqlx::query_scalar::<_, String>(
        "SELECT ue.email FROM user_emails ue
         JOIN protected_emails p ON p.email = ue.email
         WHERE ue.user_id = $1
         LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?)
}

impl<'c> Users<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), err)]
    pub async fn get_user_by_email(&mut self, email: &str) -> Result<Option<UserDBResponse>> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Ok(None);
        }
        let user_id = sqlx::query_scalar::<_, UserId>("SELECT user_id FROM user_emails WHERE email = $1")
            .bind(&email)
            .fetch_optional(&mut *self.db)
            .await?;

        match user_id {
            Some(id) => self.get_by_id(id).await,
            None => Ok(None),
        }
    }

    /// Find the user owning `email`, creating one on first sight.
    ///
    /// With `promote_admin` the user is made an admin on every call. Two concurrent first
    /// sightings of one email resolve to the same user.
    #[instrument(skip(self), err)]
    pub async fn resolve_by_email(&mut self, email: &str, promote_admin: bool) -> Result<UserDBResponse> {
        let email = normalize_email(email);

        if let Some(user) = self.get_user_by_email(&email).await? {
            if promote_admin && !user.is_admin {
                debug!(user_id = %abbrev_uuid(&user.id), "Promoting configured admin");
                return self
                    .update(
                        user.id,
                        &UserUpdateDBRequest {
                            is_admin: Some(true),
                            ..Default::default()
                        },
                    )
                    .await;
            }
            return Ok(user);
        }

        let request = UserCreateDBRequest::builder()
            .email(email.clone())
            .is_admin(promote_admin)
            .build();
        match self.create(&request).await {
            Ok(user) => Ok(user),
            Err(DbError::UniqueViolation { .. }) => {
                // Lost a race with another request for the same email
                self.get_user_by_email(&email).await?.ok_or(DbError::NotFound)
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), err)]
    pub async fn count(&mut self) -> Result<i64> {
        Ok(sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(&mut *self.db)
            .await?)
    }
}
