//! Database models for users and their linked emails.

use crate::types::{EmailId, UserId};
use bon::Builder;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Database request for creating a new user together with its primary email
#[derive(Debug, Clone, Builder)]
pub struct UserCreateDBRequest {
    #[builder(into)]
    pub email: String,
    #[builder(default)]
    pub is_admin: bool,
    pub native_language: Option<String>,
}

/// Database request for updating a user. `None` leaves a column unchanged.
#[derive(Debug, Clone, Default)]
pub struct UserUpdateDBRequest {
    pub native_language: Option<String>,
    pub is_admin: Option<bool>,
}

/// Database response for a user
#[derive(Debug, Clone)]
pub struct UserDBResponse {
    pub id: UserId,
    pub native_language: Option<String>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Ordered primary first, then by creation time
    pub emails: Vec<EmailDBResponse>,
}

impl UserDBResponse {
    pub fn primary_email(&self) -> Option<&str> {
        self.emails
            .iter()
            .find(|e| e.is_primary)
            .or(self.emails.first())
            .map(|e| e.email.as_str())
    }

    pub fn has_email(&self, email: &str) -> bool {
        self.emails.iter().any(|e| e.email == email)
    }
}

/// One row of `user_emails`
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct EmailDBResponse {
    pub id: EmailId,
    pub user_id: UserId,
    pub email: String,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
}
