//! API request/response models for users and their emails.

use crate::db::models::users::{EmailDBResponse, UserDBResponse};
use crate::errors::{Error, Result};
use crate::types::{EmailId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const ONBOARDING_MESSAGE: &str = "Complete onboarding first.";

/// The user behind the current request, resolved from the identity header.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CurrentUser {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    /// Primary email
    pub email: String,
    pub native_language: Option<String>,
    pub is_admin: bool,
}

impl CurrentUser {
    pub fn needs_onboarding(&self) -> bool {
        self.native_language.as_deref().is_none_or(|l| l.trim().is_empty())
    }

    /// The native language, or 428 when onboarding has not been completed.
    pub fn onboarded_language(&self) -> Result<&str> {
        match self.native_language.as_deref().map(str::trim) {
            Some(language) if !language.is_empty() => Ok(language),
            _ => Err(Error::PreconditionRequired {
                message: ONBOARDING_MESSAGE.to_string(),
            }),
        }
    }
}

impl From<UserDBResponse> for CurrentUser {
    fn from(db: UserDBResponse) -> Self {
        Self {
            id: db.id,
            email: db.primary_email().unwrap_or_default().to_string(),
            native_language: db.native_language,
            is_admin: db.is_admin,
        }
    }
}

/// Short user view used by session, profile and admin responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub native_language: Option<String>,
    pub primary_email: Option<String>,
    pub is_admin: bool,
}

impl From<&UserDBResponse> for UserSummary {
    fn from(db: &UserDBResponse) -> Self {
        Self {
            id: db.id,
            native_language: db.native_language.clone(),
            primary_email: db.primary_email().map(str::to_string),
            is_admin: db.is_admin,
        }
    }
}

impl From<&CurrentUser> for UserSummary {
    fn from(user: &CurrentUser) -> Self {
        Self {
            id: user.id,
            native_language: user.native_language.clone(),
            primary_email: Some(user.email.clone()).filter(|e| !e.is_empty()),
            is_admin: user.is_admin,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmailResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: EmailId,
    pub email: String,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
}

impl From<EmailDBResponse> for EmailResponse {
    fn from(db: EmailDBResponse) -> Self {
        Self {
            id: db.id,
            email: db.email,
            is_primary: db.is_primary,
            created_at: db.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EmailListResponse {
    pub emails: Vec<EmailResponse>,
}

impl EmailListResponse {
    pub fn new(emails: Vec<EmailDBResponse>) -> Self {
        Self {
            emails: emails.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmailCreate {
    pub email: String,
    #[serde(default)]
    pub make_primary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EmailUpdate {
    pub email: String,
}

/// A user as listed on the admin page
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdminUserResponse {
    #[serde(flatten)]
    pub user: UserSummary,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub emails: Vec<EmailResponse>,
}

impl From<UserDBResponse> for AdminUserResponse {
    fn from(db: UserDBResponse) -> Self {
        Self {
            user: UserSummary::from(&db),
            created_at: db.created_at,
            updated_at: db.updated_at,
            emails: db.emails.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdminUserListResponse {
    pub users: Vec<AdminUserResponse>,
    pub total: i64,
    pub protected_emails: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdminUserDetailResponse {
    pub user: AdminUserResponse,
    pub protected_emails: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdminUserUpdate {
    pub make_admin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProtectedEmailsResponse {
    pub protected_emails: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn user(native_language: Option<&str>) -> CurrentUser {
        CurrentUser {
            id: Uuid::new_v4(),
            email: "learner@example.com".to_string(),
            native_language: native_language.map(str::to_string),
            is_admin: false,
        }
    }

    #[test]
    fn test_onboarding_required_without_native_language() {
        for language in [None, Some(""), Some("   ")] {
            let user = user(language);
            assert!(user.needs_onboarding());
            let err = user.onboarded_language().unwrap_err();
            assert_eq!(err.status_code(), axum::http::StatusCode::PRECONDITION_REQUIRED);
            assert_eq!(err.user_message(), ONBOARDING_MESSAGE);
        }
    }

    #[test]
    fn test_onboarded_language() {
        let user = user(Some("English"));
        assert!(!user.needs_onboarding());
        assert_eq!(user.onboarded_language().unwrap(), "English");
    }

    #[test]
    fn test_summary_serialises_camel_case() {
        let summary = UserSummary::from(&user(Some("English")));
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["nativeLanguage"], "English");
        assert_eq!(json["primaryEmail"], "learner@example.com");
        assert_eq!(json["isAdmin"], false);
    }
}
