use crate::db::errors::DbError;
use crate::types::{Operation, Permission};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Authentication required but not provided
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Resource exists but belongs to someone else, or the caller is not an admin
    #[error("Insufficient permissions to {action:?} {resource}")]
    InsufficientPermissions {
        required: Permission,
        action: Operation,
        resource: String,
    },

    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// The caller has to finish onboarding (pick a native language) first
    #[error("{message}")]
    PreconditionRequired { message: String },

    /// The text or speech provider failed in a way that aborts the whole request
    #[error("{provider} request failed: {message}")]
    Upstream { provider: String, message: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// Conflict error, e.g. a backup import colliding with an existing deck
    #[error("Conflict: {message}")]
    Conflict {
        message: String,
        details: Option<serde_json::Value>,
    },
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::InsufficientPermissions { .. } => StatusCode::FORBIDDEN,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::PreconditionRequired { .. } => StatusCode::PRECONDITION_REQUIRED,
            Error::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::ForeignKeyViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::CheckViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::ProtectedEntity { .. } => StatusCode::FORBIDDEN,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Conflict { .. } => StatusCode::CONFLICT,
        }
    }

    /// Machine-readable error category returned alongside the message
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Unauthenticated { .. } => "unauthenticated",
            Error::InsufficientPermissions { .. } => "forbidden",
            Error::BadRequest { .. } => "validation",
            Error::NotFound { .. } => "not_found",
            Error::PreconditionRequired { .. } => "onboarding_required",
            Error::Upstream { .. } => "upstream_provider",
            Error::Conflict { .. } => "conflict",
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "not_found",
                DbError::UniqueViolation { .. } => "conflict",
                DbError::ForeignKeyViolation { .. } | DbError::CheckViolation { .. } => "validation",
                DbError::ProtectedEntity { .. } => "protected_resource",
                DbError::Other(_) => "internal",
            },
            Error::Internal { .. } | Error::Other(_) => "internal",
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::InsufficientPermissions { action, resource, .. } => {
                format!("Insufficient permissions to {action} {resource}")
            }
            Error::BadRequest { message } => message.clone(),
            Error::NotFound { resource, id } => format!("{resource} with ID {id} not found"),
            Error::PreconditionRequired { message } => message.clone(),
            Error::Upstream { provider, message } => format!("{provider} request failed: {message}"),
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { constraint, .. } => match constraint.as_deref() {
                    Some("user_emails_email_unique") => "That email is already linked to an account.".to_string(),
                    Some("cards_group_direction_unique") => "That card direction already exists.".to_string(),
                    _ => "Resource already exists".to_string(),
                },
                DbError::ForeignKeyViolation { .. } => "Invalid reference to related resource".to_string(),
                DbError::CheckViolation { .. } => "Invalid data provided".to_string(),
                DbError::ProtectedEntity { reason, .. } => reason.clone(),
                DbError::Other(_) => "Database error occurred".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
            Error::Conflict { message, .. } => message.clone(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(DbError::Other(_)) | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Upstream { .. } => {
                tracing::warn!("Upstream provider error: {}", self);
            }
            Error::Database(_) => {
                tracing::warn!("Database constraint error: {}", self);
            }
            Error::Unauthenticated { .. } | Error::InsufficientPermissions { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::BadRequest { .. } | Error::NotFound { .. } | Error::PreconditionRequired { .. } => {
                tracing::debug!("Client error: {}", self);
            }
            Error::Conflict { .. } => {
                tracing::warn!("Conflict error: {}", self);
            }
        }

        let status = self.status_code();
        let mut body = json!({
            "kind": self.kind(),
            "message": self.user_message(),
        });
        if let Error::Conflict { details: Some(details), .. } = &self {
            body["details"] = details.clone();
        }

        (status, Json(body)).into_response()
    }
}

/// Convert from String errors (e.g., from external functions)
impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Internal { operation: msg }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Resource;

    #[test]
    fn test_kinds_and_status_codes() {
        let cases: Vec<(Error, StatusCode, &str)> = vec![
            (
                Error::BadRequest {
                    message: "Enter a foreign phrase first.".into(),
                },
                StatusCode::BAD_REQUEST,
                "validation",
            ),
            (
                Error::InsufficientPermissions {
                    required: Permission::Allow(Resource::Decks, Operation::ReadAll),
                    action: Operation::ReadOwn,
                    resource: "deck".into(),
                },
                StatusCode::FORBIDDEN,
                "forbidden",
            ),
            (
                Error::Upstream {
                    provider: "OpenAI".into(),
                    message: "timeout".into(),
                },
                StatusCode::BAD_GATEWAY,
                "upstream_provider",
            ),
            (
                Error::Database(DbError::ProtectedEntity {
                    operation: Operation::DeleteAll,
                    reason: "Cannot delete a protected admin profile.".into(),
                    entity_type: "user".into(),
                    entity_id: None,
                }),
                StatusCode::FORBIDDEN,
                "protected_resource",
            ),
            (
                Error::PreconditionRequired {
                    message: "Complete onboarding first.".into(),
                },
                StatusCode::PRECONDITION_REQUIRED,
                "onboarding_required",
            ),
        ];

        for (error, status, kind) in cases {
            assert_eq!(error.status_code(), status);
            assert_eq!(error.kind(), kind);
        }
    }

    #[test]
    fn test_protected_entity_message_is_the_reason() {
        let error = Error::Database(DbError::ProtectedEntity {
            operation: Operation::UpdateAll,
            reason: "Cannot revoke admin from a protected account.".into(),
            entity_type: "user".into(),
            entity_id: None,
        });
        assert_eq!(error.user_message(), "Cannot revoke admin from a protected account.");
    }

    #[test]
    fn test_internal_errors_do_not_leak_details() {
        let error = Error::Other(anyhow::anyhow!("connection reset by peer at 10.0.0.3"));
        assert_eq!(error.user_message(), "Internal server error");
    }
}
