//! Database models for stored provider keys.

use crate::types::UserId;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Provider name used for the OpenAI-compatible text and speech endpoints
pub const OPENAI_PROVIDER: &str = "openai";

/// A sealed key as stored. Decrypt with [`crate::crypto::decrypt_secret`].
#[derive(Debug, Clone, FromRow)]
pub struct ApiKeyDBResponse {
    pub user_id: UserId,
    pub provider: String,
    pub key_ciphertext: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
