//! Which provider key a generation request runs with.

use sqlx::PgConnection;
use tracing::{instrument, warn};

use crate::config::Config;
use crate::crypto::decrypt_secret;
use crate::db::{handlers::ApiKeys, models::api_keys::OPENAI_PROVIDER};
use crate::errors::{Error, Result};
use crate::types::{UserId, abbrev_uuid};

pub const MISSING_KEY_MESSAGE: &str = "Add an OpenAI API key on your profile before generating fields.";

/// The user's stored key, else the system-wide key from configuration.
///
/// A stored key that no longer decrypts (the secret was rotated) is treated as absent.
#[instrument(skip(conn, config), fields(user_id = %abbrev_uuid(&user_id)), err)]
pub async fn resolve_api_key(conn: &mut PgConnection, config: &Config, user_id: UserId) -> Result<Option<String>> {
    let stored = ApiKeys::new(conn).get(user_id, OPENAI_PROVIDER).await?;

    let personal = match (stored, config.secret_key.as_deref()) {
        (Some(row), Some(secret)) => match decrypt_secret(secret, &row.key_ciphertext) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(error = %e, "Stored API key could not be decrypted");
                None
            }
        },
        _ => None,
    };

    Ok(personal
        .or_else(|| config.provider.api_key.clone())
        .filter(|key| !key.trim().is_empty()))
}

/// Like [`resolve_api_key`] but a missing key is a 400.
pub async fn require_api_key(conn: &mut PgConnection, config: &Config, user_id: UserId) -> Result<String> {
    resolve_api_key(conn, config, user_id).await?.ok_or_else(|| Error::BadRequest {
        message: MISSING_KEY_MESSAGE.to_string(),
    })
}
