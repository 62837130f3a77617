//! The signed-in user's own profile: stored provider key, linked emails and account deletion.

use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
};
use sqlx::PgConnection;
use tracing::{info, instrument};

use crate::{
    AppState,
    api::models::{
        profile::{AccountDeletedResponse, ApiKeySummary, ApiKeyUpdate, ProfileResponse},
        users::{CurrentUser, EmailCreate, EmailListResponse, EmailResponse, UserSummary},
    },
    auth::utils::logout_url,
    crypto::{decrypt_secret, encrypt_secret, mask_api_key},
    db::{
        handlers::{ApiKeys, Emails, Repository, Users},
        models::api_keys::{ApiKeyDBResponse, OPENAI_PROVIDER},
    },
    errors::{Error, Result},
    types::{EmailId, UserId, abbrev_uuid},
};

/// Trimmed, lowercased address with a minimal shape check.
pub(crate) fn valid_email(raw: &str) -> Result<String> {
    let email = raw.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') && !domain.starts_with('.') => Ok(email),
        _ => Err(Error::BadRequest {
            message: "Enter a valid email address.".to_string(),
        }),
    }
}

fn secret_key(state: &AppState) -> Result<&str> {
    state.config.secret_key.as_deref().ok_or_else(|| Error::Internal {
        operation: "use stored keys: secret_key is not configured".to_string(),
    })
}

fn key_summary(secret: &str, stored: Option<ApiKeyDBResponse>) -> ApiKeySummary {
    match stored {
        Some(row) => ApiKeySummary {
            has_key: true,
            // A key sealed under an old secret still counts as present, just unreadable
            masked: decrypt_secret(secret, &row.key_ciphertext).ok().map(|key| mask_api_key(&key)),
            updated_at: Some(row.updated_at),
        },
        None => ApiKeySummary::default(),
    }
}

pub(crate) async fn email_list(conn: &mut PgConnection, user_id: UserId) -> Result<EmailListResponse> {
    Ok(EmailListResponse::new(Emails::new(conn).list_for_user(user_id).await?))
}

#[utoipa::path(
    get,
    path = "/profile",
    tag = "profile",
    summary = "Get profile",
    description = "The caller's user record, linked emails, masked API key and native language options",
    responses(
        (status = 200, description = "Profile", body = ProfileResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("ProxyHeader" = []))
)]
pub async fn get_profile(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<ProfileResponse>> {
    let secret = secret_key(&state)?;
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    let user = Users::new(&mut conn)
        .get_by_id(current_user.id)
        .await?
        .ok_or_else(|| Error::NotFound {
            resource: "User".to_string(),
            id: current_user.id.to_string(),
        })?;
    let stored = ApiKeys::new(&mut conn).get(current_user.id, OPENAI_PROVIDER).await?;

    Ok(Json(ProfileResponse {
        user: UserSummary::from(&user),
        emails: user.emails.into_iter().map(EmailResponse::from).collect(),
        api_key: key_summary(secret, stored),
        native_language_options: state.config.languages.native_options.clone(),
    }))
}

#[utoipa::path(
    put,
    path = "/profile/api-key",
    tag = "profile",
    summary = "Store API key",
    description = "Encrypt and store a personal OpenAI key, replacing any existing one",
    request_body = ApiKeyUpdate,
    responses(
        (status = 200, description = "Key stored", body = ApiKeySummary),
        (status = 400, description = "Empty key"),
        (status = 401, description = "Unauthorized"),
    ),
    security(("ProxyHeader" = []))
)]
#[instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)), err)]
pub async fn put_api_key(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(data): Json<ApiKeyUpdate>,
) -> Result<Json<ApiKeySummary>> {
    let key = data.api_key.trim();
    if key.is_empty() {
        return Err(Error::BadRequest {
            message: "API key cannot be empty.".to_string(),
        });
    }
    let secret = secret_key(&state)?;
    let sealed = encrypt_secret(secret, key)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let stored = ApiKeys::new(&mut conn)
        .upsert(current_user.id, OPENAI_PROVIDER, &sealed)
        .await?;
    info!("Stored personal API key");

    Ok(Json(ApiKeySummary {
        has_key: true,
        masked: Some(mask_api_key(key)),
        updated_at: Some(stored.updated_at),
    }))
}

#[utoipa::path(
    delete,
    path = "/profile/api-key",
    tag = "profile",
    summary = "Remove API key",
    description = "Delete the stored personal key. Generation falls back to the system key, if any.",
    responses(
        (status = 200, description = "Key removed", body = ApiKeySummary),
        (status = 401, description = "Unauthorized"),
    ),
    security(("ProxyHeader" = []))
)]
pub async fn delete_api_key(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<ApiKeySummary>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    ApiKeys::new(&mut conn).delete(current_user.id, OPENAI_PROVIDER).await?;
    Ok(Json(ApiKeySummary::default()))
}

#[utoipa::path(
    post,
    path = "/profile/emails",
    tag = "profile",
    summary = "Link email",
    description = "Link another email address to the caller's account, optionally making it primary",
    request_body = EmailCreate,
    responses(
        (status = 201, description = "Email linked", body = EmailListResponse),
        (status = 400, description = "Invalid address"),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "Address already linked to an account"),
    ),
    security(("ProxyHeader" = []))
)]
pub async fn add_email(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(data): Json<EmailCreate>,
) -> Result<(axum::http::StatusCode, Json<EmailListResponse>)> {
    let email = valid_email(&data.email)?;
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    Emails::new(&mut conn).add(current_user.id, &email, data.make_primary).await?;
    Ok((axum::http::StatusCode::CREATED, Json(email_list(&mut conn, current_user.id).await?)))
}

#[utoipa::path(
    delete,
    path = "/profile/emails/{email_id}",
    tag = "profile",
    summary = "Unlink email",
    description = "Remove a linked address. The primary and protected addresses cannot be removed.",
    params(("email_id" = uuid::Uuid, Path, description = "Email ID")),
    responses(
        (status = 200, description = "Remaining emails", body = EmailListResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Primary or protected email"),
        (status = 404, description = "Email not found"),
    ),
    security(("ProxyHeader" = []))
)]
pub async fn remove_email(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(email_id): Path<EmailId>,
) -> Result<Json<EmailListResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    Emails::new(&mut conn).remove(current_user.id, email_id).await?;
    Ok(Json(email_list(&mut conn, current_user.id).await?))
}

#[utoipa::path(
    post,
    path = "/profile/emails/{email_id}/primary",
    tag = "profile",
    summary = "Make email primary",
    params(("email_id" = uuid::Uuid, Path, description = "Email ID")),
    responses(
        (status = 200, description = "Updated emails", body = EmailListResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Email not found"),
    ),
    security(("ProxyHeader" = []))
)]
pub async fn make_primary_email(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(email_id): Path<EmailId>,
) -> Result<Json<EmailListResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    Emails::new(&mut conn).set_primary(current_user.id, email_id).await?;
    Ok(Json(email_list(&mut conn, current_user.id).await?))
}

#[utoipa::path(
    delete,
    path = "/profile",
    tag = "profile",
    summary = "Delete account",
    description = "Delete the caller's account with all decks, cards, emails and keys. Protected accounts cannot be deleted.",
    responses(
        (status = 200, description = "Account deleted", body = AccountDeletedResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Protected account"),
    ),
    security(("ProxyHeader" = []))
)]
#[instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)), err)]
pub async fn delete_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    current_user: CurrentUser,
) -> Result<Json<AccountDeletedResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    Users::new(&mut conn).delete(current_user.id).await?;
    info!("Deleted account");

    Ok(Json(AccountDeletedResponse {
        status: "deleted".to_string(),
        logout_url: logout_url(&headers, &state.config.auth.logout_path),
    }))
}
