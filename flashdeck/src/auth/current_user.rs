use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::admins::AdminPolicy,
    config::Config,
    db::{
        handlers::{Users, users::normalize_email},
        models::users::UserDBResponse,
    },
    errors::{Error, Result},
};
use axum::{extract::FromRequestParts, http::request::Parts};
use sqlx::PgPool;
use tracing::{debug, instrument, trace};

/// The verified email forwarded by the identity proxy, trimmed and lowercased.
/// A present but blank header counts as absent.
fn verified_email(parts: &Parts, config: &Config) -> Option<String> {
    parts
        .headers
        .get(&config.auth.proxy_header.header_name)
        .and_then(|h| h.to_str().ok())
        .map(normalize_email)
        .filter(|email| !email.is_empty())
}

/// Map an email to its user, creating the user when `auto_create` is set.
///
/// Returns `None` for an unknown email when auto-creation is off.
#[instrument(skip(db, admins))]
async fn resolve_email(db: &PgPool, admins: &AdminPolicy, email: &str, auto_create: bool) -> Result<Option<UserDBResponse>> {
    let mut conn = db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut users = Users::new(&mut conn);
    let promote = admins.is_admin_email(email);

    if !auto_create && users.get_user_by_email(email).await?.is_none() {
        return Ok(None);
    }
    Ok(Some(users.resolve_by_email(email, promote).await?))
}

/// Extract user from proxy header if present and valid
/// Returns:
/// - None: No proxy header present
/// - Some(Ok(user)): Valid proxy header found and user authenticated
/// - Some(Err(error)): Proxy header present but user lookup/creation failed
#[instrument(skip(parts, state))]
async fn try_proxy_header_auth(parts: &Parts, state: &AppState) -> Option<Result<CurrentUser>> {
    let email = verified_email(parts, &state.config)?;

    match resolve_email(&state.db, &state.admins, &email, state.config.auth.proxy_header.auto_create_users).await {
        Ok(Some(user)) => Some(Ok(user.into())),
        Ok(None) => Some(Err(Error::Unauthenticated {
            message: Some("No profile exists for this identity.".to_string()),
        })),
        Err(e) => Some(Err(e)),
    }
}

/// Resolve the configured substitute identity. Only reached when no header was sent.
#[instrument(skip(state))]
async fn try_local_bypass_auth(state: &AppState) -> Option<Result<CurrentUser>> {
    let bypass = &state.config.auth.local_bypass;
    if !bypass.enabled {
        return None;
    }
    let email = normalize_email(&bypass.email);
    match resolve_email(&state.db, &state.admins, &email, true).await {
        Ok(user) => user.map(|u| Ok(u.into())),
        Err(e) => Some(Err(e)),
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        if state.config.auth.proxy_header.enabled {
            match try_proxy_header_auth(parts, state).await {
                Some(Ok(user)) => {
                    debug!("Found proxy header authenticated user: {}", user.id);
                    return Ok(user);
                }
                Some(Err(e)) => {
                    trace!("Proxy header authentication failed: {:?}", e);
                    return Err(e);
                }
                None => {
                    trace!("No proxy header present");
                }
            }
        }

        match try_local_bypass_auth(state).await {
            Some(Ok(user)) => {
                debug!("Using local bypass user: {}", user.id);
                Ok(user)
            }
            Some(Err(e)) => Err(e),
            None => {
                trace!("No authentication credentials found in request");
                Err(Error::Unauthenticated { message: None })
            }
        }
    }
}
