//! Session info, onboarding and the dashboard overview.

use axum::{Json, extract::State, http::HeaderMap};
use tracing::instrument;

use crate::{
    AppState,
    api::models::{
        cards::{CardGroupResponse, RecentEntryResponse},
        decks::DeckSummaryResponse,
        session::{NativeLanguageResponse, NativeLanguageUpdate, OverviewResponse, SessionResponse},
        users::{CurrentUser, UserSummary},
    },
    auth::utils::logout_url,
    db::{
        handlers::{CardGroups, Decks, Repository, Users, decks::Recency},
        models::users::UserUpdateDBRequest,
    },
    errors::{Error, Result},
    generation::keys::resolve_api_key,
    types::abbrev_uuid,
};

const STALE_DECKS: i64 = 3;
const RECENT_ENTRIES: i64 = 4;

#[utoipa::path(
    get,
    path = "/session",
    tag = "session",
    summary = "Current session",
    description = "The signed-in user, the logout URL, whether generation is available and the language options",
    responses(
        (status = 200, description = "Session info", body = SessionResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("ProxyHeader" = []))
)]
pub async fn get_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    current_user: CurrentUser,
) -> Result<Json<SessionResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let can_generate = resolve_api_key(&mut conn, &state.config, current_user.id).await?.is_some();

    Ok(Json(SessionResponse {
        user: UserSummary::from(&current_user),
        logout_url: logout_url(&headers, &state.config.auth.logout_path),
        can_generate,
        needs_onboarding: current_user.needs_onboarding(),
        native_language_options: state.config.languages.native_options.clone(),
        target_language_options: state.config.languages.target_options.clone(),
    }))
}

#[utoipa::path(
    post,
    path = "/session/native-language",
    tag = "session",
    summary = "Set native language",
    description = "Complete onboarding, or change the native language later",
    request_body = NativeLanguageUpdate,
    responses(
        (status = 200, description = "Native language stored", body = NativeLanguageResponse),
        (status = 400, description = "Unsupported native language"),
        (status = 401, description = "Unauthorized"),
    ),
    security(("ProxyHeader" = []))
)]
#[instrument(skip(state, current_user), fields(user_id = %abbrev_uuid(&current_user.id)), err)]
pub async fn set_native_language(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(data): Json<NativeLanguageUpdate>,
) -> Result<Json<NativeLanguageResponse>> {
    let requested = data.native_language.trim();
    let language = state
        .config
        .languages
        .native_options
        .iter()
        .find(|option| option.eq_ignore_ascii_case(requested))
        .cloned()
        .ok_or_else(|| Error::BadRequest {
            message: "Unsupported native language.".to_string(),
        })?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut conn)
        .update(
            current_user.id,
            &UserUpdateDBRequest {
                native_language: Some(language),
                is_admin: None,
            },
        )
        .await?;

    Ok(Json(NativeLanguageResponse {
        status: "ok".to_string(),
        user: UserSummary::from(&user),
    }))
}

#[utoipa::path(
    get,
    path = "/session/overview",
    tag = "session",
    summary = "Dashboard overview",
    description = "Up to three decks that have gone longest without changes and the four most recent entries",
    responses(
        (status = 200, description = "Overview", body = OverviewResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("ProxyHeader" = []))
)]
pub async fn get_overview(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<OverviewResponse>> {
    let Ok(native_language) = current_user.onboarded_language() else {
        return Ok(Json(OverviewResponse {
            requires_onboarding: true,
            stale_decks: Vec::new(),
            recent_entries: Vec::new(),
        }));
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let stale_decks = Decks::new(&mut conn)
        .summaries(current_user.id, Recency::LeastRecentFirst, Some(STALE_DECKS))
        .await?;
    let recent = CardGroups::new(&mut conn)
        .recent_for_owner(current_user.id, RECENT_ENTRIES)
        .await?;

    let deck_ids = recent.iter().map(|group| group.deck_id).collect();
    let decks = Decks::new(&mut conn).get_bulk(deck_ids).await?;

    let recent_entries = recent
        .into_iter()
        .filter_map(|group| {
            let deck = decks.get(&group.deck_id)?;
            Some(RecentEntryResponse {
                group: CardGroupResponse::render(
                    group,
                    &deck.prompt_templates.0,
                    &deck.target_language,
                    Some(native_language),
                ),
                deck_name: deck.name.clone(),
                target_language: deck.target_language.clone(),
            })
        })
        .collect();

    Ok(Json(OverviewResponse {
        requires_onboarding: false,
        stale_decks: stale_decks.into_iter().map(DeckSummaryResponse::from).collect(),
        recent_entries,
    }))
}
