//! API models for the session and the dashboard.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::cards::RecentEntryResponse;
use super::decks::DeckSummaryResponse;
use super::users::UserSummary;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub user: UserSummary,
    /// Where the browser goes to end the identity-proxy session
    pub logout_url: String,
    /// Whether a personal or system provider key is available
    pub can_generate: bool,
    pub needs_onboarding: bool,
    pub native_language_options: Vec<String>,
    pub target_language_options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NativeLanguageUpdate {
    pub native_language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NativeLanguageResponse {
    pub status: String,
    pub user: UserSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OverviewResponse {
    pub requires_onboarding: bool,
    /// Decks that have gone longest without changes
    pub stale_decks: Vec<DeckSummaryResponse>,
    pub recent_entries: Vec<RecentEntryResponse>,
}
