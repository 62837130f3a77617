//! OpenAPI documentation for the flashcard API at `/api/v1/*`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
};

use crate::api;
use crate::config::ProxyHeaderAuthConfig;

/// Security scheme for the identity proxy header.
struct ProxyHeaderSecurityAddon;

impl Modify for ProxyHeaderSecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let header_name = ProxyHeaderAuthConfig::default().header_name;
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "ProxyHeader".to_string(),
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    header_name,
                    "Email of the signed-in user, set by the identity-aware proxy in front of the service. \
                     Requests without it are rejected unless local bypass is enabled."
                        .to_string(),
                ))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    servers(
        (url = "/api/v1", description = "Flashcard API server")
    ),
    modifiers(&ProxyHeaderSecurityAddon),
    paths(
        api::handlers::session::get_session,
        api::handlers::session::set_native_language,
        api::handlers::session::get_overview,
        api::handlers::decks::deck_options,
        api::handlers::decks::list_decks,
        api::handlers::decks::create_deck,
        api::handlers::decks::get_deck,
        api::handlers::decks::update_deck,
        api::handlers::decks::delete_deck,
        api::handlers::decks::list_deck_cards,
        api::handlers::decks::export_deck,
        api::handlers::decks::backup_deck,
        api::handlers::decks::import_deck,
        api::handlers::cards::card_options,
        api::handlers::cards::card_action,
        api::handlers::cards::get_card_group,
        api::handlers::cards::delete_card_group,
        api::handlers::cards::card_audio,
        api::handlers::profile::get_profile,
        api::handlers::profile::put_api_key,
        api::handlers::profile::delete_api_key,
        api::handlers::profile::add_email,
        api::handlers::profile::remove_email,
        api::handlers::profile::make_primary_email,
        api::handlers::profile::delete_account,
        api::handlers::admin::list_users,
        api::handlers::admin::get_user,
        api::handlers::admin::update_user,
        api::handlers::admin::delete_user,
        api::handlers::admin::add_user_email,
        api::handlers::admin::update_user_email,
        api::handlers::admin::remove_user_email,
        api::handlers::admin::make_user_email_primary,
        api::handlers::admin::list_protected_emails,
    ),
    components(
        schemas(
            crate::types::Direction,
            crate::cards::fields::FieldDefinition,
            crate::cards::fields::FieldDefinitionInput,
            crate::cards::templates::CardTemplate,
            crate::cards::templates::CardTemplatesInput,
            crate::cards::templates::PromptPair,
            crate::cards::templates::AudioSettings,
            crate::cards::templates::PromptTemplates,
            crate::generation::FieldStatus,
            crate::generation::audio::AudioPreferences,
            crate::generation::audio::ResolvedAudioPreferences,
            api::models::session::SessionResponse,
            api::models::session::NativeLanguageUpdate,
            api::models::session::NativeLanguageResponse,
            api::models::session::OverviewResponse,
            api::models::decks::DeckCreate,
            api::models::decks::DeckUpdate,
            api::models::decks::DeckResponse,
            api::models::decks::DeckSummaryResponse,
            api::models::decks::DeckEnvelope,
            api::models::decks::DeckListResponse,
            api::models::decks::DeckDetailResponse,
            api::models::decks::DefaultCardTemplates,
            api::models::decks::DeckOptionsResponse,
            api::models::decks::CardListResponse,
            api::models::decks::ImportResponse,
            api::models::cards::InputMode,
            api::models::cards::CardActionRequest,
            api::models::cards::CardActionResponse,
            api::models::cards::CardFaceResponse,
            api::models::cards::CardGroupResponse,
            api::models::cards::RecentEntryResponse,
            api::models::cards::CardGroupDetail,
            api::models::cards::CardGroupDetailResponse,
            api::models::cards::CardGroupDeletedResponse,
            api::models::cards::CardOptionsResponse,
            api::models::profile::ApiKeySummary,
            api::models::profile::ProfileResponse,
            api::models::profile::ApiKeyUpdate,
            api::models::profile::AccountDeletedResponse,
            api::models::users::UserSummary,
            api::models::users::EmailResponse,
            api::models::users::EmailListResponse,
            api::models::users::EmailCreate,
            api::models::users::EmailUpdate,
            api::models::users::AdminUserResponse,
            api::models::users::AdminUserListResponse,
            api::models::users::AdminUserDetailResponse,
            api::models::users::AdminUserUpdate,
            api::models::users::ProtectedEmailsResponse,
        )
    ),
    tags(
        (name = "session", description = "Signed-in user, onboarding and dashboard"),
        (name = "decks", description = "Decks, exports, backups and imports"),
        (name = "cards", description = "Card editor actions, card groups and audio"),
        (name = "profile", description = "Personal API key, linked emails and account deletion"),
        (name = "admin", description = "User management (admins only)"),
    ),
    info(
        title = "Flashdeck API",
        description = "Bilingual flashcard decks with generated fields and audio, exported as Anki packages.",
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_every_area() {
        let doc = ApiDoc::openapi();
        for path in [
            "/session",
            "/decks",
            "/decks/import",
            "/cards/actions",
            "/cards/{id}/audio",
            "/profile/api-key",
            "/admin/users/{id}/emails/{email_id}/primary",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        let schemes = doc.components.unwrap().security_schemes;
        assert!(schemes.contains_key("ProxyHeader"));
    }
}
