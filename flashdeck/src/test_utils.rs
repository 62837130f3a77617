//! Fixtures shared by the handler, resolver and repository tests.

use crate::{
    AppState, Application,
    auth::admins::AdminPolicy,
    cards::{fields::default_field_schema, ids::card_group_id},
    config::{Config, PoolSettings, ProxyHeaderAuthConfig},
    db::{
        handlers::{CardGroups, Decks, Repository, Users},
        models::{
            card_groups::{AudioUpdate, CardGroupDBResponse, CardGroupUpsertDBRequest},
            decks::{DeckCreateDBRequest, DeckDBResponse},
            users::{UserCreateDBRequest, UserDBResponse},
        },
    },
    types::{Direction, UserId},
};
use axum_test::TestServer;
use sqlx::PgPool;

/// The built-in admin address of every test configuration. It is always protected.
pub const TEST_ADMIN_EMAIL: &str = "admin@example.com";

pub fn create_test_config() -> Config {
    let mut config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        ..Default::default()
    };
    config.database.pool = PoolSettings {
        max_connections: 2,
        min_connections: 0,
        ..Default::default()
    };
    config.auth.proxy_header = ProxyHeaderAuthConfig::default();
    config.auth.local_bypass.enabled = false;
    config.auth.default_admin_email = TEST_ADMIN_EMAIL.to_string();
    config.auth.admin_emails = Vec::new();
    config.provider.api_key = None;
    config.languages.native_options = vec!["English".to_string(), "German".to_string()];
    config.languages.target_options = vec!["Danish".to_string(), "Hungarian".to_string()];
    config
}

/// State for exercising extractors directly, without a router.
pub fn create_test_state(pool: PgPool, config: Config) -> AppState {
    AppState::builder()
        .db(pool)
        .admins(AdminPolicy::from_config(&config.auth))
        .http(crate::generation::http_client().expect("Failed to build HTTP client"))
        .config(config)
        .build()
}

pub async fn create_test_app(pool: PgPool) -> TestServer {
    create_test_app_with_config(pool, create_test_config()).await
}

pub async fn create_test_app_with_config(pool: PgPool, config: Config) -> TestServer {
    Application::new_with_pool(config, Some(pool))
        .await
        .expect("Failed to create application")
        .into_test_server()
}

/// The identity header the proxy would send for `email`.
pub fn auth_header_for_email(email: &str) -> (String, String) {
    (ProxyHeaderAuthConfig::default().header_name, email.to_string())
}

pub fn auth_header(user: &UserDBResponse) -> (String, String) {
    auth_header_for_email(user.primary_email().expect("test user has a primary email"))
}

/// An onboarded (English) standard user.
pub async fn create_test_user(pool: &PgPool, email: &str) -> UserDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Users::new(&mut conn)
        .create(
            &UserCreateDBRequest::builder()
                .email(email)
                .native_language("English".to_string())
                .build(),
        )
        .await
        .expect("Failed to create test user")
}

pub async fn create_test_admin_user(pool: &PgPool) -> UserDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Users::new(&mut conn)
        .create(
            &UserCreateDBRequest::builder()
                .email(TEST_ADMIN_EMAIL)
                .is_admin(true)
                .native_language("English".to_string())
                .build(),
        )
        .await
        .expect("Failed to create test admin user")
}

/// A Danish deck with the default field schema and templates.
pub async fn create_test_deck(pool: &PgPool, owner_id: UserId, name: &str) -> DeckDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Decks::new(&mut conn)
        .create(
            &DeckCreateDBRequest::builder()
                .owner_id(owner_id)
                .name(name)
                .target_language("Danish")
                .field_schema(default_field_schema())
                .build(),
        )
        .await
        .expect("Failed to create test deck")
}

/// A two-direction group without audio.
pub async fn create_test_group(pool: &PgPool, deck: &DeckDBResponse, foreign: &str, native: &str) -> CardGroupDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    let payload = [
        ("foreign_phrase".to_string(), foreign.to_string()),
        ("native_phrase".to_string(), native.to_string()),
    ]
    .into_iter()
    .collect();

    CardGroups::new(&mut conn)
        .upsert(&CardGroupUpsertDBRequest {
            id: card_group_id(deck.id, foreign),
            deck_id: deck.id,
            owner_id: deck.owner_id,
            payload,
            directions: Direction::ALL.to_vec(),
            audio: AudioUpdate::Keep,
            created_at: None,
            updated_at: None,
        })
        .await
        .expect("Failed to create test card group")
}
