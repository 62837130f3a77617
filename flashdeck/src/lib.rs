//! # flashdeck: bilingual flashcard decks
//!
//! `flashdeck` is a small web service for building bilingual flashcard decks. A learner creates
//! decks for a target language, types a foreign phrase, and lets an OpenAI-compatible provider
//! fill in the translation, a dictionary entry, an example sentence and spoken audio. Decks are
//! exported as Anki packages for studying and as backups that can be imported again.
//!
//! ## Architecture
//!
//! The application is built on [Axum](https://github.com/tokio-rs/axum) for the HTTP layer and
//! uses PostgreSQL for all persistence, including audio clips.
//!
//! ### Request Flow
//!
//! The service sits behind an identity-aware proxy that forwards the verified email of the
//! signed-in user in a header. Every request under `/api/v1` resolves that email to a user
//! ([`auth::current_user`]), creating the user on first sight. Addresses listed in the
//! configuration are always admins and are protected from demotion and deletion.
//!
//! Handlers ([`api::handlers`]) check ownership, talk to the database through repositories
//! ([`db::handlers`]) and, for the card editor, call the provider through [`generation`].
//!
//! ### Core Components
//!
//! - [`cards`]: field schemas, payload normalisation, card templates and deterministic ids
//! - [`generation`]: provider client, field generation pipeline, audio and key resolution
//! - [`archive`]: `.apkg` export, `.awdeck` backups and backup import
//! - [`auth`]: identity resolution, admin allow-list and permission checks
//! - [`db`]: PostgreSQL repositories
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use flashdeck::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = flashdeck::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     flashdeck::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.
pub mod api;
pub mod archive;
pub mod auth;
pub mod cards;
pub mod config;
mod crypto;
pub mod db;
pub mod errors;
pub mod generation;
mod openapi;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub mod test_utils;

use crate::{
    api::handlers::{admin, cards as card_handlers, decks, profile, session},
    auth::admins::AdminPolicy,
    config::CorsOrigin,
    db::handlers::ProtectedEmails,
    openapi::ApiDoc,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{self, HeaderValue},
    routing::{delete, get, patch, post, put},
};
use bon::Builder;
pub use config::Config;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

/// Application state shared across all request handlers.
///
/// - `db`: PostgreSQL connection pool
/// - `config`: Application configuration loaded from file and environment
/// - `http`: Outbound HTTP client for the provider and remote audio
/// - `admins`: The configured always-admin addresses
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .db(pool)
///     .config(config)
///     .http(generation::http_client()?)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    pub http: reqwest::Client,
    #[builder(default)]
    pub admins: AdminPolicy,
}

/// Get the flashdeck database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Connect to the configured database and run migrations.
#[instrument(skip_all)]
async fn setup_database(config: &Config) -> anyhow::Result<PgPool> {
    let pool = db::connect(&config.database.url, &config.database.pool).await?;
    migrator().run(&pool).await?;
    Ok(pool)
}

/// Make the protected-email table match the configured admin addresses.
#[instrument(skip_all)]
async fn sync_protected_emails(pool: &PgPool, admins: &AdminPolicy) -> anyhow::Result<()> {
    let mut conn = pool.acquire().await?;
    ProtectedEmails::new(&mut conn).replace_all(&admins.emails()).await?;
    debug!(count = admins.emails().len(), "Protected emails synced");
    Ok(())
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.auth.cors.allowed_origins {
        let header_value = match origin {
            CorsOrigin::Wildcard => "*".parse::<HeaderValue>()?,
            CorsOrigin::Url(url) => url.as_str().trim_end_matches('/').parse::<HeaderValue>()?,
        };
        origins.push(header_value);
    }

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::PUT,
            http::Method::PATCH,
            http::Method::DELETE,
        ])
        .allow_headers([http::header::CONTENT_TYPE])
        .allow_credentials(config.auth.cors.allow_credentials)
        .expose_headers(vec![http::header::CONTENT_DISPOSITION]);

    if let Some(max_age) = config.auth.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the main application router.
///
/// - `/api/v1/*`: the flashcard API
/// - `/api/docs` and `/api/openapi.json`: API reference
/// - `/healthz`: liveness check
///
/// CORS and request tracing wrap everything.
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    // The import body limit leaves room for multipart framing around the file itself
    let import_limit = state.config.limits.max_import_bytes.saturating_add(64 * 1024);

    let api_routes = Router::new()
        // Session and dashboard
        .route("/session", get(session::get_session))
        .route("/session/native-language", post(session::set_native_language))
        .route("/session/overview", get(session::get_overview))
        // Decks
        .route("/decks", get(decks::list_decks).post(decks::create_deck))
        .route("/decks/options", get(decks::deck_options))
        .route(
            "/decks/import",
            post(decks::import_deck).layer(DefaultBodyLimit::max(import_limit)),
        )
        .route(
            "/decks/{id}",
            get(decks::get_deck).put(decks::update_deck).delete(decks::delete_deck),
        )
        .route("/decks/{id}/cards", get(decks::list_deck_cards))
        .route("/decks/{id}/export", get(decks::export_deck))
        .route("/decks/{id}/backup", get(decks::backup_deck))
        // Card editor
        .route("/cards/options", get(card_handlers::card_options))
        .route("/cards/actions", post(card_handlers::card_action))
        .route(
            "/cards/groups/{id}",
            get(card_handlers::get_card_group).delete(card_handlers::delete_card_group),
        )
        .route("/cards/{id}/audio", get(card_handlers::card_audio))
        // Profile
        .route("/profile", get(profile::get_profile).delete(profile::delete_account))
        .route("/profile/api-key", put(profile::put_api_key).delete(profile::delete_api_key))
        .route("/profile/emails", post(profile::add_email))
        .route("/profile/emails/{email_id}", delete(profile::remove_email))
        .route("/profile/emails/{email_id}/primary", post(profile::make_primary_email))
        // Admin
        .route("/admin/users", get(admin::list_users))
        .route(
            "/admin/users/{id}",
            get(admin::get_user).patch(admin::update_user).delete(admin::delete_user),
        )
        .route("/admin/users/{id}/emails", post(admin::add_user_email))
        .route(
            "/admin/users/{id}/emails/{email_id}",
            patch(admin::update_user_email).delete(admin::remove_user_email),
        )
        .route("/admin/users/{id}/emails/{email_id}/primary", post(admin::make_user_email_primary))
        .route("/admin/protected-emails", get(admin::list_protected_emails));

    let cors_layer = create_cors_layer(&state.config)?;

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/api/openapi.json", get(|| async { axum::Json(ApiDoc::openapi()) }))
        .nest("/api/v1", api_routes)
        .merge(Scalar::with_url("/api/docs", ApiDoc::openapi()))
        .with_state(state)
        .layer(cors_layer)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    Ok(router)
}

/// A configured, migrated application ready to serve.
pub struct Application {
    router: Router,
    config: Config,
    pool: PgPool,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        Self::new_with_pool(config, None).await
    }

    /// Like [`Application::new`], reusing `pool` when one is given (tests pass their own).
    pub async fn new_with_pool(config: Config, pool: Option<PgPool>) -> anyhow::Result<Self> {
        debug!("Starting flashdeck with configuration: {:#?}", config);

        let pool = match pool {
            Some(pool) => {
                migrator().run(&pool).await?;
                pool
            }
            None => setup_database(&config).await?,
        };

        let admins = AdminPolicy::from_config(&config.auth);
        sync_protected_emails(&pool, &admins).await?;

        let app_state = AppState::builder()
            .db(pool.clone())
            .config(config.clone())
            .http(generation::http_client()?)
            .admins(admins)
            .build();
        let router = build_router(app_state)?;

        Ok(Self { router, config, pool })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Flashdeck listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Closing database connections...");
        self.pool.close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::db::handlers::{ProtectedEmails, Users};
    use crate::test_utils::*;
    use axum::http::StatusCode;
    use serde_json::Value;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_healthz_and_docs(pool: PgPool) {
        let app = create_test_app(pool).await;

        let health = app.get("/healthz").await;
        health.assert_status_ok();
        assert_eq!(health.text(), "OK");

        let doc: Value = app.get("/api/openapi.json").await.json();
        assert!(doc["paths"]["/cards/actions"].is_object());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_requests_without_identity_are_rejected(pool: PgPool) {
        let app = create_test_app(pool).await;

        let response = app.get("/api/v1/decks").await;
        response.assert_status(StatusCode::UNAUTHORIZED);
        let body: Value = response.json();
        assert_eq!(body["kind"], "unauthenticated");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_startup_syncs_protected_emails(pool: PgPool) {
        let mut config = create_test_config();
        config.auth.admin_emails = vec!["Second.Admin@Example.com".to_string()];
        let app = create_test_app_with_config(pool.clone(), config).await;

        let mut conn = pool.acquire().await.unwrap();
        let protected = ProtectedEmails::new(&mut conn).list().await.unwrap();
        assert_eq!(protected, vec![TEST_ADMIN_EMAIL.to_string(), "second.admin@example.com".to_string()]);

        // Configured admins are promoted the first time they are seen.
        let (name, value) = auth_header_for_email("second.admin@example.com");
        app.get("/api/v1/session").add_header(name, value).await.assert_status_ok();
        let user = Users::new(&mut conn)
            .get_user_by_email("second.admin@example.com")
            .await
            .unwrap()
            .unwrap();
        assert!(user.is_admin);
    }
}
