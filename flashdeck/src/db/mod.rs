//! Database layer for data persistence and access.
//!
//! This module implements the data access layer using SQLx with PostgreSQL.
//!
//! ```text
//! ┌─────────────┐
//! │  Handlers   │  (api::handlers)
//! └──────┬──────┘
//!        ↓
//! ┌─────────────┐
//! │ Repositories│  (db::handlers - queries)
//! └──────┬──────┘
//!        ↓
//! ┌─────────────┐
//! │   Models    │  (db::models - database records)
//! └──────┬──────┘
//!        ↓
//! ┌─────────────┐
//! │  PostgreSQL │
//! └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`handlers`]: Repository implementations
//! - [`models`]: Database record structures matching table schemas
//! - [`errors`]: Database-specific error types
//!
//! # Transactions
//!
//! Repositories borrow a connection. Handlers that touch several tables open a transaction
//! and hand `&mut tx` to each repository in turn:
//!
//! ```ignore
//! let mut tx = pool.begin().await?;
//! let user = Users::new(&mut tx).resolve_by_email("user@example.com", false).await?;
//! Decks::new(&mut tx).list(&DeckFilter { owner_id: user.id }).await?;
//! tx.commit().await?;
//! ```
//!
//! # Migrations
//!
//! Migrations live in `migrations/` and are embedded through [`crate::migrator`].

pub mod errors;
pub mod handlers;
pub mod models;

use crate::config::PoolSettings;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::info;

/// Open a connection pool using the configured limits. Zero timeouts mean "never".
pub async fn connect(url: &str, settings: &PoolSettings) -> Result<PgPool, sqlx::Error> {
    let optional = |secs: u64| (secs > 0).then(|| Duration::from_secs(secs));

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .idle_timeout(optional(settings.idle_timeout_secs))
        .max_lifetime(optional(settings.max_lifetime_secs))
        .connect(url)
        .await?;

    info!(max_connections = settings.max_connections, "Database pool ready");
    Ok(pool)
}
