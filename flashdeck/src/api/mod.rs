//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers for all API endpoints
//! - **[`models`]**: Request/response data structures for API communication
//!
//! # API Structure
//!
//! Every route lives under `/api/v1`:
//!
//! - **Session** (`/session*`): who is signed in, onboarding, dashboard overview
//! - **Decks** (`/decks*`): decks, their cards, exports, backups and imports
//! - **Cards** (`/cards*`): editor actions, card groups and audio
//! - **Profile** (`/profile*`): personal API key, linked emails, account deletion
//! - **Admin** (`/admin*`): user management
//!
//! # OpenAPI Documentation
//!
//! All endpoints are documented with `utoipa`. The rendered reference is served at
//! `/api/docs` and the raw document at `/api/openapi.json`.

pub mod handlers;
pub mod models;
