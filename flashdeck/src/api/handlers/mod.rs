//! HTTP request handlers for all API endpoints.
//!
//! Handlers are organized by resource type. Each one validates its input, checks ownership or
//! admin permission, runs repository calls on a pooled connection and serializes the result.
//!
//! # Handler Modules
//!
//! - [`session`]: current session, onboarding and the dashboard overview
//! - [`decks`]: deck CRUD, card listings, `.apkg` export, backups and backup import
//! - [`cards`]: card editor actions, card group detail/delete and audio playback
//! - [`profile`]: the caller's stored API key, linked emails and account deletion
//! - [`admin`]: user, email and protected-email management for admins
//!
//! # Authentication
//!
//! Handlers take a [`crate::api::models::users::CurrentUser`], resolved from the identity
//! proxy header by [`crate::auth::current_user`]. Admin handlers use
//! [`crate::auth::permissions::RequiresPermission`] instead.
//!
//! # Error Handling
//!
//! Handlers return [`crate::errors::Error`], which converts to a status code and a JSON body
//! of the form `{"kind": ..., "message": ...}`.

pub mod admin;
pub mod cards;
pub mod decks;
pub mod profile;
pub mod session;
