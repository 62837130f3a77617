//! API request and response data models.
//!
//! These structures define the public JSON contract. They are distinct from the database models
//! in [`crate::db::models`] so storage and wire representations can evolve independently.
//! Top-level API models are camelCase on the wire; nested domain types such as field definitions
//! and prompt templates keep their stored snake_case layout.
//!
//! # Model Categories
//!
//! - [`session`]: session info, onboarding and dashboard overview
//! - [`decks`]: deck create/update bodies, listings, options and import results
//! - [`cards`]: card editor actions, rendered card groups and card options
//! - [`profile`]: the signed-in user's profile and stored key
//! - [`users`]: the current user, emails, and admin user management
//! - [`pagination`]: page-based list parameters
//!
//! All models are annotated with `utoipa` for the OpenAPI document.

pub mod cards;
pub mod decks;
pub mod pagination;
pub mod profile;
pub mod session;
pub mod users;
