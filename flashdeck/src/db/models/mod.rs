//! Database record models matching table schemas.
//!
//! Models are distinct from the API models in [`crate::api::models`] so storage and wire
//! representations can evolve independently. Row structs derive `sqlx::FromRow`; JSONB columns
//! are read through `sqlx::types::Json`.

pub mod api_keys;
pub mod card_groups;
pub mod decks;
pub mod users;
