//! Deck content model: field schemas, payloads, card templates and identifiers.
//!
//! Nothing here touches the database; repositories and handlers build on these types.

pub mod fields;
pub mod ids;
pub mod payload;
pub mod templates;
