//! Database models for decks.

use crate::cards::fields::FieldDefinition;
use crate::cards::templates::PromptTemplates;
use crate::types::{DeckId, UserId};
use bon::Builder;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

/// Database request for creating a deck.
///
/// `id`, `anki_id` and the timestamps are only set when restoring a backup.
#[derive(Debug, Clone, Builder)]
pub struct DeckCreateDBRequest {
    pub owner_id: UserId,
    #[builder(into)]
    pub name: String,
    #[builder(into)]
    pub target_language: String,
    pub field_schema: Vec<FieldDefinition>,
    #[builder(default)]
    pub prompt_templates: PromptTemplates,
    pub id: Option<DeckId>,
    pub anki_id: Option<Uuid>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Database request for updating a deck. Templates are written whole; merging overrides happens
/// before the request is built.
#[derive(Debug, Clone, Default)]
pub struct DeckUpdateDBRequest {
    pub name: Option<String>,
    pub target_language: Option<String>,
    pub field_schema: Option<Vec<FieldDefinition>>,
    pub prompt_templates: Option<PromptTemplates>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DeckDBResponse {
    pub id: DeckId,
    pub owner_id: UserId,
    pub name: String,
    pub target_language: String,
    pub field_schema: Json<Vec<FieldDefinition>>,
    pub prompt_templates: Json<PromptTemplates>,
    pub anki_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A deck with its entry statistics, as listed on the dashboard
#[derive(Debug, Clone, FromRow)]
pub struct DeckSummaryDBResponse {
    #[sqlx(flatten)]
    pub deck: DeckDBResponse,
    pub entry_count: i64,
    pub card_count: i64,
    /// Newest of the deck's own update and its entries' updates
    pub last_modified: DateTime<Utc>,
}
