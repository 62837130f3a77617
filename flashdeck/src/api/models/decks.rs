//! API request/response models for decks, their listings and archives.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::cards::CardGroupResponse;
use super::pagination::Pagination;
use crate::archive::ImportOutcome;
use crate::cards::fields::{FieldDefinition, FieldDefinitionInput, LibraryField, hydrate_field_schema};
use crate::cards::templates::{CardTemplate, CardTemplatesInput, PromptPair, PromptTemplates, TemplateOverrides};
use crate::db::models::decks::{DeckDBResponse, DeckSummaryDBResponse};
use crate::types::{DeckId, UserId};

/// Body of `POST /decks`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeckCreate {
    pub name: String,
    pub target_language: String,
    /// Defaults to the library schema
    pub field_schema: Option<Vec<FieldDefinitionInput>>,
    pub generation_prompts: Option<BTreeMap<String, PromptPair>>,
    pub card_templates: Option<CardTemplatesInput>,
    pub audio_instructions: Option<String>,
    pub audio_enabled: Option<bool>,
}

/// Body of `PUT /decks/{id}`. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeckUpdate {
    pub name: Option<String>,
    pub target_language: Option<String>,
    pub field_schema: Option<Vec<FieldDefinitionInput>>,
    pub generation_prompts: Option<BTreeMap<String, PromptPair>>,
    pub card_templates: Option<CardTemplatesInput>,
    pub audio_instructions: Option<String>,
    pub audio_enabled: Option<bool>,
}

impl DeckCreate {
    pub fn template_overrides(&self) -> TemplateOverrides {
        TemplateOverrides {
            generation_prompts: self.generation_prompts.clone(),
            card_templates: self.card_templates.clone(),
            audio_instructions: self.audio_instructions.clone(),
            audio_enabled: self.audio_enabled,
        }
    }
}

impl DeckUpdate {
    pub fn template_overrides(&self) -> TemplateOverrides {
        TemplateOverrides {
            generation_prompts: self.generation_prompts.clone(),
            card_templates: self.card_templates.clone(),
            audio_instructions: self.audio_instructions.clone(),
            audio_enabled: self.audio_enabled,
        }
    }

    pub fn touches_templates(&self) -> bool {
        self.generation_prompts.is_some()
            || self.card_templates.is_some()
            || self.audio_instructions.is_some()
            || self.audio_enabled.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeckResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: DeckId,
    #[schema(value_type = String, format = "uuid")]
    pub owner_id: UserId,
    pub name: String,
    pub target_language: String,
    pub field_schema: Vec<FieldDefinition>,
    pub prompt_templates: PromptTemplates,
    pub audio_enabled: bool,
    /// Stable id carried into exports and backups
    #[schema(value_type = String, format = "uuid")]
    pub anki_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DeckDBResponse> for DeckResponse {
    fn from(db: DeckDBResponse) -> Self {
        let prompt_templates = db.prompt_templates.0;
        Self {
            id: db.id,
            owner_id: db.owner_id,
            name: db.name,
            target_language: db.target_language,
            field_schema: hydrate_field_schema(db.field_schema.0),
            audio_enabled: prompt_templates.audio.enabled,
            prompt_templates,
            anki_id: db.anki_id,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

/// A deck with entry statistics, as listed on the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeckSummaryResponse {
    #[serde(flatten)]
    pub deck: DeckResponse,
    pub entry_count: i64,
    pub card_count: i64,
    pub last_modified: DateTime<Utc>,
}

impl From<DeckSummaryDBResponse> for DeckSummaryResponse {
    fn from(db: DeckSummaryDBResponse) -> Self {
        Self {
            deck: db.deck.into(),
            entry_count: db.entry_count,
            card_count: db.card_count,
            last_modified: db.last_modified,
        }
    }
}

/// Single-deck envelope used by create, update and import.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeckEnvelope {
    pub deck: DeckResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeckListResponse {
    pub decks: Vec<DeckSummaryResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeckDetailResponse {
    pub deck: DeckResponse,
    /// The five most recently updated entries
    pub cards: Vec<CardGroupResponse>,
    /// Library defaults merged with this deck's overrides
    pub generation_prompts: BTreeMap<String, PromptPair>,
    pub entry_count: i64,
    pub card_count: i64,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DefaultCardTemplates {
    pub forward: CardTemplate,
    pub backward: CardTemplate,
}

/// Everything the deck editor needs to offer choices.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeckOptionsResponse {
    #[schema(value_type = Vec<Object>)]
    pub field_library: Vec<LibraryField>,
    pub default_field_schema: Vec<FieldDefinition>,
    pub audio_instructions_template: String,
    pub default_card_templates: DefaultCardTemplates,
    pub default_generation_prompts: BTreeMap<String, PromptPair>,
    pub target_language_options: Vec<String>,
}

/// Query of `GET /decks/{id}/cards`.
#[serde_as]
#[derive(Debug, Default, Clone, Deserialize, IntoParams, ToSchema)]
pub struct CardListQuery {
    /// 1-based page number (default: 1)
    #[param(default = 1, minimum = 1)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub page: Option<i64>,
    /// Items per page
    #[param(minimum = 1)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub limit: Option<i64>,
    /// Case-insensitive substring over payload values
    pub q: Option<String>,
}

impl CardListQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination {
            page: self.page,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CardListResponse {
    pub cards: Vec<CardGroupResponse>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub pages: i64,
}

/// Result of `POST /decks/import`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ImportResponse {
    pub deck: DeckResponse,
    /// `created`, `merged` or `cancelled`
    pub status: String,
    /// Entries written into an existing deck
    pub written: Option<usize>,
}

impl From<ImportOutcome> for ImportResponse {
    fn from(outcome: ImportOutcome) -> Self {
        let status = outcome.status().to_string();
        let (deck, written) = match outcome {
            ImportOutcome::Created(deck) | ImportOutcome::Cancelled(deck) => (deck, None),
            ImportOutcome::Merged { deck, written } => (deck, Some(written)),
        };
        Self {
            deck: deck.into(),
            status,
            written,
        }
    }
}
