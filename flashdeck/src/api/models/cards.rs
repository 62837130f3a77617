//! API request/response models for card groups and the card editor actions.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::decks::DeckResponse;
use crate::cards::payload::Payload;
use crate::cards::templates::{PromptTemplates, render_card};
use crate::db::models::card_groups::CardGroupDBResponse;
use crate::errors::{Error, Result};
use crate::generation::FieldStatus;
use crate::generation::audio::{AudioPreferences, ResolvedAudioPreferences};
use crate::types::{CardGroupId, CardId, DeckId, Direction};

/// What the card editor asks the server to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardAction {
    /// Persist the group, generating missing fields when a key is available
    Save,
    /// Fill every empty field and synthesize audio, without saving
    PopulateAll,
    /// Regenerate one field (`regen_<key>`), without saving
    RegenField(String),
    RegenAudio,
    /// Download a clip from `audioUrl`
    FetchAudio,
}

impl FromStr for CardAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" | "save" => Ok(CardAction::Save),
            "populate_all" => Ok(CardAction::PopulateAll),
            "regen_audio" => Ok(CardAction::RegenAudio),
            "fetch_audio" => Ok(CardAction::FetchAudio),
            other => match other.strip_prefix("regen_") {
                Some(key) if !key.is_empty() => Ok(CardAction::RegenField(key.to_string())),
                _ => Err(Error::BadRequest {
                    message: "Unsupported action.".to_string(),
                }),
            },
        }
    }
}

impl fmt::Display for CardAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardAction::Save => f.write_str("save"),
            CardAction::PopulateAll => f.write_str("populate_all"),
            CardAction::RegenField(key) => write!(f, "regen_{key}"),
            CardAction::RegenAudio => f.write_str("regen_audio"),
            CardAction::FetchAudio => f.write_str("fetch_audio"),
        }
    }
}

/// Which phrase the user typed first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    #[default]
    Foreign,
    /// The foreign phrase is produced from the native phrase by reverse translation
    Native,
}

/// Body of `POST /cards/actions`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CardActionRequest {
    #[schema(value_type = String, format = "uuid")]
    pub deck_id: DeckId,
    /// Present when editing an existing group
    #[schema(value_type = Option<String>, format = "uuid")]
    pub group_id: Option<CardGroupId>,
    /// `save`, `populate_all`, `regen_<field key>`, `regen_audio` or `fetch_audio`
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub payload: BTreeMap<String, Option<String>>,
    /// Empty means the group's current directions, or both for a new group
    #[serde(default)]
    pub directions: Vec<Direction>,
    /// Base64 audio currently shown in the editor
    pub audio_preview: Option<String>,
    pub audio_url: Option<String>,
    pub audio_preferences: Option<AudioPreferences>,
    #[serde(default)]
    pub input_mode: InputMode,
    /// Fields generation must not touch
    #[serde(default)]
    pub locked_fields: Vec<String>,
}

impl CardActionRequest {
    pub fn action(&self) -> Result<CardAction> {
        self.action.parse()
    }
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CardActionResponse {
    /// `ok` for previews, `saved` once stored
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directions: Option<Vec<Direction>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_status: Option<BTreeMap<String, FieldStatus>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_status: Option<FieldStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = "uuid")]
    pub deck_id: Option<DeckId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = "uuid")]
    pub card_group_id: Option<CardGroupId>,
}

/// One rendered direction of a group.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CardFaceResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: CardId,
    #[schema(value_type = String, format = "uuid")]
    pub anki_id: Uuid,
    pub direction: Direction,
    pub front: String,
    pub back: String,
}

/// A card group with its faces rendered from the deck's templates.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CardGroupResponse {
    #[schema(value_type = String, format = "uuid")]
    pub group_id: CardGroupId,
    #[schema(value_type = String, format = "uuid")]
    pub deck_id: DeckId,
    pub payload: Payload,
    pub directions: Vec<CardFaceResponse>,
    pub has_audio: bool,
    /// Card to request audio through, when the group has audio
    #[schema(value_type = Option<String>, format = "uuid")]
    pub audio_card_id: Option<CardId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CardGroupResponse {
    pub fn render(
        group: CardGroupDBResponse,
        templates: &PromptTemplates,
        target_language: &str,
        native_language: Option<&str>,
    ) -> Self {
        let directions: Vec<CardFaceResponse> = group
            .cards
            .iter()
            .map(|card| {
                let faces = render_card(templates, card.direction, &group.payload, target_language, native_language);
                CardFaceResponse {
                    id: card.id,
                    anki_id: card.anki_id,
                    direction: card.direction,
                    front: faces.front,
                    back: faces.back,
                }
            })
            .collect();
        let audio_card_id = group.has_audio.then(|| directions.first().map(|d| d.id)).flatten();

        Self {
            group_id: group.id,
            deck_id: group.deck_id,
            payload: group.payload,
            directions,
            has_audio: group.has_audio,
            audio_card_id,
            created_at: group.created_at,
            updated_at: group.updated_at,
        }
    }
}

/// A recent entry on the dashboard, with the deck it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecentEntryResponse {
    #[serde(flatten)]
    pub group: CardGroupResponse,
    pub deck_name: String,
    pub target_language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CardGroupDetail {
    #[schema(value_type = String, format = "uuid")]
    pub id: CardGroupId,
    pub payload: Payload,
    pub directions: Vec<Direction>,
    pub audio_voice: Option<String>,
    pub audio_instructions: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&CardGroupDBResponse> for CardGroupDetail {
    fn from(group: &CardGroupDBResponse) -> Self {
        Self {
            id: group.id,
            payload: group.payload.clone(),
            directions: group.directions(),
            audio_voice: group.audio_voice.clone(),
            audio_instructions: group.audio_instructions.clone(),
            created_at: group.created_at,
            updated_at: group.updated_at,
        }
    }
}

/// Everything the editor needs to open an existing group.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CardGroupDetailResponse {
    pub deck: DeckResponse,
    pub group: CardGroupDetail,
    /// Base64 audio, empty when the group has none
    pub audio_preview: String,
    pub audio_preferences: ResolvedAudioPreferences,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CardGroupDeletedResponse {
    pub status: String,
    #[schema(value_type = String, format = "uuid")]
    pub deck_id: DeckId,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CardOptionsResponse {
    /// `random` first, then the fixed voice set
    pub voices: Vec<String>,
    pub default_audio_instructions: String,
}
