//! Database models for card groups and their direction rows.

use crate::cards::payload::Payload;
use crate::types::{CardGroupId, CardId, DeckId, Direction, UserId};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

/// Audio attached to a group and the settings that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioAsset {
    pub bytes: Bytes,
    pub filename: String,
    /// Voice name, `uploaded`, or the source URL for fetched clips
    pub voice: Option<String>,
    pub instructions: Option<String>,
}

/// What to do with a group's audio on save.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AudioUpdate {
    #[default]
    Keep,
    Clear,
    Replace(AudioAsset),
}

/// Create or replace the group identified by `id`.
///
/// Timestamps are only set when restoring a backup.
#[derive(Debug, Clone)]
pub struct CardGroupUpsertDBRequest {
    pub id: CardGroupId,
    pub deck_id: DeckId,
    pub owner_id: UserId,
    pub payload: Payload,
    pub directions: Vec<Direction>,
    pub audio: AudioUpdate,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct CardGroupRow {
    pub id: CardGroupId,
    pub deck_id: DeckId,
    pub owner_id: UserId,
    pub payload: Json<Payload>,
    pub audio_filename: Option<String>,
    pub audio_voice: Option<String>,
    pub audio_instructions: Option<String>,
    pub has_audio: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One direction membership row
#[derive(Debug, Clone, FromRow)]
pub struct CardRow {
    pub id: CardId,
    pub group_id: CardGroupId,
    pub direction: String,
    pub anki_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A direction that exists for a group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardDBResponse {
    pub id: CardId,
    pub direction: Direction,
    pub anki_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A card group without its audio bytes.
#[derive(Debug, Clone)]
pub struct CardGroupDBResponse {
    pub id: CardGroupId,
    pub deck_id: DeckId,
    pub owner_id: UserId,
    pub payload: Payload,
    pub audio_filename: Option<String>,
    pub audio_voice: Option<String>,
    pub audio_instructions: Option<String>,
    pub has_audio: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Ordered forward then backward
    pub cards: Vec<CardDBResponse>,
}

impl CardGroupDBResponse {
    pub fn directions(&self) -> Vec<Direction> {
        self.cards.iter().map(|c| c.direction).collect()
    }
}

/// Audio bytes with their export filename
#[derive(Debug, Clone, FromRow)]
pub struct AudioBlob {
    pub group_id: CardGroupId,
    pub audio: Vec<u8>,
    pub audio_filename: Option<String>,
}

/// How a restored group treats an existing group with the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreMode {
    Overwrite,
    /// Write only when the incoming group was updated later
    PreferNewest,
    /// Never touch existing groups
    OnlyNew,
}
