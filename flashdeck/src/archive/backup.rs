//! Lossless deck backups.
//!
//! A backup is a zip with `manifest.json` and one `media/<group_id>.bin` entry per group with
//! audio. Version 2 manifests list card groups with their directions. Version 1 manifests
//! listed one row per card, each carrying its group's payload, and are still accepted.

use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read, Write};

use anyhow::Context;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};
use uuid::Uuid;
use zip::{ZipArchive, ZipWriter, write::SimpleFileOptions};

use crate::cards::fields::{FieldDefinition, FieldDefinitionInput, normalize_field_schema};
use crate::cards::payload::{Payload, foreign_phrase};
use crate::cards::templates::PromptTemplates;
use crate::db::handlers::card_groups::RestoredCard;
use crate::db::models::{
    card_groups::{AudioAsset, AudioBlob, CardGroupDBResponse},
    decks::DeckDBResponse,
};
use crate::errors::{Error, Result};
use crate::types::{CardGroupId, Direction, abbrev_uuid};

pub const BACKUP_VERSION: u32 = 2;
pub const SUPPORTED_VERSIONS: [u32; 2] = [1, 2];
pub const MANIFEST_FILENAME: &str = "manifest.json";
pub const MEDIA_PREFIX: &str = "media";

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    #[serde(default)]
    version: Option<u32>,
    #[serde(default)]
    generated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    deck: ManifestDeck,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    groups: Vec<ManifestGroup>,
    /// Version 1 only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    cards: Vec<LegacyCard>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ManifestDeck {
    #[serde(default)]
    id: Option<Uuid>,
    #[serde(default)]
    anki_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    target_language: Option<String>,
    #[serde(default)]
    field_schema: Option<Vec<FieldDefinitionInput>>,
    #[serde(default)]
    prompt_templates: Option<PromptTemplates>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestGroup {
    id: Uuid,
    payload: Payload,
    directions: Vec<ManifestCard>,
    #[serde(default)]
    audio_path: Option<String>,
    #[serde(default)]
    audio_filename: Option<String>,
    #[serde(default)]
    audio_voice: Option<String>,
    #[serde(default)]
    audio_instructions: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestCard {
    direction: Direction,
    id: Uuid,
    anki_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// A version 1 row: one card direction with a copy of its group's data.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LegacyCard {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    card_group_id: Option<String>,
    #[serde(default)]
    entry_anki_id: Option<String>,
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    payload: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    audio_filename: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    front_audio_path: Option<String>,
    #[serde(default)]
    back_audio_path: Option<String>,
}

/// Deck metadata read from a backup.
#[derive(Debug, Clone)]
pub struct BackupDeck {
    pub anki_id: Option<Uuid>,
    pub name: String,
    pub target_language: String,
    pub field_schema: Vec<FieldDefinition>,
    pub prompt_templates: PromptTemplates,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// One card group read from a backup. Ids are recomputed for the deck it lands in.
#[derive(Debug, Clone)]
pub struct BackupGroup {
    pub payload: Payload,
    pub cards: Vec<RestoredCard>,
    pub audio: Option<AudioAsset>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl BackupGroup {
    pub fn directions(&self) -> Vec<Direction> {
        self.cards.iter().map(|c| c.direction).collect()
    }
}

#[derive(Debug, Clone)]
pub struct ParsedBackup {
    pub version: u32,
    pub deck: BackupDeck,
    pub groups: Vec<BackupGroup>,
}

impl ParsedBackup {
    pub fn entry_count(&self) -> usize {
        self.groups.len()
    }

    pub fn card_count(&self) -> usize {
        self.groups.iter().map(|g| g.cards.len()).sum()
    }
}

fn media_path(group_id: CardGroupId) -> String {
    format!("{MEDIA_PREFIX}/{group_id}.bin")
}

/// Write a version 2 backup of a deck.
#[instrument(skip_all, fields(deck_id = %abbrev_uuid(&deck.id), groups = groups.len()), err)]
pub fn write_backup(
    deck: &DeckDBResponse,
    groups: &[CardGroupDBResponse],
    audio: &HashMap<CardGroupId, AudioBlob>,
) -> anyhow::Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut entries = Vec::with_capacity(groups.len());
    for group in groups {
        let audio_path = match audio.get(&group.id) {
            Some(blob) => {
                let path = media_path(group.id);
                zip.start_file(path.as_str(), options)
                    .with_context(|| format!("Failed to add {path}"))?;
                zip.write_all(&blob.audio)?;
                Some(path)
            }
            None => None,
        };
        entries.push(ManifestGroup {
            id: group.id,
            payload: group.payload.clone(),
            directions: group
                .cards
                .iter()
                .map(|card| ManifestCard {
                    direction: card.direction,
                    id: card.id,
                    anki_id: card.anki_id,
                    created_at: card.created_at,
                    updated_at: card.updated_at,
                })
                .collect(),
            audio_path,
            audio_filename: group.audio_filename.clone(),
            audio_voice: group.audio_voice.clone(),
            audio_instructions: group.audio_instructions.clone(),
            created_at: group.created_at,
            updated_at: group.updated_at,
        });
    }

    let manifest = Manifest {
        version: Some(BACKUP_VERSION),
        generated_at: Some(Utc::now()),
        deck: ManifestDeck {
            id: Some(deck.id),
            anki_id: Some(deck.anki_id.to_string()),
            name: Some(deck.name.clone()),
            target_language: Some(deck.target_language.clone()),
            field_schema: Some(deck.field_schema.0.iter().cloned().map(Into::into).collect()),
            prompt_templates: Some(deck.prompt_templates.0.clone()),
            created_at: Some(deck.created_at),
            updated_at: Some(deck.updated_at),
        },
        groups: entries,
        cards: Vec::new(),
    };

    zip.start_file(MANIFEST_FILENAME, options)
        .context("Failed to add manifest")?;
    zip.write_all(&serde_json::to_vec_pretty(&manifest)?)?;

    let bytes = zip.finish().context("Failed to finalize backup")?.into_inner();
    debug!(size = bytes.len(), "Built deck backup");
    Ok(bytes)
}

fn invalid() -> Error {
    Error::BadRequest {
        message: "Invalid backup file.".to_string(),
    }
}

/// Read a zip entry, treating a missing entry as absent.
fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, path: &str) -> Result<Option<Vec<u8>>> {
    let mut file = match archive.by_name(path) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => {
            warn!(path, error = %e, "Unreadable backup entry");
            return Err(invalid());
        }
    };
    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer).map_err(|_| invalid())?;
    Ok(Some(buffer))
}

/// Version 1 timestamps are ISO 8601 with an offset, or naive UTC.
fn parse_legacy_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?.trim();
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.to_utc())
        .or_else(|_| value.parse::<chrono::NaiveDateTime>().map(|ts| ts.and_utc()))
        .ok()
}

fn parse_uuid(value: Option<&str>) -> Option<Uuid> {
    value.and_then(|v| Uuid::parse_str(v.trim()).ok())
}

/// Fold version 1 card rows into groups keyed by their group id.
fn legacy_groups(archive: &mut ZipArchive<Cursor<&[u8]>>, cards: Vec<LegacyCard>) -> Result<Vec<BackupGroup>> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, BackupGroup> = HashMap::new();

    for card in cards {
        let Some(direction) = card.direction.as_deref().and_then(|d| d.parse::<Direction>().ok()) else {
            continue;
        };
        let key = card
            .card_group_id
            .clone()
            .or_else(|| card.entry_anki_id.clone())
            .or_else(|| card.id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let payload: Payload = card
            .payload
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(k, v)| match v {
                Value::String(s) => Some((k, s)),
                Value::Null => None,
                other => Some((k, other.to_string())),
            })
            .collect();

        let mut audio = None;
        for path in [&card.front_audio_path, &card.back_audio_path].into_iter().flatten() {
            if let Some(bytes) = read_entry(archive, path)? {
                audio = Some(AudioAsset {
                    bytes: Bytes::from(bytes),
                    filename: card.audio_filename.clone().unwrap_or_else(crate::cards::ids::audio_filename),
                    voice: None,
                    instructions: None,
                });
                break;
            }
        }

        let created_at = parse_legacy_timestamp(card.created_at.as_deref());
        let updated_at = parse_legacy_timestamp(card.updated_at.as_deref());
        let restored = RestoredCard {
            direction,
            anki_id: parse_uuid(card.id.as_deref()),
            created_at,
            updated_at,
        };

        let group = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            BackupGroup {
                payload: Payload::new(),
                cards: Vec::new(),
                audio: None,
                created_at,
                updated_at,
            }
        });
        if group.payload.is_empty() {
            group.payload = payload;
        }
        if group.audio.is_none() {
            group.audio = audio;
        }
        group.updated_at = group.updated_at.max(updated_at);
        group.created_at = match (group.created_at, created_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        if !group.cards.iter().any(|c| c.direction == direction) {
            group.cards.push(restored);
            group.cards.sort_by_key(|c| c.direction);
        }
    }

    Ok(order.into_iter().filter_map(|key| groups.remove(&key)).collect())
}

/// Parse an uploaded backup. Every malformed input maps to a 400 with a readable message.
#[instrument(skip_all, fields(size = bytes.len()), err)]
pub fn read_backup(bytes: &[u8]) -> Result<ParsedBackup> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|_| invalid())?;
    let manifest = read_entry(&mut archive, MANIFEST_FILENAME)?.ok_or_else(invalid)?;
    let manifest: Manifest = serde_json::from_slice(&manifest).map_err(|e| {
        debug!(error = %e, "Backup manifest did not parse");
        invalid()
    })?;

    let version = manifest.version.unwrap_or(1);
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(Error::BadRequest {
            message: "Unsupported backup version.".to_string(),
        });
    }

    let deck = manifest.deck;
    let non_empty = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    let (Some(name), Some(target_language)) = (non_empty(deck.name), non_empty(deck.target_language)) else {
        return Err(Error::BadRequest {
            message: "Backup is missing deck metadata.".to_string(),
        });
    };
    let anki_id = match deck.anki_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(Uuid::parse_str(raw).map_err(|_| Error::BadRequest {
            message: "Invalid Anki deck identifier in backup.".to_string(),
        })?),
        None => None,
    };

    let deck = BackupDeck {
        anki_id,
        name,
        target_language,
        field_schema: normalize_field_schema(deck.field_schema.as_deref())?,
        prompt_templates: deck.prompt_templates.unwrap_or_default(),
        created_at: deck.created_at,
        updated_at: deck.updated_at,
    };

    let groups = if version == 1 {
        legacy_groups(&mut archive, manifest.cards)?
    } else {
        let mut groups = Vec::with_capacity(manifest.groups.len());
        for group in manifest.groups {
            let audio = match group.audio_path.as_deref() {
                Some(path) => read_entry(&mut archive, path)?.map(|bytes| AudioAsset {
                    bytes: Bytes::from(bytes),
                    filename: group
                        .audio_filename
                        .clone()
                        .unwrap_or_else(|| format!("{}.mp3", group.id.simple())),
                    voice: group.audio_voice.clone(),
                    instructions: group.audio_instructions.clone(),
                }),
                None => None,
            };
            let mut cards: Vec<RestoredCard> = group
                .directions
                .into_iter()
                .map(|card| RestoredCard {
                    direction: card.direction,
                    anki_id: Some(card.anki_id),
                    created_at: Some(card.created_at),
                    updated_at: Some(card.updated_at),
                })
                .collect();
            cards.sort_by_key(|c| c.direction);
            cards.dedup_by_key(|c| c.direction);
            groups.push(BackupGroup {
                payload: group.payload,
                cards,
                audio,
                created_at: Some(group.created_at),
                updated_at: Some(group.updated_at),
            });
        }
        groups
    };

    // Groups are keyed by their seed phrase in the target deck
    let groups: Vec<BackupGroup> = groups
        .into_iter()
        .filter(|group| {
            let keep = !foreign_phrase(&group.payload).is_empty() && !group.cards.is_empty();
            if !keep {
                warn!("Skipping backup entry without a foreign phrase or directions");
            }
            keep
        })
        .collect();

    Ok(ParsedBackup { version, deck, groups })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::fields::default_field_schema;
    use crate::cards::ids::{card_group_id, card_id};
    use crate::db::models::card_groups::CardDBResponse;
    use chrono::Duration;
    use serde_json::json;
    use sqlx::types::Json;

    fn deck() -> DeckDBResponse {
        let mut templates = PromptTemplates::default();
        templates.audio.enabled = false;
        DeckDBResponse {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            name: "Danish".to_string(),
            target_language: "Danish".to_string(),
            field_schema: Json(default_field_schema()),
            prompt_templates: Json(templates),
            anki_id: Uuid::new_v4(),
            created_at: Utc::now() - Duration::days(3),
            updated_at: Utc::now(),
        }
    }

    fn group(deck: &DeckDBResponse) -> CardGroupDBResponse {
        let id = card_group_id(deck.id, "hus");
        let stamp = Utc::now() - Duration::hours(5);
        CardGroupDBResponse {
            id,
            deck_id: deck.id,
            owner_id: deck.owner_id,
            payload: [
                ("foreign_phrase".to_string(), "hus".to_string()),
                ("native_phrase".to_string(), "house".to_string()),
                ("stale_key".to_string(), "kept".to_string()),
            ]
            .into(),
            audio_filename: Some("abc.mp3".to_string()),
            audio_voice: Some("nova".to_string()),
            audio_instructions: Some("Slowly.".to_string()),
            has_audio: true,
            created_at: stamp,
            updated_at: stamp,
            cards: vec![CardDBResponse {
                id: card_id(id, Direction::Backward),
                direction: Direction::Backward,
                anki_id: Uuid::new_v4(),
                created_at: stamp,
                updated_at: stamp,
            }],
        }
    }

    fn zip_with_manifest(manifest: Value) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file(MANIFEST_FILENAME, SimpleFileOptions::default()).unwrap();
        zip.write_all(manifest.to_string().as_bytes()).unwrap();
        zip.start_file("media/card-1_back.bin", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"legacy-audio").unwrap();
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn test_backup_round_trip_is_lossless() {
        let deck = deck();
        let group = group(&deck);
        let audio = HashMap::from([(
            group.id,
            AudioBlob {
                group_id: group.id,
                audio: vec![0, 159, 146, 150, 255],
                audio_filename: group.audio_filename.clone(),
            },
        )]);

        let bytes = write_backup(&deck, std::slice::from_ref(&group), &audio).unwrap();
        let parsed = read_backup(&bytes).unwrap();

        assert_eq!(parsed.version, BACKUP_VERSION);
        assert_eq!(parsed.deck.anki_id, Some(deck.anki_id));
        assert_eq!(parsed.deck.field_schema, deck.field_schema.0);
        assert_eq!(parsed.deck.prompt_templates, deck.prompt_templates.0);
        assert_eq!(parsed.deck.updated_at, Some(deck.updated_at));

        let restored = &parsed.groups[0];
        assert_eq!(restored.payload, group.payload);
        assert_eq!(restored.directions(), vec![Direction::Backward]);
        assert_eq!(restored.cards[0].anki_id, Some(group.cards[0].anki_id));
        assert_eq!(restored.updated_at, Some(group.updated_at));
        let restored_audio = restored.audio.as_ref().unwrap();
        assert_eq!(restored_audio.bytes.as_ref(), &[0, 159, 146, 150, 255]);
        assert_eq!(restored_audio.voice.as_deref(), Some("nova"));
        assert_eq!(restored_audio.filename, "abc.mp3");
    }

    #[test]
    fn test_rejects_non_zip_and_missing_manifest() {
        let err = read_backup(b"definitely not a zip").unwrap_err();
        assert_eq!(err.user_message(), "Invalid backup file.");

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file("other.txt", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"hi").unwrap();
        let bytes = zip.finish().unwrap().into_inner();
        assert_eq!(read_backup(&bytes).unwrap_err().user_message(), "Invalid backup file.");
    }

    #[test]
    fn test_rejects_unknown_version_and_missing_metadata() {
        let future = zip_with_manifest(json!({ "version": 9, "deck": { "name": "x", "target_language": "Danish" } }));
        assert_eq!(read_backup(&future).unwrap_err().user_message(), "Unsupported backup version.");

        let nameless = zip_with_manifest(json!({ "version": 2, "deck": { "target_language": "Danish" } }));
        assert_eq!(
            read_backup(&nameless).unwrap_err().user_message(),
            "Backup is missing deck metadata."
        );
    }

    #[test]
    fn test_reads_version_one_card_rows() {
        let bytes = zip_with_manifest(json!({
            "deck": { "name": "Old", "target_language": "Danish", "anki_id": "8a4a5f8e-3c0b-4a43-9a55-2b1b6e3cf3a1" },
            "cards": [
                {
                    "id": "0d5bd0b4-32c8-4d9a-9a08-5c8d6b0f6b11",
                    "card_group_id": "group-1",
                    "direction": "forward",
                    "payload": { "foreign_phrase": "hus", "native_phrase": "house" },
                    "updated_at": "2024-05-01T10:00:00+00:00"
                },
                {
                    "id": "card-1",
                    "card_group_id": "group-1",
                    "direction": "backward",
                    "payload": { "foreign_phrase": "hus", "native_phrase": "house" },
                    "back_audio_path": "media/card-1_back.bin",
                    "updated_at": "2024-05-02T10:00:00"
                },
                { "card_group_id": "group-2", "direction": "sideways", "payload": { "foreign_phrase": "bil" } }
            ]
        }));

        let parsed = read_backup(&bytes).unwrap();
        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.entry_count(), 1);
        assert_eq!(parsed.card_count(), 2);

        let group = &parsed.groups[0];
        assert_eq!(group.payload["native_phrase"], "house");
        assert_eq!(group.directions(), vec![Direction::Forward, Direction::Backward]);
        assert_eq!(group.audio.as_ref().unwrap().bytes.as_ref(), b"legacy-audio");
        assert_eq!(group.updated_at.unwrap().to_rfc3339(), "2024-05-02T10:00:00+00:00");
    }
}
