//! Flashcard package export in the CrowdAnki directory layout.
//!
//! The package is a zip holding `deck.json` and a `media/` folder. Every active direction of a
//! card group becomes one note of the "Structured Two-Sided" model with rendered Front and
//! Back fields.

use std::collections::{BTreeSet, HashMap};
use std::io::{Cursor, Write};

use anyhow::Context;
use serde_json::{Value, json};
use tracing::{debug, instrument};
use uuid::Uuid;
use zip::{ZipWriter, write::SimpleFileOptions};

use crate::cards::templates::render_card;
use crate::db::models::{
    card_groups::{AudioBlob, CardGroupDBResponse},
    decks::DeckDBResponse,
};
use crate::types::{CardGroupId, Direction, abbrev_uuid};

pub const MODEL_NAME: &str = "Structured Two-Sided";
pub const FRONT_TEMPLATE: &str = "{{Front}}";
pub const BACK_TEMPLATE: &str = "{{Front}}<hr id='answer'>{{Back}}";
pub const DECK_FILENAME: &str = "deck.json";
pub const MEDIA_DIR: &str = "media";

const MODEL_CSS: &str = ".card { font-family: arial; font-size: 20px; text-align: center; color: black; background-color: white; }";

/// One exported note before packaging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportNote {
    pub guid: String,
    pub front: String,
    pub back: String,
}

/// Deck name shown in the flashcard app: "<name> (<target language>)".
pub fn package_deck_name(deck: &DeckDBResponse) -> String {
    format!("{} ({})", deck.name, deck.target_language)
}

/// Download file name for a deck: lower-cased, spaces as underscores, header-unsafe characters dropped.
pub fn download_filename(deck_name: &str, extension: &str) -> String {
    let slug: String = deck_name
        .trim()
        .to_lowercase()
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('_'),
            c if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' => Some(c),
            _ => None,
        })
        .collect();
    let slug = if slug.is_empty() { "deck".to_string() } else { slug };
    format!("{slug}.{extension}")
}

fn media_name(group_id: CardGroupId, blob: &AudioBlob) -> String {
    blob.audio_filename
        .clone()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| format!("{}.mp3", group_id.simple()))
}

/// Render every card of the deck into notes, attaching the sound tag where it belongs.
///
/// Forward cards play audio on the front, backward cards on the back.
pub fn build_notes(
    deck: &DeckDBResponse,
    groups: &[CardGroupDBResponse],
    audio: &HashMap<CardGroupId, AudioBlob>,
    native_language: Option<&str>,
) -> Vec<ExportNote> {
    let templates = &deck.prompt_templates.0;
    let mut notes = Vec::new();
    for group in groups {
        let sound = audio
            .get(&group.id)
            .map(|blob| format!("<br>[sound:{}]", media_name(group.id, blob)));
        for card in &group.cards {
            let faces = render_card(
                templates,
                card.direction,
                &group.payload,
                &deck.target_language,
                native_language,
            );
            let (front_tag, back_tag) = match (&sound, card.direction) {
                (Some(tag), Direction::Forward) => (tag.as_str(), ""),
                (Some(tag), Direction::Backward) => ("", tag.as_str()),
                (None, _) => ("", ""),
            };
            notes.push(ExportNote {
                guid: card.id.simple().to_string(),
                front: format!("{}{front_tag}", faces.front),
                back: format!("{}{back_tag}", faces.back),
            });
        }
    }
    notes
}

fn deck_json(deck: &DeckDBResponse, notes: &[ExportNote], media_files: &[String]) -> Value {
    let model_uuid = Uuid::new_v5(&deck.anki_id, b"note-model");
    let config_uuid = Uuid::new_v5(&deck.anki_id, b"deck-config");

    json!({
        "__type__": "Deck",
        "children": [],
        "crowdanki_uuid": deck.anki_id,
        "deck_config_uuid": config_uuid,
        "deck_configurations": [{
            "__type__": "DeckConfig",
            "crowdanki_uuid": config_uuid,
            "name": "Default",
            "autoplay": true,
            "replayq": true,
            "maxTaken": 60,
            "timer": 0,
            "dyn": false,
            "new": { "perDay": 20, "delays": [1.0, 10.0], "ints": [1, 4, 0], "initialFactor": 2500, "order": 1, "bury": false },
            "rev": { "perDay": 200, "ease4": 1.3, "ivlFct": 1.0, "maxIvl": 36500, "bury": false, "hardFactor": 1.2 },
            "lapse": { "delays": [10.0], "leechAction": 1, "leechFails": 8, "minInt": 1, "mult": 0.0 }
        }],
        "desc": "",
        "dyn": 0,
        "extendNew": 0,
        "extendRev": 0,
        "media_files": media_files,
        "name": package_deck_name(deck),
        "note_models": [{
            "__type__": "NoteModel",
            "crowdanki_uuid": model_uuid,
            "css": MODEL_CSS,
            "flds": [
                { "name": "Front", "ord": 0, "font": "Arial", "size": 20, "rtl": false, "sticky": false, "media": [] },
                { "name": "Back", "ord": 1, "font": "Arial", "size": 20, "rtl": false, "sticky": false, "media": [] }
            ],
            "latexPre": "\\documentclass[12pt]{article}\n\\special{papersize=3in,5in}\n\\usepackage[utf8]{inputenc}\n\\usepackage{amssymb,amsmath}\n\\pagestyle{empty}\n\\setlength{\\parindent}{0in}\n\\begin{document}\n",
            "latexPost": "\\end{document}",
            "name": MODEL_NAME,
            "req": [[0, "any", [0]]],
            "sortf": 0,
            "tags": [],
            "tmpls": [{
                "name": "Card",
                "ord": 0,
                "qfmt": FRONT_TEMPLATE,
                "afmt": BACK_TEMPLATE,
                "bqfmt": "",
                "bafmt": "",
                "did": null
            }],
            "type": 0,
            "vers": []
        }],
        "notes": notes.iter().map(|note| json!({
            "__type__": "Note",
            "data": "",
            "fields": [note.front, note.back],
            "flags": 0,
            "guid": note.guid,
            "note_model_uuid": model_uuid,
            "tags": []
        })).collect::<Vec<_>>()
    })
}

/// Build the downloadable package for a deck.
///
/// Callers reject decks without cards before getting here.
#[instrument(skip_all, fields(deck_id = %abbrev_uuid(&deck.id), groups = groups.len()), err)]
pub fn build_package(
    deck: &DeckDBResponse,
    groups: &[CardGroupDBResponse],
    audio: &HashMap<CardGroupId, AudioBlob>,
    native_language: Option<&str>,
) -> anyhow::Result<Vec<u8>> {
    let notes = build_notes(deck, groups, audio, native_language);

    // Groups only reference audio they own, but filenames may repeat after imports
    let mut media: Vec<(String, &AudioBlob)> = Vec::new();
    let mut seen = BTreeSet::new();
    for group in groups {
        if let Some(blob) = audio.get(&group.id) {
            let name = media_name(group.id, blob);
            if seen.insert(name.clone()) {
                media.push((name, blob));
            }
        }
    }
    let media_files: Vec<String> = media.iter().map(|(name, _)| name.clone()).collect();

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let document = serde_json::to_vec_pretty(&deck_json(deck, &notes, &media_files))?;
    zip.start_file(DECK_FILENAME, options).context("Failed to add deck.json")?;
    zip.write_all(&document)?;

    for (name, blob) in &media {
        zip.start_file(format!("{MEDIA_DIR}/{name}"), options)
            .with_context(|| format!("Failed to add media file {name}"))?;
        zip.write_all(&blob.audio)?;
    }

    let bytes = zip.finish().context("Failed to finalize package")?.into_inner();
    debug!(notes = notes.len(), media = media.len(), size = bytes.len(), "Built deck package");
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::fields::default_field_schema;
    use crate::cards::ids::{card_group_id, card_id};
    use crate::cards::templates::PromptTemplates;
    use crate::db::models::card_groups::CardDBResponse;
    use chrono::Utc;
    use sqlx::types::Json;
    use std::io::Read;
    use zip::ZipArchive;

    fn deck() -> DeckDBResponse {
        DeckDBResponse {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            name: "Kitchen Words".to_string(),
            target_language: "Danish".to_string(),
            field_schema: Json(default_field_schema()),
            prompt_templates: Json(PromptTemplates::default()),
            anki_id: Uuid::new_v4(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn group(deck: &DeckDBResponse, phrase: &str, directions: &[Direction]) -> CardGroupDBResponse {
        let id = card_group_id(deck.id, phrase);
        CardGroupDBResponse {
            id,
            deck_id: deck.id,
            owner_id: deck.owner_id,
            payload: [
                ("foreign_phrase".to_string(), phrase.to_string()),
                ("native_phrase".to_string(), "house".to_string()),
            ]
            .into(),
            audio_filename: Some("hus.mp3".to_string()),
            audio_voice: None,
            audio_instructions: None,
            has_audio: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            cards: directions
                .iter()
                .map(|d| CardDBResponse {
                    id: card_id(id, *d),
                    direction: *d,
                    anki_id: card_id(id, *d),
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                })
                .collect(),
        }
    }

    fn blob(group: &CardGroupDBResponse) -> AudioBlob {
        AudioBlob {
            group_id: group.id,
            audio: b"ID3-audio".to_vec(),
            audio_filename: group.audio_filename.clone(),
        }
    }

    #[test]
    fn test_download_filename() {
        assert_eq!(download_filename("Kitchen Words", "apkg"), "kitchen_words.apkg");
        assert_eq!(download_filename("My \"Deck\"/1", "awdeck"), "my_deck1.awdeck");
        assert_eq!(download_filename("  ", "apkg"), "deck.apkg");
    }

    #[test]
    fn test_sound_tag_placement() {
        let deck = deck();
        let group = group(&deck, "hus", &Direction::ALL);
        let audio = HashMap::from([(group.id, blob(&group))]);

        let notes = build_notes(&deck, std::slice::from_ref(&group), &audio, Some("English"));
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].front, "hus<br>[sound:hus.mp3]");
        assert!(!notes[0].back.contains("[sound:"));
        assert_eq!(notes[1].front, "house");
        assert!(notes[1].back.ends_with("<br>[sound:hus.mp3]"));
        assert_eq!(notes[0].guid, group.cards[0].id.simple().to_string());
        assert_eq!(notes[0].guid.len(), 32);
    }

    #[test]
    fn test_notes_follow_active_directions() {
        let deck = deck();
        let group = group(&deck, "hus", &[Direction::Backward]);
        let notes = build_notes(&deck, &[group], &HashMap::new(), None);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].front, "house");
    }

    #[test]
    fn test_package_layout() {
        let deck = deck();
        let group = group(&deck, "hus", &Direction::ALL);
        let audio = HashMap::from([(group.id, blob(&group))]);

        let bytes = build_package(&deck, &[group], &audio, Some("English")).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();

        let mut document = String::new();
        archive.by_name(DECK_FILENAME).unwrap().read_to_string(&mut document).unwrap();
        let document: Value = serde_json::from_str(&document).unwrap();
        assert_eq!(document["name"], "Kitchen Words (Danish)");
        assert_eq!(document["note_models"][0]["name"], MODEL_NAME);
        assert_eq!(document["note_models"][0]["tmpls"][0]["afmt"], BACK_TEMPLATE);
        assert_eq!(document["notes"].as_array().unwrap().len(), 2);
        assert_eq!(document["media_files"][0], "hus.mp3");

        let mut media = Vec::new();
        archive.by_name("media/hus.mp3").unwrap().read_to_end(&mut media).unwrap();
        assert_eq!(media, b"ID3-audio");
    }
}
