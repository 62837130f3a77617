//! Restoring a parsed backup into the database.
//!
//! A backup whose deck collides with one of the owner's decks (same export id, or same name
//! ignoring case) is refused with a conflict listing the available policies, unless the caller
//! already picked one.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{Connection, PgConnection};
use tracing::{info, instrument};
use utoipa::ToSchema;

use crate::cards::ids::card_group_id;
use crate::cards::payload::foreign_phrase;
use crate::db::errors::DbError;
use crate::db::handlers::{CardGroups, Decks, Repository};
use crate::db::models::{
    card_groups::{AudioUpdate, CardGroupUpsertDBRequest, RestoreMode},
    decks::{DeckCreateDBRequest, DeckDBResponse, DeckUpdateDBRequest},
};
use crate::errors::{Error, Result};
use crate::types::{DeckId, UserId, abbrev_uuid};

use super::backup::ParsedBackup;

pub const CONFLICT_CODE: &str = "DECK_IMPORT_CONFLICT";

/// How to treat an existing deck that an import collides with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ImportPolicy {
    /// Replace the deck's metadata and every entry. `overwrite` is accepted as well.
    #[serde(alias = "overwrite")]
    Override,
    /// Keep whichever version of each entry was updated last
    PreferNewest,
    /// Only add entries that do not exist yet
    OnlyNew,
    /// Abort without changing anything
    Cancel,
}

impl ImportPolicy {
    pub const ALL: [ImportPolicy; 4] = [
        ImportPolicy::Override,
        ImportPolicy::PreferNewest,
        ImportPolicy::OnlyNew,
        ImportPolicy::Cancel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportPolicy::Override => "override",
            ImportPolicy::PreferNewest => "prefer_newest",
            ImportPolicy::OnlyNew => "only_new",
            ImportPolicy::Cancel => "cancel",
        }
    }

    /// How entries are restored into a colliding deck. `None` means leave it untouched.
    fn restore_mode(&self) -> Option<RestoreMode> {
        match self {
            ImportPolicy::Override => Some(RestoreMode::Overwrite),
            ImportPolicy::PreferNewest => Some(RestoreMode::PreferNewest),
            ImportPolicy::OnlyNew => Some(RestoreMode::OnlyNew),
            ImportPolicy::Cancel => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ImportPolicy::Override => "Override existing deck",
            ImportPolicy::PreferNewest => "Accept newest per entry",
            ImportPolicy::OnlyNew => "Import new entries only",
            ImportPolicy::Cancel => "Cancel import",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            ImportPolicy::Override => "Replace the entire deck with the imported backup.",
            ImportPolicy::PreferNewest => "Keep whichever version of each entry has the latest update.",
            ImportPolicy::OnlyNew => "Only add entries that do not exist yet.",
            ImportPolicy::Cancel => "Leave the existing deck untouched.",
        }
    }
}

impl fmt::Display for ImportPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "overwrite" {
            return Ok(ImportPolicy::Override);
        }
        ImportPolicy::ALL
            .into_iter()
            .find(|policy| policy.as_str() == s)
            .ok_or_else(|| Error::BadRequest {
                message: "Unsupported import policy.".to_string(),
            })
    }
}

/// Result of an import.
#[derive(Debug, Clone)]
pub enum ImportOutcome {
    /// No colliding deck existed; a new one was created
    Created(DeckDBResponse),
    /// A colliding deck was updated under a policy
    Merged { deck: DeckDBResponse, written: usize },
    /// The caller chose to cancel; the existing deck is returned untouched
    Cancelled(DeckDBResponse),
}

impl ImportOutcome {
    pub fn deck(&self) -> &DeckDBResponse {
        match self {
            ImportOutcome::Created(deck) | ImportOutcome::Cancelled(deck) => deck,
            ImportOutcome::Merged { deck, .. } => deck,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            ImportOutcome::Created(_) => "created",
            ImportOutcome::Merged { .. } => "merged",
            ImportOutcome::Cancelled(_) => "cancelled",
        }
    }
}

fn timestamp(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(|ts| ts.to_rfc3339())
}

/// Conflict details returned with the 409 so the client can ask which policy to apply.
pub fn conflict_details(existing: &DeckDBResponse, backup: &ParsedBackup) -> serde_json::Value {
    json!({
        "code": CONFLICT_CODE,
        "message": "A deck with the same name or Anki ID already exists. Choose how to handle the import.",
        "existingDeck": {
            "id": existing.id,
            "name": existing.name,
            "updated_at": timestamp(Some(existing.updated_at)),
            "anki_id": existing.anki_id,
        },
        "incomingDeck": {
            "name": backup.deck.name,
            "anki_id": backup.deck.anki_id,
            "updated_at": timestamp(backup.deck.updated_at),
            "entry_count": backup.entry_count(),
            "card_count": backup.card_count(),
        },
        "options": ImportPolicy::ALL.iter().map(|policy| json!({
            "policy": policy.as_str(),
            "label": policy.label(),
            "description": policy.description(),
        })).collect::<Vec<_>>(),
    })
}

/// Write every backup entry into `deck_id`. Returns how many groups were written.
async fn restore_groups(
    conn: &mut PgConnection,
    owner_id: UserId,
    deck_id: DeckId,
    backup: &ParsedBackup,
    mode: RestoreMode,
) -> Result<usize> {
    let mut groups = CardGroups::new(conn);
    let mut written = 0;
    for group in &backup.groups {
        let request = CardGroupUpsertDBRequest {
            id: card_group_id(deck_id, foreign_phrase(&group.payload)),
            deck_id,
            owner_id,
            payload: group.payload.clone(),
            directions: group.directions(),
            audio: group.audio.clone().map_or(AudioUpdate::Clear, AudioUpdate::Replace),
            created_at: group.created_at,
            updated_at: group.updated_at,
        };
        if groups.restore(&request, mode, &group.cards).await? {
            written += 1;
        }
    }
    Ok(written)
}

/// Import a parsed backup for `owner_id`.
///
/// Runs in one transaction: a failing entry leaves the database as it was.
#[instrument(skip(conn, backup), fields(owner_id = %abbrev_uuid(&owner_id), deck = %backup.deck.name), err)]
pub async fn import_backup(
    conn: &mut PgConnection,
    owner_id: UserId,
    backup: &ParsedBackup,
    policy: Option<ImportPolicy>,
) -> Result<ImportOutcome> {
    let mut tx = conn.begin().await.map_err(DbError::from)?;

    let existing = Decks::new(&mut tx)
        .find_import_conflict(owner_id, &backup.deck.name, backup.deck.anki_id)
        .await?;

    let outcome = match (existing, policy) {
        (None, _) => {
            let request = DeckCreateDBRequest::builder()
                .owner_id(owner_id)
                .name(backup.deck.name.clone())
                .target_language(backup.deck.target_language.clone())
                .field_schema(backup.deck.field_schema.clone())
                .prompt_templates(backup.deck.prompt_templates.clone())
                .maybe_anki_id(backup.deck.anki_id)
                .maybe_created_at(backup.deck.created_at)
                .maybe_updated_at(backup.deck.updated_at)
                .build();
            let deck = Decks::new(&mut tx).create(&request).await?;
            let written = restore_groups(&mut tx, owner_id, deck.id, backup, RestoreMode::Overwrite).await?;
            info!(deck_id = %abbrev_uuid(&deck.id), written, "Imported backup as a new deck");
            ImportOutcome::Created(deck)
        }
        (Some(existing), None) => {
            return Err(Error::Conflict {
                message: "A deck with the same name or Anki ID already exists.".to_string(),
                details: Some(conflict_details(&existing, backup)),
            });
        }
        (Some(existing), Some(policy)) => {
            let Some(mode) = policy.restore_mode() else {
                info!(deck_id = %abbrev_uuid(&existing.id), "Import cancelled");
                tx.commit().await.map_err(DbError::from)?;
                return Ok(ImportOutcome::Cancelled(existing));
            };
            if policy == ImportPolicy::Override {
                CardGroups::new(&mut tx).delete_for_deck(existing.id).await?;
            }
            let written = restore_groups(&mut tx, owner_id, existing.id, backup, mode).await?;

            let mut decks = Decks::new(&mut tx);
            let deck = if policy == ImportPolicy::OnlyNew {
                decks.touch(existing.id).await?;
                decks.get_by_id(existing.id).await?.unwrap_or(existing)
            } else {
                let update = DeckUpdateDBRequest {
                    name: Some(backup.deck.name.clone()),
                    target_language: Some(backup.deck.target_language.clone()),
                    field_schema: Some(backup.deck.field_schema.clone()),
                    prompt_templates: Some(backup.deck.prompt_templates.clone()),
                };
                decks.update(existing.id, &update).await?
            };
            info!(deck_id = %abbrev_uuid(&deck.id), %policy, written, "Imported backup into existing deck");
            ImportOutcome::Merged { deck, written }
        }
    };

    tx.commit().await.map_err(DbError::from)?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::backup::{BackupDeck, BackupGroup};
    use crate::cards::fields::default_field_schema;
    use crate::cards::payload::Payload;
    use crate::cards::templates::PromptTemplates;
    use crate::db::handlers::Users;
    use crate::db::handlers::card_groups::RestoredCard;
    use crate::db::models::card_groups::AudioAsset;
    use crate::types::Direction;
    use bytes::Bytes;
    use chrono::{Duration, SubsecRound};
    use sqlx::PgPool;
    use uuid::Uuid;

    fn entry(phrase: &str, native: &str, updated_at: DateTime<Utc>) -> BackupGroup {
        BackupGroup {
            payload: Payload::from([
                ("foreign_phrase".to_string(), phrase.to_string()),
                ("native_phrase".to_string(), native.to_string()),
            ]),
            cards: Direction::ALL
                .into_iter()
                .map(|direction| RestoredCard {
                    direction,
                    anki_id: Some(Uuid::new_v4()),
                    created_at: Some(updated_at),
                    updated_at: Some(updated_at),
                })
                .collect(),
            audio: Some(AudioAsset {
                bytes: Bytes::from_static(b"\x00\x01audio"),
                filename: format!("{phrase}.mp3"),
                voice: Some("alloy".to_string()),
                instructions: None,
            }),
            created_at: Some(updated_at),
            updated_at: Some(updated_at),
        }
    }

    fn backup(name: &str, anki_id: Option<Uuid>, groups: Vec<BackupGroup>) -> ParsedBackup {
        ParsedBackup {
            version: 2,
            deck: BackupDeck {
                anki_id,
                name: name.to_string(),
                target_language: "Danish".to_string(),
                field_schema: default_field_schema(),
                prompt_templates: PromptTemplates::default(),
                created_at: None,
                updated_at: None,
            },
            groups,
        }
    }

    async fn owner(pool: &PgPool) -> UserId {
        let mut conn = pool.acquire().await.unwrap();
        Users::new(&mut conn).resolve_by_email("importer@example.com", false).await.unwrap().id
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("prefer_newest".parse::<ImportPolicy>().unwrap(), ImportPolicy::PreferNewest);
        assert_eq!("cancel".parse::<ImportPolicy>().unwrap(), ImportPolicy::Cancel);
        assert_eq!("override".parse::<ImportPolicy>().unwrap(), ImportPolicy::Override);
        assert_eq!(" overwrite ".parse::<ImportPolicy>().unwrap(), ImportPolicy::Override);
        assert_eq!(
            serde_json::from_str::<ImportPolicy>("\"overwrite\"").unwrap(),
            ImportPolicy::Override
        );
        let err = "merge".parse::<ImportPolicy>().unwrap_err();
        assert_eq!(err.user_message(), "Unsupported import policy.");
    }

    #[test]
    fn test_each_policy_maps_to_its_own_restore_mode() {
        assert_eq!(ImportPolicy::Override.restore_mode(), Some(RestoreMode::Overwrite));
        assert_eq!(ImportPolicy::PreferNewest.restore_mode(), Some(RestoreMode::PreferNewest));
        assert_eq!(ImportPolicy::OnlyNew.restore_mode(), Some(RestoreMode::OnlyNew));
        assert_eq!(ImportPolicy::Cancel.restore_mode(), None);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_import_creates_deck_and_preserves_audio(pool: PgPool) {
        let owner_id = owner(&pool).await;
        let anki_id = Uuid::new_v4();
        let stamp = (Utc::now() - Duration::days(2)).trunc_subsecs(0);
        let parsed = backup("Danish", Some(anki_id), vec![entry("hus", "house", stamp)]);

        let mut conn = pool.acquire().await.unwrap();
        let outcome = import_backup(&mut conn, owner_id, &parsed, None).await.unwrap();
        let deck = match outcome {
            ImportOutcome::Created(deck) => deck,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(deck.anki_id, anki_id);

        let mut groups = CardGroups::new(&mut conn);
        let stored = groups.list_all_for_deck(deck.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, card_group_id(deck.id, "hus"));
        assert_eq!(stored[0].updated_at, stamp);
        assert_eq!(stored[0].cards[0].anki_id, parsed.groups[0].cards[0].anki_id.unwrap());
        let audio = groups.audio(stored[0].id).await.unwrap().unwrap();
        assert_eq!(audio.audio, b"\x00\x01audio");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_collision_requires_policy(pool: PgPool) {
        let owner_id = owner(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        import_backup(&mut conn, owner_id, &backup("Danish", None, vec![]), None)
            .await
            .unwrap();

        // Same name in a different case collides even without an export id
        let err = import_backup(&mut conn, owner_id, &backup("DANISH", None, vec![]), None)
            .await
            .unwrap_err();
        match err {
            Error::Conflict { details: Some(details), .. } => {
                assert_eq!(details["code"], CONFLICT_CODE);
                let policies: Vec<&str> = details["options"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|o| o["policy"].as_str().unwrap())
                    .collect();
                assert_eq!(policies, vec!["override", "prefer_newest", "only_new", "cancel"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let outcome = import_backup(&mut conn, owner_id, &backup("DANISH", None, vec![]), Some(ImportPolicy::Cancel))
            .await
            .unwrap();
        assert_eq!(outcome.status(), "cancelled");
        assert_eq!(outcome.deck().name, "Danish");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_override_replaces_entries(pool: PgPool) {
        let owner_id = owner(&pool).await;
        let anki_id = Uuid::new_v4();
        let old = (Utc::now() - Duration::days(5)).trunc_subsecs(0);
        let mut conn = pool.acquire().await.unwrap();

        let first = backup("Danish", Some(anki_id), vec![entry("hus", "house", old), entry("bil", "car", old)]);
        let deck = import_backup(&mut conn, owner_id, &first, None).await.unwrap().deck().clone();

        let second = backup("Danish v2", Some(anki_id), vec![entry("kat", "cat", old)]);
        let outcome = import_backup(&mut conn, owner_id, &second, Some(ImportPolicy::Override))
            .await
            .unwrap();
        assert_eq!(outcome.deck().id, deck.id);
        assert_eq!(outcome.deck().name, "Danish v2");

        let stored = CardGroups::new(&mut conn).list_all_for_deck(deck.id).await.unwrap();
        let phrases: Vec<&str> = stored.iter().map(|g| g.payload["foreign_phrase"].as_str()).collect();
        assert_eq!(phrases, vec!["kat"]);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_prefer_newest_and_only_new(pool: PgPool) {
        let owner_id = owner(&pool).await;
        let anki_id = Uuid::new_v4();
        let mut conn = pool.acquire().await.unwrap();
        let middle = (Utc::now() - Duration::days(2)).trunc_subsecs(0);

        let original = backup("Danish", Some(anki_id), vec![entry("hus", "house", middle), entry("bil", "car", middle)]);
        let deck = import_backup(&mut conn, owner_id, &original, None).await.unwrap().deck().clone();

        let incoming = backup(
            "Danish",
            Some(anki_id),
            vec![
                entry("hus", "home", middle + Duration::days(1)),
                entry("bil", "automobile", middle - Duration::days(1)),
                entry("kat", "cat", middle),
            ],
        );

        let outcome = import_backup(&mut conn, owner_id, &incoming, Some(ImportPolicy::OnlyNew))
            .await
            .unwrap();
        assert!(matches!(outcome, ImportOutcome::Merged { written: 1, .. }));

        let outcome = import_backup(&mut conn, owner_id, &incoming, Some(ImportPolicy::PreferNewest))
            .await
            .unwrap();
        assert!(matches!(outcome, ImportOutcome::Merged { written: 1, .. }));

        let mut groups = CardGroups::new(&mut conn);
        let hus = groups.get(card_group_id(deck.id, "hus")).await.unwrap().unwrap();
        let bil = groups.get(card_group_id(deck.id, "bil")).await.unwrap().unwrap();
        assert_eq!(hus.payload["native_phrase"], "home");
        assert_eq!(bil.payload["native_phrase"], "car");
    }
}
