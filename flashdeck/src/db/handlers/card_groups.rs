//! Database repository for card groups and their direction rows.
//!
//! A group holds the payload and audio; each active direction is one row in `cards`. Card ids
//! are derived from the group id and direction, so toggling a direction off and on again
//! recreates the same row id.

use crate::cards::ids::card_id;
use crate::db::{
    errors::Result,
    models::card_groups::{
        AudioBlob, AudioUpdate, CardDBResponse, CardGroupDBResponse, CardGroupRow, CardGroupUpsertDBRequest, CardRow,
        RestoreMode,
    },
};
use crate::types::{CardGroupId, CardId, DeckId, Direction, UserId, abbrev_uuid};
use sqlx::types::Json;
use sqlx::{Connection, PgConnection};
use std::collections::HashMap;
use tracing::{instrument, warn};
use uuid::Uuid;

const GROUP_COLUMNS: &str = "id, deck_id, owner_id, payload, audio_filename, audio_voice, audio_instructions, \
                             audio IS NOT NULL AS has_audio, created_at, updated_at";

/// Direction rows supplied by a backup: export id and timestamps to keep.
#[derive(Debug, Clone)]
pub struct RestoredCard {
    pub direction: Direction,
    pub anki_id: Option<Uuid>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

pub struct CardGroups<'c> {
    db: &'c mut PgConnection,
}

/// Escape LIKE wildcards so a search term matches literally.
fn like_pattern(term: &str) -> String {
    let escaped = term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{escaped}%")
}

async fn cards_for(conn: &mut PgConnection, group_ids: &[CardGroupId]) -> Result<HashMap<CardGroupId, Vec<CardDBResponse>>> {
    let rows = sqlx::query_as::<_, CardRow>(
        "SELECT id, group_id, direction, anki_id, created_at, updated_at FROM cards WHERE group_id = ANY($1)",
    )
    .bind(group_ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut grouped: HashMap<CardGroupId, Vec<CardDBResponse>> = HashMap::new();
    for row in rows {
        let Ok(direction) = row.direction.parse::<Direction>() else {
            warn!(card_id = %abbrev_uuid(&row.id), direction = %row.direction, "Skipping card with unknown direction");
            continue;
        };
        grouped.entry(row.group_id).or_default().push(CardDBResponse {
            id: row.id,
            direction,
            anki_id: row.anki_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        });
    }
    for cards in grouped.values_mut() {
        cards.sort_by_key(|c| c.direction);
    }
    Ok(grouped)
}

fn assemble(rows: Vec<CardGroupRow>, mut cards: HashMap<CardGroupId, Vec<CardDBResponse>>) -> Vec<CardGroupDBResponse> {
    rows.into_iter()
        .map(|row| CardGroupDBResponse {
            cards: cards.remove(&row.id).unwrap_or_default(),
            id: row.id,
            deck_id: row.deck_id,
            owner_id: row.owner_id,
            payload: row.payload.0,
            audio_filename: row.audio_filename,
            audio_voice: row.audio_voice,
            audio_instructions: row.audio_instructions,
            has_audio: row.has_audio,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
        .collect()
}

/// Make the group's direction rows match `directions` exactly.
async fn sync_directions(
    conn: &mut PgConnection,
    group_id: CardGroupId,
    directions: &[Direction],
    restored: &[RestoredCard],
) -> Result<()> {
    let keep: Vec<&str> = directions.iter().map(|d| d.as_str()).collect();
    sqlx::query("DELETE FROM cards WHERE group_id = $1 AND NOT (direction = ANY($2))")
        .bind(group_id)
        .bind(&keep)
        .execute(&mut *conn)
        .await?;

    for direction in directions {
        let id = card_id(group_id, *direction);
        let restored = restored.iter().find(|r| r.direction == *direction);
        sqlx::query(
            "INSERT INTO cards (id, group_id, direction, anki_id, created_at, updated_at)
             VALUES ($1, $2, $3, $4, COALESCE($5, NOW()), COALESCE($6, NOW()))
             ON CONFLICT (id) DO UPDATE SET updated_at = EXCLUDED.updated_at",
        )
        .bind(id)
        .bind(group_id)
        .bind(direction.as_str())
        .bind(restored.and_then(|r| r.anki_id).unwrap_or(id))
        .bind(restored.and_then(|r| r.created_at))
        .bind(restored.and_then(|r| r.updated_at))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

impl<'c> CardGroups<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Write a group and its directions. Re-saving an existing group replaces its payload.
    ///
    /// Returns `None` when `mode` left an existing group untouched.
    async fn write(
        &mut self,
        request: &CardGroupUpsertDBRequest,
        mode: RestoreMode,
        restored: &[RestoredCard],
    ) -> Result<Option<CardGroupId>> {
        let (replace_audio, audio) = match &request.audio {
            AudioUpdate::Keep => (false, None),
            AudioUpdate::Clear => (true, None),
            AudioUpdate::Replace(asset) => (true, Some(asset)),
        };
        let on_conflict = match mode {
            RestoreMode::Overwrite | RestoreMode::PreferNewest => "DO UPDATE SET",
            RestoreMode::OnlyNew => "DO NOTHING",
        };
        let assignments = if mode == RestoreMode::OnlyNew {
            String::new()
        } else {
            let condition = if mode == RestoreMode::PreferNewest {
                "WHERE EXCLUDED.updated_at > card_groups.updated_at"
            } else {
                ""
            };
            format!(
                "payload = EXCLUDED.payload,
                 audio = CASE WHEN $11 THEN EXCLUDED.audio ELSE card_groups.audio END,
                 audio_filename = CASE WHEN $11 THEN EXCLUDED.audio_filename ELSE card_groups.audio_filename END,
                 audio_voice = CASE WHEN $11 THEN EXCLUDED.audio_voice ELSE card_groups.audio_voice END,
                 audio_instructions = CASE WHEN $11 THEN EXCLUDED.audio_instructions ELSE card_groups.audio_instructions END,
                 updated_at = EXCLUDED.updated_at
                 {condition}"
            )
        };

        let mut tx = self.db.begin().await?;
        let written = sqlx::query_scalar::<_, CardGroupId>(&format!(
            "INSERT INTO card_groups
                (id, deck_id, owner_id, payload, audio, audio_filename, audio_voice, audio_instructions, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, COALESCE($9, NOW()), COALESCE($10, NOW()))
             ON CONFLICT (id) {on_conflict} {assignments}
             RETURNING id"
        ))
        .bind(request.id)
        .bind(request.deck_id)
        .bind(request.owner_id)
        .bind(Json(&request.payload))
        .bind(audio.map(|a| a.bytes.as_ref()))
        .bind(audio.map(|a| a.filename.as_str()))
        .bind(audio.and_then(|a| a.voice.as_deref()))
        .bind(audio.and_then(|a| a.instructions.as_deref()))
        .bind(request.created_at)
        .bind(request.updated_at)
        .bind(replace_audio)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(group_id) = written {
            sync_directions(&mut *tx, group_id, &request.directions, restored).await?;
        }
        tx.commit().await?;
        Ok(written)
    }

    /// Create or update a group from the card editor.
    #[instrument(skip(self, request), fields(group_id = %abbrev_uuid(&request.id)), err)]
    pub async fn upsert(&mut self, request: &CardGroupUpsertDBRequest) -> Result<CardGroupDBResponse> {
        self.write(request, RestoreMode::Overwrite, &[]).await?;
        self.get(request.id).await?.ok_or(crate::db::errors::DbError::NotFound)
    }

    /// Write a group read from a backup. Returns whether anything was written.
    #[instrument(skip(self, request, cards), fields(group_id = %abbrev_uuid(&request.id)), err)]
    pub async fn restore(
        &mut self,
        request: &CardGroupUpsertDBRequest,
        mode: RestoreMode,
        cards: &[RestoredCard],
    ) -> Result<bool> {
        Ok(self.write(request, mode, cards).await?.is_some())
    }

    #[instrument(skip(self), fields(group_id = %abbrev_uuid(&id)), err)]
    pub async fn get(&mut self, id: CardGroupId) -> Result<Option<CardGroupDBResponse>> {
        let row = sqlx::query_as::<_, CardGroupRow>(&format!("SELECT {GROUP_COLUMNS} FROM card_groups WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let cards = cards_for(&mut *self.db, &[id]).await?;
        Ok(assemble(vec![row], cards).pop())
    }

    /// One page of a deck's groups, most recently updated first, plus the total match count.
    ///
    /// `search` is a case-insensitive substring match over payload values.
    #[instrument(skip(self), fields(deck_id = %abbrev_uuid(&deck_id)), err)]
    pub async fn list_by_deck(
        &mut self,
        deck_id: DeckId,
        search: Option<&str>,
        skip: i64,
        limit: i64,
    ) -> Result<(Vec<CardGroupDBResponse>, i64)> {
        let pattern = search.map(str::trim).filter(|s| !s.is_empty()).map(like_pattern);
        let filter = "deck_id = $1 AND ($2::text IS NULL OR EXISTS (
                          SELECT 1 FROM jsonb_each_text(payload) kv WHERE kv.value ILIKE $2
                      ))";

        let total = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM card_groups WHERE {filter}"))
            .bind(deck_id)
            .bind(pattern.as_deref())
            .fetch_one(&mut *self.db)
            .await?;

        let rows = sqlx::query_as::<_, CardGroupRow>(&format!(
            "SELECT {GROUP_COLUMNS} FROM card_groups WHERE {filter}
             ORDER BY updated_at DESC, id
             LIMIT $3 OFFSET $4"
        ))
        .bind(deck_id)
        .bind(pattern.as_deref())
        .bind(limit)
        .bind(skip)
        .fetch_all(&mut *self.db)
        .await?;

        let ids: Vec<CardGroupId> = rows.iter().map(|r| r.id).collect();
        let cards = cards_for(&mut *self.db, &ids).await?;
        Ok((assemble(rows, cards), total))
    }

    /// Every group of a deck, oldest first, for export and backup.
    #[instrument(skip(self), fields(deck_id = %abbrev_uuid(&deck_id)), err)]
    pub async fn list_all_for_deck(&mut self, deck_id: DeckId) -> Result<Vec<CardGroupDBResponse>> {
        let rows = sqlx::query_as::<_, CardGroupRow>(&format!(
            "SELECT {GROUP_COLUMNS} FROM card_groups WHERE deck_id = $1 ORDER BY created_at ASC, id"
        ))
        .bind(deck_id)
        .fetch_all(&mut *self.db)
        .await?;
        let ids: Vec<CardGroupId> = rows.iter().map(|r| r.id).collect();
        let cards = cards_for(&mut *self.db, &ids).await?;
        Ok(assemble(rows, cards))
    }

    /// The owner's most recently updated groups across all decks.
    #[instrument(skip(self), fields(owner_id = %abbrev_uuid(&owner_id)), err)]
    pub async fn recent_for_owner(&mut self, owner_id: UserId, limit: i64) -> Result<Vec<CardGroupDBResponse>> {
        let rows = sqlx::query_as::<_, CardGroupRow>(&format!(
            "SELECT {GROUP_COLUMNS} FROM card_groups WHERE owner_id = $1 ORDER BY updated_at DESC, id LIMIT $2"
        ))
        .bind(owner_id)
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;
        let ids: Vec<CardGroupId> = rows.iter().map(|r| r.id).collect();
        let cards = cards_for(&mut *self.db, &ids).await?;
        Ok(assemble(rows, cards))
    }

    /// Audio bytes of every group in a deck that has audio.
    #[instrument(skip(self), fields(deck_id = %abbrev_uuid(&deck_id)), err)]
    pub async fn audio_for_deck(&mut self, deck_id: DeckId) -> Result<HashMap<CardGroupId, AudioBlob>> {
        let blobs = sqlx::query_as::<_, AudioBlob>(
            "SELECT id AS group_id, audio, audio_filename FROM card_groups WHERE deck_id = $1 AND audio IS NOT NULL",
        )
        .bind(deck_id)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(blobs.into_iter().map(|b| (b.group_id, b)).collect())
    }

    #[instrument(skip(self), fields(group_id = %abbrev_uuid(&group_id)), err)]
    pub async fn audio(&mut self, group_id: CardGroupId) -> Result<Option<AudioBlob>> {
        Ok(sqlx::query_as::<_, AudioBlob>(
            "SELECT id AS group_id, audio, audio_filename FROM card_groups WHERE id = $1 AND audio IS NOT NULL",
        )
        .bind(group_id)
        .fetch_optional(&mut *self.db)
        .await?)
    }

    /// Resolve a card id to its group.
    #[instrument(skip(self), fields(card_id = %abbrev_uuid(&card_id)), err)]
    pub async fn group_of_card(&mut self, card_id: CardId) -> Result<Option<CardGroupId>> {
        Ok(sqlx::query_scalar::<_, CardGroupId>("SELECT group_id FROM cards WHERE id = $1")
            .bind(card_id)
            .fetch_optional(&mut *self.db)
            .await?)
    }

    #[instrument(skip(self), fields(group_id = %abbrev_uuid(&id)), err)]
    pub async fn delete(&mut self, id: CardGroupId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM card_groups WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove every group of a deck, keeping the deck itself.
    #[instrument(skip(self), fields(deck_id = %abbrev_uuid(&deck_id)), err)]
    pub async fn delete_for_deck(&mut self, deck_id: DeckId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM card_groups WHERE deck_id = $1")
            .bind(deck_id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::fields::default_field_schema;
    use crate::cards::ids::card_group_id;
    use crate::cards::payload::Payload;
    use crate::db::handlers::{Decks, Repository, Users};
    use crate::db::models::card_groups::AudioAsset;
    use crate::db::models::decks::DeckCreateDBRequest;
    use bytes::Bytes;
    use chrono::{Duration, Utc};
    use sqlx::PgPool;

    async fn deck(conn: &mut PgConnection) -> (UserId, DeckId) {
        let user = Users::new(&mut *conn).resolve_by_email("cards@example.com", false).await.unwrap();
        let deck = Decks::new(&mut *conn)
            .create(
                &DeckCreateDBRequest::builder()
                    .owner_id(user.id)
                    .name("Danish")
                    .target_language("Danish")
                    .field_schema(default_field_schema())
                    .build(),
            )
            .await
            .unwrap();
        (user.id, deck.id)
    }

    fn payload(foreign: &str, native: &str) -> Payload {
        Payload::from([
            ("foreign_phrase".to_string(), foreign.to_string()),
            ("native_phrase".to_string(), native.to_string()),
        ])
    }

    fn request(owner_id: UserId, deck_id: DeckId, foreign: &str, directions: &[Direction]) -> CardGroupUpsertDBRequest {
        CardGroupUpsertDBRequest {
            id: card_group_id(deck_id, foreign),
            deck_id,
            owner_id,
            payload: payload(foreign, "house"),
            directions: directions.to_vec(),
            audio: AudioUpdate::Keep,
            created_at: None,
            updated_at: None,
        }
    }

    fn audio(bytes: &'static [u8]) -> AudioUpdate {
        AudioUpdate::Replace(AudioAsset {
            bytes: Bytes::from_static(bytes),
            filename: "clip.mp3".to_string(),
            voice: Some("nova".to_string()),
            instructions: Some("Speak Danish.".to_string()),
        })
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_upsert_is_idempotent_per_phrase(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let (owner_id, deck_id) = deck(&mut conn).await;
        let mut groups = CardGroups::new(&mut conn);

        let first = groups.upsert(&request(owner_id, deck_id, "hus", &Direction::ALL)).await.unwrap();
        let mut again = request(owner_id, deck_id, "hus", &Direction::ALL);
        again.payload.insert("native_phrase".to_string(), "home".to_string());
        let second = groups.upsert(&again).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.payload["native_phrase"], "home");
        assert_eq!(second.directions(), vec![Direction::Forward, Direction::Backward]);
        let (listed, total) = groups.list_by_deck(deck_id, None, 0, 10).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(listed.len(), 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_direction_toggle_restores_same_card_id(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let (owner_id, deck_id) = deck(&mut conn).await;
        let mut groups = CardGroups::new(&mut conn);

        let both = groups.upsert(&request(owner_id, deck_id, "hus", &Direction::ALL)).await.unwrap();
        let backward_id = both.cards[1].id;

        let forward_only = groups
            .upsert(&request(owner_id, deck_id, "hus", &[Direction::Forward]))
            .await
            .unwrap();
        assert_eq!(forward_only.directions(), vec![Direction::Forward]);

        let restored = groups.upsert(&request(owner_id, deck_id, "hus", &Direction::ALL)).await.unwrap();
        assert_eq!(restored.cards[1].id, backward_id);
        assert_eq!(restored.cards[1].direction, Direction::Backward);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_audio_keep_replace_clear(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let (owner_id, deck_id) = deck(&mut conn).await;
        let mut groups = CardGroups::new(&mut conn);

        let mut with_audio = request(owner_id, deck_id, "hus", &Direction::ALL);
        with_audio.audio = audio(b"ID3-one");
        let saved = groups.upsert(&with_audio).await.unwrap();
        assert!(saved.has_audio);
        assert_eq!(saved.audio_voice.as_deref(), Some("nova"));

        // Keep leaves the stored clip alone
        groups.upsert(&request(owner_id, deck_id, "hus", &Direction::ALL)).await.unwrap();
        let blob = groups.audio(saved.id).await.unwrap().unwrap();
        assert_eq!(blob.audio, b"ID3-one");

        let mut cleared = request(owner_id, deck_id, "hus", &Direction::ALL);
        cleared.audio = AudioUpdate::Clear;
        let cleared = groups.upsert(&cleared).await.unwrap();
        assert!(!cleared.has_audio);
        assert!(groups.audio(saved.id).await.unwrap().is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_search_matches_values_not_keys(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let (owner_id, deck_id) = deck(&mut conn).await;
        let mut groups = CardGroups::new(&mut conn);
        groups.upsert(&request(owner_id, deck_id, "hus", &Direction::ALL)).await.unwrap();
        groups.upsert(&request(owner_id, deck_id, "bil", &Direction::ALL)).await.unwrap();

        let (found, total) = groups.list_by_deck(deck_id, Some("HU"), 0, 10).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(found[0].payload["foreign_phrase"], "hus");

        let (none, total) = groups.list_by_deck(deck_id, Some("foreign"), 0, 10).await.unwrap();
        assert_eq!(total, 0);
        assert!(none.is_empty());

        let (literal, _) = groups.list_by_deck(deck_id, Some("%"), 0, 10).await.unwrap();
        assert!(literal.is_empty());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_pagination_orders_by_update(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let (owner_id, deck_id) = deck(&mut conn).await;
        let mut groups = CardGroups::new(&mut conn);
        for phrase in ["en", "to", "tre"] {
            groups.upsert(&request(owner_id, deck_id, phrase, &Direction::ALL)).await.unwrap();
        }

        let (page, total) = groups.list_by_deck(deck_id, None, 0, 2).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].payload["foreign_phrase"], "tre");

        let (rest, _) = groups.list_by_deck(deck_id, None, 2, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].payload["foreign_phrase"], "en");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_restore_modes(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let (owner_id, deck_id) = deck(&mut conn).await;
        let mut groups = CardGroups::new(&mut conn);
        let current = groups.upsert(&request(owner_id, deck_id, "hus", &Direction::ALL)).await.unwrap();

        let mut older = request(owner_id, deck_id, "hus", &Direction::ALL);
        older.payload.insert("native_phrase".to_string(), "old".to_string());
        older.updated_at = Some(current.updated_at - Duration::days(1));

        assert!(!groups.restore(&older, RestoreMode::OnlyNew, &[]).await.unwrap());
        assert!(!groups.restore(&older, RestoreMode::PreferNewest, &[]).await.unwrap());
        assert_eq!(groups.get(current.id).await.unwrap().unwrap().payload["native_phrase"], "house");

        let mut newer = older.clone();
        newer.payload.insert("native_phrase".to_string(), "new".to_string());
        newer.updated_at = Some(Utc::now() + Duration::days(1));
        assert!(groups.restore(&newer, RestoreMode::PreferNewest, &[]).await.unwrap());
        assert_eq!(groups.get(current.id).await.unwrap().unwrap().payload["native_phrase"], "new");

        assert!(groups.restore(&older, RestoreMode::Overwrite, &[]).await.unwrap());
        let overwritten = groups.get(current.id).await.unwrap().unwrap();
        assert_eq!(overwritten.payload["native_phrase"], "old");
        assert_eq!(overwritten.updated_at, older.updated_at.unwrap());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_card_lookup_and_delete(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let (owner_id, deck_id) = deck(&mut conn).await;
        let mut groups = CardGroups::new(&mut conn);
        let saved = groups.upsert(&request(owner_id, deck_id, "hus", &Direction::ALL)).await.unwrap();

        assert_eq!(groups.group_of_card(saved.cards[0].id).await.unwrap(), Some(saved.id));
        assert_eq!(groups.recent_for_owner(owner_id, 4).await.unwrap().len(), 1);

        assert!(groups.delete(saved.id).await.unwrap());
        assert_eq!(groups.group_of_card(saved.cards[0].id).await.unwrap(), None);
        assert!(!groups.delete(saved.id).await.unwrap());
    }
}
