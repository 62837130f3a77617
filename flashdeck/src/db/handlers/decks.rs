//! Database repository for decks.

use crate::db::{
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::decks::{DeckCreateDBRequest, DeckDBResponse, DeckSummaryDBResponse, DeckUpdateDBRequest},
};
use crate::types::{DeckId, UserId, abbrev_uuid};
use sqlx::PgConnection;
use sqlx::types::Json;
use std::collections::HashMap;
use tracing::instrument;
use uuid::Uuid;

const DECK_COLUMNS: &str =
    "id, owner_id, name, target_language, field_schema, prompt_templates, anki_id, created_at, updated_at";

/// Filter for listing decks
#[derive(Debug, Clone)]
pub struct DeckFilter {
    pub owner_id: UserId,
}

/// Ordering of deck summaries by last modification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recency {
    MostRecentFirst,
    LeastRecentFirst,
}

pub struct Decks<'c> {
    db: &'c mut PgConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for Decks<'c> {
    type CreateRequest = DeckCreateDBRequest;
    type UpdateRequest = DeckUpdateDBRequest;
    type Response = DeckDBResponse;
    type Id = DeckId;
    type Filter = DeckFilter;

    #[instrument(skip(self, request), fields(owner_id = %abbrev_uuid(&request.owner_id), name = %request.name), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        Ok(sqlx::query_as::<_, DeckDBResponse>(&format!(
            "INSERT INTO decks (id, owner_id, name, target_language, field_schema, prompt_templates, anki_id, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, COALESCE($8, NOW()), COALESCE($9, NOW()))
             RETURNING {DECK_COLUMNS}"
        ))
        .bind(request.id.unwrap_or_else(Uuid::new_v4))
        .bind(request.owner_id)
        .bind(request.name.trim())
        .bind(request.target_language.trim())
        .bind(Json(&request.field_schema))
        .bind(Json(&request.prompt_templates))
        .bind(request.anki_id.unwrap_or_else(Uuid::new_v4))
        .bind(request.created_at)
        .bind(request.updated_at)
        .fetch_one(&mut *self.db)
        .await?)
    }

    #[instrument(skip(self), fields(deck_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        Ok(
            sqlx::query_as::<_, DeckDBResponse>(&format!("SELECT {DECK_COLUMNS} FROM decks WHERE id = $1"))
                .bind(id)
                .fetch_optional(&mut *self.db)
                .await?,
        )
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn get_bulk(&mut self, ids: Vec<DeckId>) -> Result<HashMap<Self::Id, DeckDBResponse>> {
        let decks = sqlx::query_as::<_, DeckDBResponse>(&format!("SELECT {DECK_COLUMNS} FROM decks WHERE id = ANY($1)"))
            .bind(&ids)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(decks.into_iter().map(|d| (d.id, d)).collect())
    }

    #[instrument(skip(self, filter), fields(owner_id = %abbrev_uuid(&filter.owner_id)), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        Ok(sqlx::query_as::<_, DeckDBResponse>(&format!(
            "SELECT {DECK_COLUMNS} FROM decks WHERE owner_id = $1 ORDER BY updated_at DESC, id"
        ))
        .bind(filter.owner_id)
        .fetch_all(&mut *self.db)
        .await?)
    }

    /// Card groups, direction rows and audio are removed by `ON DELETE CASCADE` in the same statement.
    #[instrument(skip(self), fields(deck_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM decks WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(deck_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        sqlx::query_as::<_, DeckDBResponse>(&format!(
            "UPDATE decks SET
                name = COALESCE($2, name),
                target_language = COALESCE($3, target_language),
                field_schema = COALESCE($4, field_schema),
                prompt_templates = COALESCE($5, prompt_templates),
                updated_at = NOW()
             WHERE id = $1
             RETURNING {DECK_COLUMNS}"
        ))
        .bind(id)
        .bind(request.name.as_deref().map(str::trim))
        .bind(request.target_language.as_deref().map(str::trim))
        .bind(request.field_schema.as_ref().map(Json))
        .bind(request.prompt_templates.as_ref().map(Json))
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)
    }
}

impl<'c> Decks<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Decks with entry and card counts, ordered by last modification.
    #[instrument(skip(self), fields(owner_id = %abbrev_uuid(&owner_id)), err)]
    pub async fn summaries(
        &mut self,
        owner_id: UserId,
        recency: Recency,
        limit: Option<i64>,
    ) -> Result<Vec<DeckSummaryDBResponse>> {
        let order = match recency {
            Recency::MostRecentFirst => "DESC",
            Recency::LeastRecentFirst => "ASC",
        };
        Ok(sqlx::query_as::<_, DeckSummaryDBResponse>(&format!(
            "SELECT d.id, d.owner_id, d.name, d.target_language, d.field_schema, d.prompt_templates,
                    d.anki_id, d.created_at, d.updated_at,
                    COUNT(DISTINCT g.id) AS entry_count,
                    COUNT(c.id) AS card_count,
                    GREATEST(d.updated_at, COALESCE(MAX(g.updated_at), d.updated_at)) AS last_modified
             FROM decks d
             LEFT JOIN card_groups g ON g.deck_id = d.id
             LEFT JOIN cards c ON c.group_id = g.id
             WHERE d.owner_id = $1
             GROUP BY d.id
             ORDER BY last_modified {order}, d.id
             LIMIT $2"
        ))
        .bind(owner_id)
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?)
    }

    #[instrument(skip(self), fields(deck_id = %abbrev_uuid(&deck_id)), err)]
    pub async fn summary(&mut self, deck_id: DeckId) -> Result<Option<DeckSummaryDBResponse>> {
        Ok(sqlx::query_as::<_, DeckSummaryDBResponse>(
            "SELECT d.id, d.owner_id, d.name, d.target_language, d.field_schema, d.prompt_templates,
                    d.anki_id, d.created_at, d.updated_at,
                    COUNT(DISTINCT g.id) AS entry_count,
                    COUNT(c.id) AS card_count,
                    GREATEST(d.updated_at, COALESCE(MAX(g.updated_at), d.updated_at)) AS last_modified
             FROM decks d
             LEFT JOIN card_groups g ON g.deck_id = d.id
             LEFT JOIN cards c ON c.group_id = g.id
             WHERE d.id = $1
             GROUP BY d.id",
        )
        .bind(deck_id)
        .fetch_optional(&mut *self.db)
        .await?)
    }

    /// An existing deck of `owner_id` that an imported deck would collide with: same export id,
    /// or same name ignoring case.
    #[instrument(skip(self), fields(owner_id = %abbrev_uuid(&owner_id)), err)]
    pub async fn find_import_conflict(
        &mut self,
        owner_id: UserId,
        name: &str,
        anki_id: Option<Uuid>,
    ) -> Result<Option<DeckDBResponse>> {
        Ok(sqlx::query_as::<_, DeckDBResponse>(&format!(
            "SELECT {DECK_COLUMNS} FROM decks
             WHERE owner_id = $1 AND (anki_id = $2 OR LOWER(name) = LOWER($3))
             ORDER BY (anki_id = $2) DESC NULLS LAST, updated_at DESC
             LIMIT 1"
        ))
        .bind(owner_id)
        .bind(anki_id)
        .bind(name.trim())
        .fetch_optional(&mut *self.db)
        .await?)
    }

    /// Bump `updated_at` after an entry changes.
    #[instrument(skip(self), fields(deck_id = %abbrev_uuid(&deck_id)), err)]
    pub async fn touch(&mut self, deck_id: DeckId) -> Result<()> {
        sqlx::query("UPDATE decks SET updated_at = NOW() WHERE id = $1")
            .bind(deck_id)
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }
}
