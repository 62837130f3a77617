//! Deck CRUD, listings, exports, backups and backup import.

use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use bytes::BytesMut;
use sqlx::PgConnection;
use tracing::{debug, instrument};

use crate::{
    AppState,
    api::models::{
        cards::CardGroupResponse,
        decks::{
            CardListQuery, CardListResponse, DeckCreate, DeckDetailResponse, DeckEnvelope, DeckListResponse,
            DeckOptionsResponse, DeckSummaryResponse, DeckUpdate, DefaultCardTemplates, ImportResponse,
        },
        pagination::page_count,
        users::CurrentUser,
    },
    archive::{ImportOutcome, ImportPolicy, build_package, download_filename, import_backup, read_backup, write_backup},
    auth::permissions::ensure_owner,
    cards::{
        fields::{FIELD_LIBRARY, default_field_schema, normalize_field_schema},
        templates::{DEFAULT_AUDIO_INSTRUCTIONS_TEMPLATE, PromptTemplates, default_generation_prompts},
    },
    config::Config,
    db::{
        handlers::{CardGroups, Decks, Repository, decks::Recency},
        models::decks::{DeckCreateDBRequest, DeckDBResponse, DeckUpdateDBRequest},
    },
    errors::{Error, Result},
    types::{DeckId, Operation, Resource, abbrev_uuid},
};

/// Entries shown on the deck detail page.
const DETAIL_PREVIEW_ENTRIES: i64 = 5;

/// Load a deck the caller owns: 404 when it does not exist, 403 when it belongs to someone else.
#[instrument(skip(conn, user), fields(deck_id = %abbrev_uuid(&deck_id)), err)]
pub(crate) async fn owned_deck(
    conn: &mut PgConnection,
    user: &CurrentUser,
    deck_id: DeckId,
    operation: Operation,
) -> Result<DeckDBResponse> {
    let deck = Decks::new(conn).get_by_id(deck_id).await?.ok_or_else(|| Error::NotFound {
        resource: "Deck".to_string(),
        id: deck_id.to_string(),
    })?;
    ensure_owner(user, Resource::Decks, operation, deck.owner_id)?;
    Ok(deck)
}

/// Match a requested target language against the configured options, ignoring case.
fn supported_target_language(config: &Config, requested: &str) -> Result<String> {
    let requested = requested.trim();
    if requested.is_empty() {
        return Err(Error::BadRequest {
            message: "Target language is required.".to_string(),
        });
    }
    config
        .languages
        .target_options
        .iter()
        .find(|option| option.eq_ignore_ascii_case(requested))
        .cloned()
        .ok_or_else(|| Error::BadRequest {
            message: "Unsupported target language.".to_string(),
        })
}

fn required_name(name: &str) -> Result<&str> {
    match name.trim() {
        "" => Err(Error::BadRequest {
            message: "Deck name is required.".to_string(),
        }),
        trimmed => Ok(trimmed),
    }
}

/// `attachment` response carrying an archive.
fn attachment(content_type: &'static str, filename: String, body: Vec<u8>) -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"")),
        ],
        body,
    )
}

#[utoipa::path(
    get,
    path = "/decks/options",
    tag = "decks",
    summary = "Deck editor options",
    description = "Field library, default schema, default templates and prompts, and the target languages decks may use",
    responses(
        (status = 200, description = "Deck editor options", body = DeckOptionsResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("ProxyHeader" = []))
)]
pub async fn deck_options(State(state): State<AppState>, _current_user: CurrentUser) -> Result<Json<DeckOptionsResponse>> {
    let defaults = PromptTemplates::default();
    Ok(Json(DeckOptionsResponse {
        field_library: FIELD_LIBRARY.to_vec(),
        default_field_schema: default_field_schema(),
        audio_instructions_template: DEFAULT_AUDIO_INSTRUCTIONS_TEMPLATE.to_string(),
        default_card_templates: DefaultCardTemplates {
            forward: defaults.forward,
            backward: defaults.backward,
        },
        default_generation_prompts: default_generation_prompts(),
        target_language_options: state.config.languages.target_options.clone(),
    }))
}

#[utoipa::path(
    get,
    path = "/decks",
    tag = "decks",
    summary = "List decks",
    description = "The caller's decks with entry and card counts, most recently modified first",
    responses(
        (status = 200, description = "Decks owned by the caller", body = DeckListResponse),
        (status = 401, description = "Unauthorized"),
        (status = 428, description = "Onboarding not completed"),
    ),
    security(("ProxyHeader" = []))
)]
pub async fn list_decks(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<DeckListResponse>> {
    current_user.onboarded_language()?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let decks = Decks::new(&mut conn)
        .summaries(current_user.id, Recency::MostRecentFirst, None)
        .await?;

    Ok(Json(DeckListResponse {
        decks: decks.into_iter().map(DeckSummaryResponse::from).collect(),
    }))
}

#[utoipa::path(
    post,
    path = "/decks",
    tag = "decks",
    summary = "Create deck",
    description = "Create a deck. The field schema defaults to the library schema and templates to the library defaults.",
    request_body = DeckCreate,
    responses(
        (status = 201, description = "Deck created", body = DeckEnvelope),
        (status = 400, description = "Invalid name, language, schema or template"),
        (status = 401, description = "Unauthorized"),
        (status = 428, description = "Onboarding not completed"),
    ),
    security(("ProxyHeader" = []))
)]
pub async fn create_deck(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(data): Json<DeckCreate>,
) -> Result<(StatusCode, Json<DeckEnvelope>)> {
    current_user.onboarded_language()?;
    let name = required_name(&data.name)?;
    let target_language = supported_target_language(&state.config, &data.target_language)?;
    let field_schema = normalize_field_schema(data.field_schema.as_deref())?;
    let mut prompt_templates = PromptTemplates::default();
    prompt_templates.apply(data.template_overrides())?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let request = DeckCreateDBRequest::builder()
        .owner_id(current_user.id)
        .name(name)
        .target_language(target_language)
        .field_schema(field_schema)
        .prompt_templates(prompt_templates)
        .build();
    let deck = Decks::new(&mut conn).create(&request).await?;

    Ok((StatusCode::CREATED, Json(DeckEnvelope { deck: deck.into() })))
}

#[utoipa::path(
    get,
    path = "/decks/{id}",
    tag = "decks",
    summary = "Get deck",
    description = "A deck with its five most recent entries, effective generation prompts and statistics",
    params(("id" = uuid::Uuid, Path, description = "Deck ID")),
    responses(
        (status = 200, description = "Deck detail", body = DeckDetailResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Deck belongs to another user"),
        (status = 404, description = "Deck not found"),
        (status = 428, description = "Onboarding not completed"),
    ),
    security(("ProxyHeader" = []))
)]
pub async fn get_deck(
    State(state): State<AppState>,
    Path(deck_id): Path<DeckId>,
    current_user: CurrentUser,
) -> Result<Json<DeckDetailResponse>> {
    let native_language = current_user.onboarded_language()?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let deck = owned_deck(&mut conn, &current_user, deck_id, Operation::ReadOwn).await?;
    let summary = Decks::new(&mut conn).summary(deck_id).await?;
    let (groups, _) = CardGroups::new(&mut conn)
        .list_by_deck(deck_id, None, 0, DETAIL_PREVIEW_ENTRIES)
        .await?;

    let templates = deck.prompt_templates.0.clone();
    let cards = groups
        .into_iter()
        .map(|group| CardGroupResponse::render(group, &templates, &deck.target_language, Some(native_language)))
        .collect();
    let (entry_count, card_count, last_modified) = summary
        .map(|s| (s.entry_count, s.card_count, s.last_modified))
        .unwrap_or((0, 0, deck.updated_at));

    Ok(Json(DeckDetailResponse {
        deck: deck.into(),
        cards,
        generation_prompts: templates.generation_prompts(),
        entry_count,
        card_count,
        last_modified,
    }))
}

#[utoipa::path(
    put,
    path = "/decks/{id}",
    tag = "decks",
    summary = "Update deck",
    description = "Partial update. Template overrides are merged over the stored templates.",
    params(("id" = uuid::Uuid, Path, description = "Deck ID")),
    request_body = DeckUpdate,
    responses(
        (status = 200, description = "Deck updated", body = DeckEnvelope),
        (status = 400, description = "Invalid name, language, schema or template"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Deck belongs to another user"),
        (status = 404, description = "Deck not found"),
    ),
    security(("ProxyHeader" = []))
)]
pub async fn update_deck(
    State(state): State<AppState>,
    Path(deck_id): Path<DeckId>,
    current_user: CurrentUser,
    Json(data): Json<DeckUpdate>,
) -> Result<Json<DeckEnvelope>> {
    let name = data.name.as_deref().map(required_name).transpose()?;
    let target_language = data
        .target_language
        .as_deref()
        .map(|language| supported_target_language(&state.config, language))
        .transpose()?;
    let field_schema = data
        .field_schema
        .as_deref()
        .map(|schema| normalize_field_schema(Some(schema)))
        .transpose()?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let deck = owned_deck(&mut conn, &current_user, deck_id, Operation::UpdateOwn).await?;

    let prompt_templates = if data.touches_templates() {
        let mut templates = deck.prompt_templates.0.clone();
        templates.apply(data.template_overrides())?;
        Some(templates)
    } else {
        None
    };

    let request = DeckUpdateDBRequest {
        name: name.map(str::to_string),
        target_language,
        field_schema,
        prompt_templates,
    };
    let updated = Decks::new(&mut conn).update(deck_id, &request).await?;
    Ok(Json(DeckEnvelope { deck: updated.into() }))
}

#[utoipa::path(
    delete,
    path = "/decks/{id}",
    tag = "decks",
    summary = "Delete deck",
    description = "Delete a deck together with its entries, cards and audio",
    params(("id" = uuid::Uuid, Path, description = "Deck ID")),
    responses(
        (status = 204, description = "Deck deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Deck belongs to another user"),
        (status = 404, description = "Deck not found"),
    ),
    security(("ProxyHeader" = []))
)]
pub async fn delete_deck(
    State(state): State<AppState>,
    Path(deck_id): Path<DeckId>,
    current_user: CurrentUser,
) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    owned_deck(&mut conn, &current_user, deck_id, Operation::DeleteOwn).await?;
    Decks::new(&mut conn).delete(deck_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/decks/{id}/cards",
    tag = "decks",
    summary = "List deck entries",
    description = "Paginated entries of a deck, most recently updated first, with rendered faces",
    params(("id" = uuid::Uuid, Path, description = "Deck ID"), CardListQuery),
    responses(
        (status = 200, description = "One page of entries", body = CardListResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Deck belongs to another user"),
        (status = 404, description = "Deck not found"),
        (status = 428, description = "Onboarding not completed"),
    ),
    security(("ProxyHeader" = []))
)]
pub async fn list_deck_cards(
    State(state): State<AppState>,
    Path(deck_id): Path<DeckId>,
    Query(query): Query<CardListQuery>,
    current_user: CurrentUser,
) -> Result<Json<CardListResponse>> {
    let native_language = current_user.onboarded_language()?;
    let (page, limit, skip) = query.pagination().params(&state.config.limits);

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let deck = owned_deck(&mut conn, &current_user, deck_id, Operation::ReadOwn).await?;
    let (groups, total) = CardGroups::new(&mut conn)
        .list_by_deck(deck_id, query.q.as_deref(), skip, limit)
        .await?;

    let templates = &deck.prompt_templates.0;
    Ok(Json(CardListResponse {
        cards: groups
            .into_iter()
            .map(|group| CardGroupResponse::render(group, templates, &deck.target_language, Some(native_language)))
            .collect(),
        total,
        page,
        limit,
        pages: page_count(total, limit),
    }))
}

#[utoipa::path(
    get,
    path = "/decks/{id}/export",
    tag = "decks",
    summary = "Export deck",
    description = "Download the deck as a flashcard package with one note per active card direction",
    params(("id" = uuid::Uuid, Path, description = "Deck ID")),
    responses(
        (status = 200, description = "Package file", content_type = "application/vnd.anki"),
        (status = 400, description = "The deck has no cards"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Deck belongs to another user"),
        (status = 404, description = "Deck not found"),
    ),
    security(("ProxyHeader" = []))
)]
pub async fn export_deck(
    State(state): State<AppState>,
    Path(deck_id): Path<DeckId>,
    current_user: CurrentUser,
) -> Result<impl IntoResponse> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let deck = owned_deck(&mut conn, &current_user, deck_id, Operation::ReadOwn).await?;
    let mut repo = CardGroups::new(&mut conn);
    let groups = repo.list_all_for_deck(deck_id).await?;
    if groups.iter().all(|group| group.cards.is_empty()) {
        return Err(Error::BadRequest {
            message: "No cards to export yet.".to_string(),
        });
    }
    let audio = repo.audio_for_deck(deck_id).await?;
    drop(conn);

    let filename = download_filename(&deck.name, "apkg");
    let native_language = current_user.native_language.clone();
    let package = tokio::task::spawn_blocking(move || build_package(&deck, &groups, &audio, native_language.as_deref()))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("build deck package: {e}"),
        })??;

    debug!(size = package.len(), "Deck package built");
    Ok(attachment("application/vnd.anki", filename, package))
}

#[utoipa::path(
    get,
    path = "/decks/{id}/backup",
    tag = "decks",
    summary = "Back up deck",
    description = "Download a lossless backup of the deck, including audio, for later import",
    params(("id" = uuid::Uuid, Path, description = "Deck ID")),
    responses(
        (status = 200, description = "Backup archive", content_type = "application/zip"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Deck belongs to another user"),
        (status = 404, description = "Deck not found"),
    ),
    security(("ProxyHeader" = []))
)]
pub async fn backup_deck(
    State(state): State<AppState>,
    Path(deck_id): Path<DeckId>,
    current_user: CurrentUser,
) -> Result<impl IntoResponse> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let deck = owned_deck(&mut conn, &current_user, deck_id, Operation::ReadOwn).await?;
    let mut repo = CardGroups::new(&mut conn);
    let groups = repo.list_all_for_deck(deck_id).await?;
    let audio = repo.audio_for_deck(deck_id).await?;
    drop(conn);

    let filename = download_filename(&deck.name, "awdeck");
    let archive = tokio::task::spawn_blocking(move || write_backup(&deck, &groups, &audio))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("write deck backup: {e}"),
        })??;

    Ok(attachment("application/zip", filename, archive))
}

#[utoipa::path(
    post,
    path = "/decks/import",
    tag = "decks",
    summary = "Import deck backup",
    description = "Restore a deck backup. A backup colliding with an existing deck (same export id or name) \
                   is refused with 409 unless a `policy` of override (or overwrite), prefer_newest, only_new or cancel is sent.",
    request_body(
        content_type = "multipart/form-data",
        description = "`file`: the backup archive; `policy`: optional conflict policy"
    ),
    responses(
        (status = 201, description = "A new deck was created", body = ImportResponse),
        (status = 200, description = "An existing deck was merged, or the import was cancelled", body = ImportResponse),
        (status = 400, description = "Invalid or oversized backup, or unknown policy"),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "The backup collides with an existing deck"),
    ),
    security(("ProxyHeader" = []))
)]
pub async fn import_deck(
    State(state): State<AppState>,
    current_user: CurrentUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ImportResponse>)> {
    let max_bytes = state.config.limits.max_import_bytes;
    let mut file: Option<BytesMut> = None;
    let mut policy: Option<ImportPolicy> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(|e| Error::BadRequest {
        message: format!("Failed to parse multipart data: {e}"),
    })? {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "file" => {
                let mut buffer = BytesMut::new();
                while let Some(chunk) = field.chunk().await.map_err(|e| Error::BadRequest {
                    message: format!("Failed to read upload: {e}"),
                })? {
                    // Abort as soon as the upload passes the limit
                    if buffer.len() + chunk.len() > max_bytes {
                        return Err(Error::BadRequest {
                            message: "Backup file is too large.".to_string(),
                        });
                    }
                    buffer.extend_from_slice(&chunk);
                }
                file = Some(buffer);
            }
            "policy" => {
                let value = field.text().await.map_err(|e| Error::BadRequest {
                    message: format!("Failed to read policy: {e}"),
                })?;
                if !value.trim().is_empty() {
                    policy = Some(value.parse()?);
                }
            }
            other => debug!(field = other, "Ignoring unknown multipart field"),
        }
    }

    let file = file.filter(|f| !f.is_empty()).ok_or_else(|| Error::BadRequest {
        message: "Choose a backup file to import.".to_string(),
    })?;
    let backup = tokio::task::spawn_blocking(move || read_backup(&file))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("read deck backup: {e}"),
        })??;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let outcome = import_backup(&mut conn, current_user.id, &backup, policy).await?;
    let status = match outcome {
        ImportOutcome::Created(_) => StatusCode::CREATED,
        ImportOutcome::Merged { .. } | ImportOutcome::Cancelled(_) => StatusCode::OK,
    };
    Ok((status, Json(ImportResponse::from(outcome))))
}
