//! Card editor actions, card group access and audio playback.
//!
//! Every editor button posts to `POST /cards/actions`. Only `save` writes to the database; the
//! other actions return a new payload and audio preview for the editor to show.

use std::collections::HashSet;

use axum::{
    Json,
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};
use sqlx::PgConnection;
use tracing::{debug, instrument, warn};

use crate::{
    AppState,
    api::{
        handlers::decks::owned_deck,
        models::{
            cards::{
                CardAction, CardActionRequest, CardActionResponse, CardGroupDeletedResponse, CardGroupDetail,
                CardGroupDetailResponse, CardOptionsResponse, InputMode,
            },
            users::CurrentUser,
        },
    },
    auth::permissions::ensure_owner,
    cards::{
        fields::{DICTIONARY_ENTRY, EXAMPLE_SENTENCE, FieldDefinition, NATIVE_PHRASE, hydrate_field_schema},
        ids::{audio_filename, card_group_id},
        payload::{Payload, foreign_phrase, normalize_directions, normalize_payload, validate_payload},
        templates::DEFAULT_AUDIO_INSTRUCTIONS_TEMPLATE,
    },
    db::{
        handlers::{CardGroups, Decks},
        models::card_groups::{AudioAsset, AudioUpdate, CardGroupDBResponse, CardGroupUpsertDBRequest},
    },
    errors::{Error, Result},
    generation::{
        FieldStatus, GenerationSettings, OpenAiClient,
        audio::{
            RANDOM_VOICE, ResolvedAudioPreferences, VOICES, decode_preview, encode_preview, fetch_remote_audio,
        },
        keys::{require_api_key, resolve_api_key},
        pipeline::{generate_all, regenerate_field, reverse_translate, synthesize_audio},
    },
    types::{CardGroupId, CardId, DeckId, Direction, Operation, Resource, abbrev_uuid},
};

const AUDIO_DISABLED_MESSAGE: &str = "Audio is disabled for this deck.";

/// Load a card group the caller owns. When `deck_id` is given the group must belong to it.
#[instrument(skip(conn, user), fields(group_id = %abbrev_uuid(&group_id)), err)]
async fn owned_group(
    conn: &mut PgConnection,
    user: &CurrentUser,
    group_id: CardGroupId,
    deck_id: Option<DeckId>,
    operation: Operation,
) -> Result<CardGroupDBResponse> {
    let not_found = || Error::NotFound {
        resource: "Card group".to_string(),
        id: group_id.to_string(),
    };
    let group = CardGroups::new(conn).get(group_id).await?.ok_or_else(not_found)?;
    if deck_id.is_some_and(|deck_id| deck_id != group.deck_id) {
        return Err(not_found());
    }
    ensure_owner(user, Resource::Cards, operation, group.owner_id)?;
    Ok(group)
}

fn provider_client(state: &AppState, api_key: String) -> OpenAiClient {
    OpenAiClient::new(state.http.clone(), &state.config.provider, api_key)
}

fn regenerated_message(schema: &[FieldDefinition], key: &str) -> String {
    match key {
        NATIVE_PHRASE => "Translation updated.".to_string(),
        DICTIONARY_ENTRY => "Dictionary entry updated.".to_string(),
        EXAMPLE_SENTENCE => "Example sentence updated.".to_string(),
        other => {
            let label = schema
                .iter()
                .find(|field| field.key == other)
                .map(|field| field.label.as_str())
                .unwrap_or(other);
            format!("{label} updated.")
        }
    }
}

/// Synthesize the foreign phrase, reporting a failure as a status instead of an error.
async fn try_synthesize(
    client: &OpenAiClient,
    payload: &Payload,
    preferences: &ResolvedAudioPreferences,
) -> (Option<AudioAsset>, FieldStatus) {
    match synthesize_audio(client, foreign_phrase(payload), &preferences.voice, &preferences.instructions).await {
        Ok(synthesized) => (
            Some(AudioAsset {
                bytes: synthesized.audio,
                filename: audio_filename(),
                voice: Some(synthesized.voice),
                instructions: Some(synthesized.instructions),
            }),
            FieldStatus::Generated,
        ),
        Err(e) => {
            warn!(error = %e, "Audio synthesis failed");
            (None, FieldStatus::Failed { error: e.to_string() })
        }
    }
}

#[utoipa::path(
    get,
    path = "/cards/options",
    tag = "cards",
    summary = "Card editor options",
    description = "Voices available for audio (`random` first) and the default speaking instructions",
    responses(
        (status = 200, description = "Card editor options", body = CardOptionsResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("ProxyHeader" = []))
)]
pub async fn card_options(_current_user: CurrentUser) -> Json<CardOptionsResponse> {
    Json(CardOptionsResponse {
        voices: std::iter::once(RANDOM_VOICE)
            .chain(VOICES)
            .map(str::to_string)
            .collect(),
        default_audio_instructions: DEFAULT_AUDIO_INSTRUCTIONS_TEMPLATE.to_string(),
    })
}

#[utoipa::path(
    post,
    path = "/cards/actions",
    tag = "cards",
    summary = "Run a card editor action",
    description = "`save` stores the group (generating empty fields when a key is available). \
                   `populate_all`, `regen_<field>`, `regen_audio` and `fetch_audio` return a preview without saving.",
    request_body = CardActionRequest,
    responses(
        (status = 200, description = "Action result", body = CardActionResponse),
        (status = 400, description = "Invalid action, payload or missing API key"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Deck belongs to another user"),
        (status = 404, description = "Deck or card group not found"),
        (status = 428, description = "Onboarding not completed"),
        (status = 502, description = "The generation provider failed"),
    ),
    security(("ProxyHeader" = []))
)]
#[instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id), deck_id = %abbrev_uuid(&request.deck_id), action = %request.action), err)]
pub async fn card_action(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<CardActionRequest>,
) -> Result<Json<CardActionResponse>> {
    let action = request.action()?;
    let native_language = current_user.onboarded_language()?.to_string();

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let deck = owned_deck(&mut conn, &current_user, request.deck_id, Operation::UpdateOwn).await?;
    let existing = match request.group_id {
        Some(group_id) => Some(owned_group(&mut conn, &current_user, group_id, Some(deck.id), Operation::UpdateOwn).await?),
        None => None,
    };

    let schema = hydrate_field_schema(deck.field_schema.0.clone());
    let templates = &deck.prompt_templates.0;
    let audio_enabled = templates.audio.enabled;
    let mut payload = normalize_payload(&schema, &request.payload);
    let fallback_directions = existing
        .as_ref()
        .map(CardGroupDBResponse::directions)
        .unwrap_or_else(|| Direction::ALL.to_vec());
    let directions = normalize_directions(&request.directions, &fallback_directions);

    let requested_preview = decode_preview(request.audio_preview.as_deref())?;
    let stored_audio = match &existing {
        Some(group) if group.has_audio => CardGroups::new(&mut conn).audio(group.id).await?,
        _ => None,
    };
    let preferences = request
        .audio_preferences
        .clone()
        .unwrap_or_default()
        .resolve(&templates.audio_instructions(&deck.target_language));

    let prompts = templates.generation_prompts();
    let locked: HashSet<String> = request
        .locked_fields
        .iter()
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .collect();
    let settings = GenerationSettings {
        schema: &schema,
        prompts: &prompts,
        target_language: &deck.target_language,
        native_language: &native_language,
        locked: &locked,
    };

    // Previews fall back to the stored clip so the editor keeps playing it.
    let current_preview = requested_preview
        .clone()
        .or_else(|| stored_audio.as_ref().map(|blob| bytes::Bytes::from(blob.audio.clone())));
    let preview_response = |preview: Option<&[u8]>| preview.map(encode_preview);

    if action != CardAction::FetchAudio
        && request.input_mode == InputMode::Native
        && foreign_phrase(&payload).is_empty()
    {
        let client = provider_client(&state, require_api_key(&mut conn, &state.config, current_user.id).await?);
        payload = reverse_translate(&client, &settings, payload).await?;
    }

    match action {
        CardAction::RegenField(key) => {
            let client = provider_client(&state, require_api_key(&mut conn, &state.config, current_user.id).await?);
            let outcome = regenerate_field(&client, &settings, payload, &key).await?;
            Ok(Json(CardActionResponse {
                status: "ok".to_string(),
                message: Some(regenerated_message(&schema, &key)),
                payload: Some(outcome.payload),
                directions: Some(directions),
                audio_preview: preview_response(current_preview.as_deref()),
                field_status: Some(outcome.field_status),
                ..Default::default()
            }))
        }
        CardAction::RegenAudio => {
            if !audio_enabled {
                return Err(Error::BadRequest {
                    message: AUDIO_DISABLED_MESSAGE.to_string(),
                });
            }
            if foreign_phrase(&payload).is_empty() {
                return Err(Error::BadRequest {
                    message: "Enter a foreign phrase first.".to_string(),
                });
            }
            let client = provider_client(&state, require_api_key(&mut conn, &state.config, current_user.id).await?);
            let synthesized = synthesize_audio(
                &client,
                foreign_phrase(&payload),
                &preferences.voice,
                &preferences.instructions,
            )
            .await
            .map_err(|e| Error::Upstream {
                provider: "OpenAI".to_string(),
                message: e.to_string(),
            })?;
            Ok(Json(CardActionResponse {
                status: "ok".to_string(),
                message: Some("Audio regenerated.".to_string()),
                payload: Some(payload),
                directions: Some(directions),
                audio_preview: Some(encode_preview(&synthesized.audio)),
                audio_status: Some(FieldStatus::Generated),
                ..Default::default()
            }))
        }
        CardAction::PopulateAll => {
            let client = provider_client(&state, require_api_key(&mut conn, &state.config, current_user.id).await?);
            let outcome = generate_all(&client, &settings, payload).await?;
            let (audio_preview, audio_status) = if !audio_enabled {
                (
                    current_preview,
                    FieldStatus::Skipped {
                        reason: AUDIO_DISABLED_MESSAGE.to_string(),
                    },
                )
            } else if current_preview.is_some() {
                (current_preview, FieldStatus::Kept)
            } else {
                let (asset, status) = try_synthesize(&client, &outcome.payload, &preferences).await;
                (asset.map(|asset| asset.bytes), status)
            };
            Ok(Json(CardActionResponse {
                status: "ok".to_string(),
                message: Some("All fields populated. Review and save when ready.".to_string()),
                payload: Some(outcome.payload),
                directions: Some(directions),
                audio_preview: preview_response(audio_preview.as_deref()),
                field_status: Some(outcome.field_status),
                audio_status: Some(audio_status),
                ..Default::default()
            }))
        }
        CardAction::Save => {
            if directions.is_empty() {
                return Err(Error::BadRequest {
                    message: "Select at least one direction.".to_string(),
                });
            }
            if foreign_phrase(&payload).is_empty() {
                return Err(Error::BadRequest {
                    message: "Enter a foreign phrase first.".to_string(),
                });
            }

            let client = resolve_api_key(&mut conn, &state.config, current_user.id)
                .await?
                .map(|key| provider_client(&state, key));
            let (payload, field_status) = match &client {
                Some(client) => {
                    let outcome = generate_all(client, &settings, payload).await?;
                    (outcome.payload, Some(outcome.field_status))
                }
                None => (payload, None),
            };
            validate_payload(&schema, &payload)?;

            let (audio, audio_status) = match requested_preview {
                Some(bytes) if stored_audio.as_ref().is_some_and(|blob| blob.audio == bytes.as_ref()) => {
                    (AudioUpdate::Keep, FieldStatus::Kept)
                }
                Some(bytes) => {
                    let voice = request
                        .audio_url
                        .as_deref()
                        .map(str::trim)
                        .filter(|url| !url.is_empty())
                        .map(str::to_string)
                        .unwrap_or_else(|| preferences.voice.clone());
                    (
                        AudioUpdate::Replace(AudioAsset {
                            bytes,
                            filename: audio_filename(),
                            voice: Some(voice),
                            instructions: Some(preferences.instructions.clone()),
                        }),
                        FieldStatus::Kept,
                    )
                }
                None if stored_audio.is_some() => (AudioUpdate::Keep, FieldStatus::Kept),
                None if !audio_enabled => (
                    AudioUpdate::Keep,
                    FieldStatus::Skipped {
                        reason: AUDIO_DISABLED_MESSAGE.to_string(),
                    },
                ),
                None => match &client {
                    Some(client) => match try_synthesize(client, &payload, &preferences).await {
                        (Some(asset), status) => (AudioUpdate::Replace(asset), status),
                        (None, status) => (AudioUpdate::Keep, status),
                    },
                    None => (
                        AudioUpdate::Keep,
                        FieldStatus::Skipped {
                            reason: "No API key available.".to_string(),
                        },
                    ),
                },
            };

            let group_id = existing
                .as_ref()
                .map(|group| group.id)
                .unwrap_or_else(|| card_group_id(deck.id, foreign_phrase(&payload)));
            let saved = CardGroups::new(&mut conn)
                .upsert(&CardGroupUpsertDBRequest {
                    id: group_id,
                    deck_id: deck.id,
                    owner_id: current_user.id,
                    payload,
                    directions,
                    audio,
                    created_at: None,
                    updated_at: None,
                })
                .await?;
            Decks::new(&mut conn).touch(deck.id).await?;
            debug!("Saved card group {} with {} cards", abbrev_uuid(&saved.id), saved.cards.len());

            Ok(Json(CardActionResponse {
                status: "saved".to_string(),
                message: Some("Card saved.".to_string()),
                directions: Some(saved.directions()),
                payload: Some(saved.payload),
                field_status,
                audio_status: Some(audio_status),
                deck_id: Some(deck.id),
                card_group_id: Some(saved.id),
                ..Default::default()
            }))
        }
        CardAction::FetchAudio => {
            if !audio_enabled {
                return Err(Error::BadRequest {
                    message: AUDIO_DISABLED_MESSAGE.to_string(),
                });
            }
            let url = request.audio_url.as_deref().unwrap_or_default();
            let audio = fetch_remote_audio(&state.http, url, state.config.limits.max_remote_audio_bytes).await?;
            debug!("Fetched {} bytes of remote audio", audio.len());
            Ok(Json(CardActionResponse {
                status: "ok".to_string(),
                message: Some("Audio fetched from link. Remember to save when ready.".to_string()),
                payload: Some(payload),
                directions: Some(directions),
                audio_preview: Some(encode_preview(&audio)),
                ..Default::default()
            }))
        }
    }
}

#[utoipa::path(
    get,
    path = "/cards/groups/{id}",
    tag = "cards",
    summary = "Get card group",
    description = "A card group for the editor, with its deck, audio preview and audio preferences",
    params(("id" = uuid::Uuid, Path, description = "Card group ID")),
    responses(
        (status = 200, description = "Card group", body = CardGroupDetailResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Card group belongs to another user"),
        (status = 404, description = "Card group not found"),
        (status = 428, description = "Onboarding not completed"),
    ),
    security(("ProxyHeader" = []))
)]
pub async fn get_card_group(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(group_id): Path<CardGroupId>,
) -> Result<Json<CardGroupDetailResponse>> {
    current_user.onboarded_language()?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let group = owned_group(&mut conn, &current_user, group_id, None, Operation::ReadOwn).await?;
    let deck = owned_deck(&mut conn, &current_user, group.deck_id, Operation::ReadOwn).await?;
    let audio = CardGroups::new(&mut conn).audio(group.id).await?;

    let stored_preferences = crate::generation::audio::AudioPreferences {
        voice: group.audio_voice.clone(),
        instructions: group.audio_instructions.clone(),
    };
    let audio_preferences = stored_preferences.resolve(
        &deck
            .prompt_templates
            .0
            .audio_instructions(&deck.target_language),
    );

    Ok(Json(CardGroupDetailResponse {
        group: CardGroupDetail::from(&group),
        deck: deck.into(),
        audio_preview: audio.map(|blob| encode_preview(&blob.audio)).unwrap_or_default(),
        audio_preferences,
    }))
}

#[utoipa::path(
    delete,
    path = "/cards/groups/{id}",
    tag = "cards",
    summary = "Delete card group",
    description = "Delete a card group together with its cards and audio",
    params(("id" = uuid::Uuid, Path, description = "Card group ID")),
    responses(
        (status = 200, description = "Card group deleted", body = CardGroupDeletedResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Card group belongs to another user"),
        (status = 404, description = "Card group not found"),
    ),
    security(("ProxyHeader" = []))
)]
#[instrument(skip(state, current_user), fields(group_id = %abbrev_uuid(&group_id)), err)]
pub async fn delete_card_group(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(group_id): Path<CardGroupId>,
) -> Result<Json<CardGroupDeletedResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let group = owned_group(&mut conn, &current_user, group_id, None, Operation::DeleteOwn).await?;

    CardGroups::new(&mut conn).delete(group.id).await?;
    Decks::new(&mut conn).touch(group.deck_id).await?;

    Ok(Json(CardGroupDeletedResponse {
        status: "deleted".to_string(),
        deck_id: group.deck_id,
    }))
}

#[utoipa::path(
    get,
    path = "/cards/{id}/audio",
    tag = "cards",
    summary = "Card audio",
    description = "The audio clip of a card's group. A card group ID is accepted as well.",
    params(("id" = uuid::Uuid, Path, description = "Card ID or card group ID")),
    responses(
        (status = 200, description = "Audio bytes", content_type = "audio/mpeg"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Card belongs to another user"),
        (status = 404, description = "Card not found or has no audio"),
    ),
    security(("ProxyHeader" = []))
)]
pub async fn card_audio(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<CardId>,
) -> Result<impl IntoResponse> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let group_id = CardGroups::new(&mut conn).group_of_card(id).await?.unwrap_or(id);
    let group = owned_group(&mut conn, &current_user, group_id, None, Operation::ReadOwn).await?;

    let blob = CardGroups::new(&mut conn)
        .audio(group.id)
        .await?
        .ok_or_else(|| Error::NotFound {
            resource: "Audio".to_string(),
            id: id.to_string(),
        })?;

    Ok((
        [
            (header::CONTENT_TYPE, "audio/mpeg"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        blob.audio,
    ))
}
