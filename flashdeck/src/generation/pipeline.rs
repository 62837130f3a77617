//! Field generation for card payloads.
//!
//! The built-in chain runs translation, then dictionary entry, then example sentence. Custom
//! fields are independent and run concurrently with the chain. Only empty, unlocked fields are
//! written; every considered field gets a [`FieldStatus`].

use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, instrument, warn};
use utoipa::ToSchema;

use crate::cards::fields::{DICTIONARY_ENTRY, EXAMPLE_SENTENCE, FOREIGN_PHRASE, FieldDefinition, NATIVE_PHRASE};
use crate::cards::payload::{Payload, field_is_empty, foreign_phrase};
use crate::cards::templates::{
    DICTIONARY_PROMPT, PromptPair, REVERSE_TRANSLATION_PROMPT, SENTENCE_PROMPT, TRANSLATION_PROMPT, fill_prompt,
};
use crate::errors::{Error, Result};

use super::audio::pick_voice;
use super::provider::{ChatPrompt, SpeechRequest, SpeechSynthesizer, TextGenerator};

/// Outcome for a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FieldStatus {
    Generated,
    Kept,
    Skipped { reason: String },
    Failed { error: String },
}

impl FieldStatus {
    fn skipped(reason: &str) -> Self {
        FieldStatus::Skipped {
            reason: reason.to_string(),
        }
    }
}

/// Deck and user settings a generation run needs.
#[derive(Debug, Clone)]
pub struct GenerationSettings<'a> {
    pub schema: &'a [FieldDefinition],
    /// Library defaults merged with the deck's overrides
    pub prompts: &'a BTreeMap<String, PromptPair>,
    pub target_language: &'a str,
    pub native_language: &'a str,
    pub locked: &'a HashSet<String>,
}

#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub payload: Payload,
    pub field_status: BTreeMap<String, FieldStatus>,
}

/// Audio produced for a card group together with the settings that made it.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub audio: bytes::Bytes,
    pub voice: String,
    pub instructions: String,
}

/// The prompt key used to generate a field. Custom fields use their own key.
pub fn prompt_key(field_key: &str) -> &str {
    match field_key {
        NATIVE_PHRASE => TRANSLATION_PROMPT,
        DICTIONARY_ENTRY => DICTIONARY_PROMPT,
        EXAMPLE_SENTENCE => SENTENCE_PROMPT,
        other => other,
    }
}

/// Phrases that already read as a sentence are their own example.
pub fn phrase_is_sentence(phrase: &str) -> bool {
    let trimmed = phrase.trim();
    let words = trimmed.split_whitespace().count();
    words >= 6 || (trimmed.ends_with(['.', '!', '?']) && words >= 4)
}

impl GenerationSettings<'_> {
    fn context(&self, payload: &Payload) -> BTreeMap<String, String> {
        let mut context: BTreeMap<String, String> = payload
            .iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .map(|(k, v)| (k.clone(), v.trim().to_string()))
            .collect();
        context.insert("target_language".to_string(), self.target_language.to_string());
        context.insert("native_language".to_string(), self.native_language.to_string());
        context
    }

    fn chat_prompt(&self, key: &str, context: &BTreeMap<String, String>) -> Option<ChatPrompt> {
        let pair = self.prompts.get(key)?;
        if pair.user.trim().is_empty() {
            return None;
        }
        Some(ChatPrompt {
            system: fill_prompt(&pair.system, context),
            user: fill_prompt(&pair.user, context),
        })
    }

    fn field(&self, key: &str) -> Option<&FieldDefinition> {
        self.schema.iter().find(|f| f.key == key)
    }

    fn is_builtin_chain(key: &str) -> bool {
        matches!(key, NATIVE_PHRASE | DICTIONARY_ENTRY | EXAMPLE_SENTENCE)
    }
}

async fn run_prompt(
    generator: &dyn TextGenerator,
    settings: &GenerationSettings<'_>,
    field_key: &str,
    context: &BTreeMap<String, String>,
) -> std::result::Result<String, FieldStatus> {
    let Some(prompt) = settings.chat_prompt(prompt_key(field_key), context) else {
        return Err(FieldStatus::skipped("No generation prompt configured."));
    };
    match generator.complete(&prompt).await {
        Ok(text) => Ok(text),
        Err(e) => {
            warn!(field = field_key, error = %e, "Field generation failed");
            Err(FieldStatus::Failed { error: e.to_string() })
        }
    }
}

/// Fill every empty, unlocked, auto-generated field of `payload`.
#[instrument(skip_all, fields(target_language = settings.target_language), err)]
pub async fn generate_all(
    generator: &dyn TextGenerator,
    settings: &GenerationSettings<'_>,
    mut payload: Payload,
) -> Result<GenerationOutcome> {
    let phrase = foreign_phrase(&payload).to_string();
    if phrase.is_empty() {
        return Err(Error::BadRequest {
            message: "Enter a foreign phrase first.".to_string(),
        });
    }

    let mut field_status = BTreeMap::new();
    let mut chain = Vec::new();
    let mut custom = Vec::new();

    for field in settings.schema.iter().filter(|f| f.key != FOREIGN_PHRASE) {
        let key = field.key.as_str();
        if !field_is_empty(&payload, key) {
            field_status.insert(field.key.clone(), FieldStatus::Kept);
        } else if settings.locked.contains(key) {
            field_status.insert(field.key.clone(), FieldStatus::skipped("Field is locked."));
        } else if !field.auto_generate {
            field_status.insert(field.key.clone(), FieldStatus::skipped("Generation is disabled for this field."));
        } else if GenerationSettings::is_builtin_chain(key) {
            chain.push(key);
        } else {
            custom.push(key);
        }
    }

    // Custom prompts only see values known before this run
    let initial_context = settings.context(&payload);
    let custom_futures = custom.iter().map(|key| {
        let context = &initial_context;
        async move { (*key, run_prompt(generator, settings, key, context).await) }
    });

    let chain_future = async {
        let mut generated = Vec::new();
        let mut context = initial_context.clone();
        let mut translation_failed = false;

        for key in [NATIVE_PHRASE, DICTIONARY_ENTRY, EXAMPLE_SENTENCE] {
            if !chain.contains(&key) {
                continue;
            }
            if translation_failed {
                generated.push((key, Err(FieldStatus::skipped("Translation failed."))));
                continue;
            }
            if key == EXAMPLE_SENTENCE && phrase_is_sentence(&phrase) {
                generated.push((key, Ok(phrase.clone())));
                continue;
            }

            let result = run_prompt(generator, settings, key, &context).await;
            match &result {
                Ok(text) => {
                    context.insert(key.to_string(), text.clone());
                }
                Err(FieldStatus::Failed { .. }) if key == NATIVE_PHRASE => translation_failed = true,
                Err(_) => {}
            }
            generated.push((key, result));
        }
        generated
    };

    let (chain_results, custom_results) = futures::join!(chain_future, join_all(custom_futures));

    for (key, result) in chain_results.into_iter().chain(custom_results) {
        let status = match result {
            Ok(text) => {
                payload.insert(key.to_string(), text);
                FieldStatus::Generated
            }
            Err(status) => status,
        };
        field_status.insert(key.to_string(), status);
    }

    debug!(fields = field_status.len(), "Generation finished");
    Ok(GenerationOutcome { payload, field_status })
}

/// Regenerate one field, overwriting its current value. No other field changes.
#[instrument(skip(generator, settings, payload), err)]
pub async fn regenerate_field(
    generator: &dyn TextGenerator,
    settings: &GenerationSettings<'_>,
    mut payload: Payload,
    field_key: &str,
) -> Result<GenerationOutcome> {
    if foreign_phrase(&payload).is_empty() {
        return Err(Error::BadRequest {
            message: "Provide a foreign phrase before regenerating.".to_string(),
        });
    }
    let field = settings.field(field_key).ok_or_else(|| Error::BadRequest {
        message: format!("Unknown field '{field_key}'."),
    })?;
    if field.key == FOREIGN_PHRASE || !field.auto_generate {
        return Err(Error::BadRequest {
            message: "Generation is disabled for this field in deck settings.".to_string(),
        });
    }
    if settings.locked.contains(field_key) {
        return Err(Error::BadRequest {
            message: format!("{} is locked. Unlock it before regenerating.", field.label),
        });
    }

    let mut context = settings.context(&payload);
    context.remove(field_key);

    match run_prompt(generator, settings, field_key, &context).await {
        Ok(text) => {
            payload.insert(field_key.to_string(), text);
            Ok(GenerationOutcome {
                payload,
                field_status: BTreeMap::from([(field_key.to_string(), FieldStatus::Generated)]),
            })
        }
        Err(FieldStatus::Failed { error }) => Err(Error::Upstream {
            provider: "OpenAI".to_string(),
            message: error,
        }),
        Err(FieldStatus::Skipped { reason }) => Err(Error::BadRequest { message: reason }),
        Err(other) => Err(Error::Internal {
            operation: format!("regenerate {field_key}: unexpected status {other:?}"),
        }),
    }
}

/// Native input mode: fill the foreign phrase from the native phrase.
#[instrument(skip_all, err)]
pub async fn reverse_translate(
    generator: &dyn TextGenerator,
    settings: &GenerationSettings<'_>,
    mut payload: Payload,
) -> Result<Payload> {
    if !foreign_phrase(&payload).is_empty() {
        return Ok(payload);
    }
    if field_is_empty(&payload, NATIVE_PHRASE) {
        return Err(Error::BadRequest {
            message: "Enter a native phrase first.".to_string(),
        });
    }

    let context = settings.context(&payload);
    let prompt = settings
        .chat_prompt(REVERSE_TRANSLATION_PROMPT, &context)
        .ok_or_else(|| Error::BadRequest {
            message: "No reverse translation prompt configured.".to_string(),
        })?;

    let translated = generator.complete(&prompt).await.map_err(|e| Error::Upstream {
        provider: "OpenAI".to_string(),
        message: format!("Translation failed: {e}"),
    })?;
    payload.insert(FOREIGN_PHRASE.to_string(), translated);
    Ok(payload)
}

/// Speak `text` with the requested voice (`random` picks one now).
#[instrument(skip(synthesizer, instructions), err)]
pub async fn synthesize_audio(
    synthesizer: &dyn SpeechSynthesizer,
    text: &str,
    voice: &str,
    instructions: &str,
) -> anyhow::Result<SynthesizedAudio> {
    if text.trim().is_empty() {
        anyhow::bail!("Nothing to speak");
    }
    let voice = pick_voice(voice);
    let audio = synthesizer
        .synthesize(&SpeechRequest {
            text: text.trim().to_string(),
            voice: voice.clone(),
            instructions: instructions.to_string(),
        })
        .await?;
    Ok(SynthesizedAudio {
        audio,
        voice,
        instructions: instructions.to_string(),
    })
}
