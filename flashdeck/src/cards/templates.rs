//! Per-deck prompt templates and face rendering.
//!
//! Card faces are minijinja templates over the card group payload (`{{native_phrase}}` etc.).
//! Generation prompts use plain `{key}` or `{{key}}` placeholders and are filled with
//! [`fill_prompt`]; unknown placeholders are left untouched.

use minijinja::Environment;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

use crate::errors::{Error, Result};
use crate::types::Direction;

use super::payload::Payload;

pub const DEFAULT_AUDIO_INSTRUCTIONS_TEMPLATE: &str =
    "Talk in a natural tone and speed for a native {target_language} speaker.";

pub const TRANSLATION_PROMPT: &str = "translation";
pub const REVERSE_TRANSLATION_PROMPT: &str = "reverse_translation";
pub const DICTIONARY_PROMPT: &str = "dictionary";
pub const SENTENCE_PROMPT: &str = "sentence";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CardTemplate {
    pub front: String,
    pub back: String,
}

/// System and user message for one generation task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PromptPair {
    #[serde(default)]
    pub system: String,
    #[serde(default)]
    pub user: String,
}

impl PromptPair {
    fn new(system: &str, user: &str) -> Self {
        Self {
            system: system.to_string(),
            user: user.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AudioSettings {
    #[serde(default = "default_audio_instructions")]
    pub instructions: String,
    #[serde(default = "default_audio_enabled")]
    pub enabled: bool,
}

fn default_audio_instructions() -> String {
    DEFAULT_AUDIO_INSTRUCTIONS_TEMPLATE.to_string()
}

fn default_audio_enabled() -> bool {
    true
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            instructions: default_audio_instructions(),
            enabled: default_audio_enabled(),
        }
    }
}

/// Everything a deck stores in its `prompt_templates` column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct PromptTemplates {
    pub forward: CardTemplate,
    pub backward: CardTemplate,
    /// Overrides keyed by task (`translation`, `dictionary`, `sentence`, `reverse_translation`)
    /// or by custom field key
    pub generation: BTreeMap<String, PromptPair>,
    pub audio: AudioSettings,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            forward: CardTemplate {
                front: "{{foreign_phrase}}".to_string(),
                back: "<div class='native font-semibold text-lg mb-2'>{{native_phrase}}</div>\
                       <div class='example italic text-base mb-2'>{{example_sentence}}</div>\
                       <div class='dictionary text-sm'>{{dictionary_entry}}</div>"
                    .to_string(),
            },
            backward: CardTemplate {
                front: "{{native_phrase}}".to_string(),
                back: "<div class='foreign font-semibold text-lg mb-2'>{{foreign_phrase}}</div>\
                       <div class='example italic text-base mb-2'>{{example_sentence}}</div>\
                       <div class='dictionary text-sm'>{{dictionary_entry}}</div>"
                    .to_string(),
            },
            generation: default_generation_prompts(),
            audio: AudioSettings::default(),
        }
    }
}

pub fn default_generation_prompts() -> BTreeMap<String, PromptPair> {
    BTreeMap::from([
        (
            TRANSLATION_PROMPT.to_string(),
            PromptPair::new(
                "You are a professional translator who answers succinctly.",
                "Translate '{foreign_phrase}' from {target_language} to {native_language}. Respond with only the translation.",
            ),
        ),
        (
            REVERSE_TRANSLATION_PROMPT.to_string(),
            PromptPair::new(
                "You are a professional translator who answers succinctly.",
                "Translate '{native_phrase}' from {native_language} to {target_language}. Respond with only the translation.",
            ),
        ),
        (
            DICTIONARY_PROMPT.to_string(),
            PromptPair::new(
                "You are a linguist who explains grammar in concise HTML.",
                "Provide a dictionary-style breakdown of '{foreign_phrase}' in {target_language}. Include part of speech, morphology, and 2-3 usage notes. Output HTML using only <div>, <br>, <ul>, <li>, <b>, <i>.",
            ),
        ),
        (
            SENTENCE_PROMPT.to_string(),
            PromptPair::new(
                "You create short, natural example sentences.",
                "Write a short {target_language} sentence that naturally uses '{foreign_phrase}'. Keep it simple and output only the sentence.",
            ),
        ),
    ])
}

/// Partial card templates accepted on deck create/update.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CardTemplatesInput {
    pub forward: Option<CardTemplate>,
    pub backward: Option<CardTemplate>,
}

/// Template overrides accepted on deck create/update. `None` leaves the stored value alone.
#[derive(Debug, Clone, Default)]
pub struct TemplateOverrides {
    pub generation_prompts: Option<BTreeMap<String, PromptPair>>,
    pub card_templates: Option<CardTemplatesInput>,
    pub audio_instructions: Option<String>,
    pub audio_enabled: Option<bool>,
}

impl PromptTemplates {
    pub fn template_for(&self, direction: Direction) -> &CardTemplate {
        match direction {
            Direction::Forward => &self.forward,
            Direction::Backward => &self.backward,
        }
    }

    /// Library defaults with this deck's overrides on top.
    pub fn generation_prompts(&self) -> BTreeMap<String, PromptPair> {
        let mut merged = default_generation_prompts();
        merged.extend(self.generation.clone());
        merged
    }

    pub fn audio_instructions(&self, target_language: &str) -> String {
        let template = if self.audio.instructions.trim().is_empty() {
            DEFAULT_AUDIO_INSTRUCTIONS_TEMPLATE
        } else {
            self.audio.instructions.as_str()
        };
        let language = match target_language.trim() {
            "" => "the target language",
            language => language,
        };
        template.replace("{target_language}", language)
    }

    /// Merge client overrides into these templates. Card templates are syntax-checked.
    pub fn apply(&mut self, overrides: TemplateOverrides) -> Result<()> {
        if let Some(prompts) = overrides.generation_prompts {
            for (key, pair) in prompts {
                if pair.system.trim().is_empty() && pair.user.trim().is_empty() {
                    self.generation.remove(&key);
                } else {
                    self.generation.insert(key, pair);
                }
            }
        }

        if let Some(cards) = overrides.card_templates {
            for (direction, template) in [(Direction::Forward, cards.forward), (Direction::Backward, cards.backward)] {
                let Some(template) = template else { continue };
                check_template(direction, "front", &template.front)?;
                check_template(direction, "back", &template.back)?;
                match direction {
                    Direction::Forward => self.forward = template,
                    Direction::Backward => self.backward = template,
                }
            }
        }

        if let Some(instructions) = overrides.audio_instructions {
            self.audio.instructions = match instructions.trim() {
                "" => DEFAULT_AUDIO_INSTRUCTIONS_TEMPLATE.to_string(),
                trimmed => trimmed.to_string(),
            };
        }

        if let Some(enabled) = overrides.audio_enabled {
            self.audio.enabled = enabled;
        }

        Ok(())
    }
}

fn check_template(direction: Direction, side: &str, source: &str) -> Result<()> {
    let env = Environment::new();
    env.template_from_str(source).map(|_| ()).map_err(|e| Error::BadRequest {
        message: format!("The {direction} {side} template is invalid: {e}"),
    })
}

/// Rendered faces of one card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct RenderedFaces {
    pub front: String,
    pub back: String,
}

/// Render both faces of `direction` for a payload.
///
/// Keys missing from the payload render as empty strings. A template that fails to render
/// (only possible for templates stored before validation existed) falls back to its raw text.
pub fn render_card(
    templates: &PromptTemplates,
    direction: Direction,
    payload: &Payload,
    target_language: &str,
    native_language: Option<&str>,
) -> RenderedFaces {
    let mut context: BTreeMap<&str, &str> = payload.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    context.insert("direction", direction.as_str());
    context.insert("target_language", target_language);
    context.insert("native_language", native_language.unwrap_or_default());

    let env = Environment::new();
    let template = templates.template_for(direction);
    let render = |source: &str| match env.render_str(source, &context) {
        Ok(rendered) => rendered.trim().to_string(),
        Err(e) => {
            tracing::warn!(%direction, error = %e, "Card template failed to render");
            source.to_string()
        }
    };

    RenderedFaces {
        front: render(&template.front),
        back: render(&template.back),
    }
}

/// Substitute `{{key}}` and `{key}` placeholders in a generation prompt.
pub fn fill_prompt(template: &str, context: &BTreeMap<String, String>) -> String {
    let mut filled = template.to_string();
    for (key, value) in context {
        filled = filled.replace(&format!("{{{{{key}}}}}"), value);
        filled = filled.replace(&format!("{{{key}}}"), value);
    }
    filled
}
