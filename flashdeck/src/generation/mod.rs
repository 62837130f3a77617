//! Text and speech generation for card fields.
//!
//! [`provider`] wraps the OpenAI-compatible HTTP API behind the [`TextGenerator`] and
//! [`SpeechSynthesizer`] traits, [`pipeline`] decides which fields to fill and in which order,
//! [`audio`] covers voices and remote clip downloads, and [`keys`] picks the provider key a request
//! runs with.

pub mod audio;
pub mod keys;
pub mod pipeline;
pub mod provider;

pub use pipeline::{FieldStatus, GenerationOutcome, GenerationSettings};
pub use provider::{ChatPrompt, OpenAiClient, SpeechRequest, SpeechSynthesizer, TextGenerator};

/// Shared outbound HTTP client.
///
/// reqwest is built without a bundled TLS provider, so the aws-lc-rs provider is installed here
/// first. Installing twice is harmless.
pub fn http_client() -> anyhow::Result<reqwest::Client> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    Ok(reqwest::Client::builder().build()?)
}
