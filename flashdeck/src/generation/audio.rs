//! Voices, audio preferences and remote clip downloads.

use base64::{Engine as _, engine::general_purpose};
use bytes::{Bytes, BytesMut};
use rand::seq::IndexedRandom;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::instrument;
use utoipa::ToSchema;

use crate::errors::{Error, Result};

pub const RANDOM_VOICE: &str = "random";

pub const VOICES: [&str; 10] = [
    "alloy", "ash", "ballad", "coral", "echo", "fable", "nova", "onyx", "sage", "shimmer",
];

const REMOTE_AUDIO_TIMEOUT: Duration = Duration::from_secs(15);

const AUDIO_EXTENSIONS: [&str; 7] = [".mp3", ".wav", ".ogg", ".oga", ".m4a", ".aac", ".flac"];

/// Voice and speaking instructions chosen in the card editor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AudioPreferences {
    pub voice: Option<String>,
    pub instructions: Option<String>,
}

/// Preferences after defaults have been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ResolvedAudioPreferences {
    pub voice: String,
    pub instructions: String,
}

impl AudioPreferences {
    /// Unknown voices fall back to `random`; blank instructions fall back to the deck's.
    pub fn resolve(&self, deck_instructions: &str) -> ResolvedAudioPreferences {
        let voice = self
            .voice
            .as_deref()
            .map(|v| v.trim().to_ascii_lowercase())
            .filter(|v| VOICES.contains(&v.as_str()))
            .unwrap_or_else(|| RANDOM_VOICE.to_string());
        let instructions = self
            .instructions
            .as_deref()
            .map(str::trim)
            .filter(|i| !i.is_empty())
            .unwrap_or(deck_instructions)
            .to_string();
        ResolvedAudioPreferences { voice, instructions }
    }
}

/// Pick the concrete voice for one synthesis call.
pub fn pick_voice(voice: &str) -> String {
    if VOICES.contains(&voice) {
        return voice.to_string();
    }
    VOICES
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(VOICES[0])
        .to_string()
}

pub fn encode_preview(audio: &[u8]) -> String {
    general_purpose::STANDARD.encode(audio)
}

/// Decode an `audioPreview` string. Blank means no audio; a `data:` URL prefix is tolerated.
pub fn decode_preview(preview: Option<&str>) -> Result<Option<Bytes>> {
    let Some(raw) = preview.map(str::trim).filter(|p| !p.is_empty()) else {
        return Ok(None);
    };
    let encoded = match raw.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => raw,
    };
    general_purpose::STANDARD
        .decode(encoded)
        .map(|bytes| Some(Bytes::from(bytes)))
        .map_err(|_| Error::BadRequest {
            message: "Audio preview is not valid base64.".to_string(),
        })
}

fn looks_like_audio(url: &str, content_type: Option<&str>) -> bool {
    if content_type.is_some_and(|ct| ct.trim().to_ascii_lowercase().starts_with("audio/")) {
        return true;
    }
    let path = url.split(['?', '#']).next().unwrap_or_default().to_ascii_lowercase();
    AUDIO_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Download an audio clip for the `fetch_audio` card action.
///
/// Only http(s) URLs are accepted and the body is capped at `max_bytes`.
#[instrument(skip(client), err)]
pub async fn fetch_remote_audio(client: &Client, url: &str, max_bytes: usize) -> Result<Bytes> {
    let url = url.trim();
    if url.is_empty() {
        return Err(Error::BadRequest {
            message: "Enter an audio URL to fetch.".to_string(),
        });
    }
    let lowered = url.to_ascii_lowercase();
    if !lowered.starts_with("http://") && !lowered.starts_with("https://") {
        return Err(Error::BadRequest {
            message: "Audio URL must start with http:// or https://.".to_string(),
        });
    }

    let too_large = || Error::BadRequest {
        message: format!(
            "Audio file is too large. Please provide a clip under {} MB.",
            max_bytes.div_ceil(1024 * 1024)
        ),
    };

    let mut response = client
        .get(url)
        .timeout(REMOTE_AUDIO_TIMEOUT)
        .send()
        .await
        .map_err(|_| Error::BadRequest {
            message: "Unable to reach the audio URL. Check the link and try again.".to_string(),
        })?;

    if !response.status().is_success() {
        return Err(Error::BadRequest {
            message: format!("Unable to download audio (HTTP {}).", response.status().as_u16()),
        });
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if !looks_like_audio(url, content_type.as_deref()) {
        return Err(Error::BadRequest {
            message: "The link does not point to an audio file.".to_string(),
        });
    }

    if response.content_length().is_some_and(|len| len as usize > max_bytes) {
        return Err(too_large());
    }

    let mut body = BytesMut::new();
    while let Some(chunk) = response.chunk().await.map_err(|_| Error::BadRequest {
        message: "Unable to download audio. Check the link and try again.".to_string(),
    })? {
        if body.len() + chunk.len() > max_bytes {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }

    if body.is_empty() {
        return Err(Error::BadRequest {
            message: "Downloaded file was empty.".to_string(),
        });
    }

    Ok(body.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_resolve_preferences() {
        let prefs = AudioPreferences {
            voice: Some("NOVA".into()),
            instructions: Some("  ".into()),
        };
        let resolved = prefs.resolve("Speak Danish.");
        assert_eq!(resolved.voice, "nova");
        assert_eq!(resolved.instructions, "Speak Danish.");

        let unknown = AudioPreferences {
            voice: Some("robot".into()),
            instructions: Some("Whisper.".into()),
        }
        .resolve("Speak Danish.");
        assert_eq!(unknown.voice, RANDOM_VOICE);
        assert_eq!(unknown.instructions, "Whisper.");
    }

    #[test]
    fn test_pick_voice() {
        assert_eq!(pick_voice("coral"), "coral");
        for _ in 0..20 {
            assert!(VOICES.contains(&pick_voice(RANDOM_VOICE).as_str()));
        }
    }

    #[test]
    fn test_decode_preview() {
        assert_eq!(decode_preview(None).unwrap(), None);
        assert_eq!(decode_preview(Some("")).unwrap(), None);
        let encoded = encode_preview(b"ID3");
        assert_eq!(decode_preview(Some(&encoded)).unwrap().unwrap().as_ref(), b"ID3");
        let data_url = format!("data:audio/mpeg;base64,{encoded}");
        assert_eq!(decode_preview(Some(&data_url)).unwrap().unwrap().as_ref(), b"ID3");
        assert!(decode_preview(Some("***")).is_err());
    }

    #[test]
    fn test_looks_like_audio() {
        assert!(looks_like_audio("https://x.test/clip", Some("audio/mpeg")));
        assert!(looks_like_audio("https://x.test/clip.MP3?sig=1", Some("application/octet-stream")));
        assert!(!looks_like_audio("https://x.test/page", Some("text/html")));
    }

    #[tokio::test]
    async fn test_fetch_rejects_non_http_urls() {
        let client = crate::generation::http_client().unwrap();
        let err = fetch_remote_audio(&client, "ftp://example.com/a.mp3", 1024).await.unwrap_err();
        assert_eq!(err.user_message(), "Audio URL must start with http:// or https://.");
        let err = fetch_remote_audio(&client, "  ", 1024).await.unwrap_err();
        assert_eq!(err.user_message(), "Enter an audio URL to fetch.");
    }

    #[tokio::test]
    async fn test_fetch_downloads_audio() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/clip.mp3"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![1u8, 2, 3], "audio/mpeg"))
            .mount(&server)
            .await;

        let client = crate::generation::http_client().unwrap();
        let audio = fetch_remote_audio(&client, &format!("{}/clip.mp3", server.uri()), 1024)
            .await
            .unwrap();
        assert_eq!(audio.as_ref(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_fetch_enforces_size_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big.mp3"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0u8; 4096], "audio/mpeg"))
            .mount(&server)
            .await;

        let client = crate::generation::http_client().unwrap();
        let err = fetch_remote_audio(&client, &format!("{}/big.mp3", server.uri()), 1024)
            .await
            .unwrap_err();
        assert!(err.user_message().starts_with("Audio file is too large."));
    }

    #[tokio::test]
    async fn test_fetch_reports_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.mp3"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = crate::generation::http_client().unwrap();
        let err = fetch_remote_audio(&client, &format!("{}/missing.mp3", server.uri()), 1024)
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "Unable to download audio (HTTP 404).");
    }
}
