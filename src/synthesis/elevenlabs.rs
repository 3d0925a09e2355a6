//! ElevenLabs synthesis engine

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::profile::VoiceProfile;
use crate::{Error, Result};

use super::SynthesisEngine;

/// Synthesis endpoint base
const API_BASE: &str = "https://api.elevenlabs.io/v1/text-to-speech";

/// Default model when none is configured
const DEFAULT_MODEL: &str = "eleven_multilingual_v2";

#[derive(serde::Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(serde::Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
    style: f32,
    use_speaker_boost: bool,
}

/// Synthesis engine backed by the ElevenLabs API
pub struct ElevenLabsEngine {
    client: reqwest::Client,
    api_key: String,
    model: String,
    streaming: bool,
}

impl ElevenLabsEngine {
    /// Create an engine with the default model and streaming enabled
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_model(api_key, DEFAULT_MODEL.to_string(), true)
    }

    /// Create an engine with an explicit model and streaming mode
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn with_model(api_key: String, model: String, streaming: bool) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            streaming,
        })
    }

    async fn request(
        &self,
        text: &str,
        profile: &VoiceProfile,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let url = if stream {
            format!("{API_BASE}/{}/stream", profile.id)
        } else {
            format!("{API_BASE}/{}", profile.id)
        };

        let request = SynthesisRequest {
            text,
            model_id: &self.model,
            voice_settings: VoiceSettings {
                stability: profile.stability,
                similarity_boost: profile.similarity,
                style: profile.style,
                use_speaker_boost: profile.speaker_boost,
            },
        };

        tracing::debug!(voice = %profile.id, chars = text.len(), stream, "starting synthesis");

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "ElevenLabs API error");
            return Err(Error::Tts(format!("ElevenLabs API error {status}: {body}")));
        }

        Ok(response)
    }
}

#[async_trait]
impl SynthesisEngine for ElevenLabsEngine {
    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn synthesize(&self, text: &str, profile: &VoiceProfile) -> Result<Vec<u8>> {
        let response = self.request(text, profile, false).await?;
        let audio = response.bytes().await?;
        tracing::debug!(bytes = audio.len(), "synthesis complete");
        Ok(audio.to_vec())
    }

    async fn synthesize_stream(
        &self,
        text: &str,
        profile: &VoiceProfile,
    ) -> Result<BoxStream<'static, Result<Vec<u8>>>> {
        let response = self.request(text, profile, true).await?;

        let stream = response
            .bytes_stream()
            .map(|chunk| match chunk {
                Ok(bytes) => Ok(bytes.to_vec()),
                Err(e) => Err(Error::Tts(format!("stream error: {e}"))),
            })
            .boxed();

        Ok(stream)
    }

    fn name(&self) -> &'static str {
        "elevenlabs"
    }
}
