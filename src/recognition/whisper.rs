//! OpenAI Whisper recognition engine

use async_trait::async_trait;

use crate::{Error, Result};

use super::{RecognitionEngine, Transcript, TranscriptSegment, WordTiming};

/// Transcription endpoint
const TRANSCRIPTION_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Response from the Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
    #[serde(default)]
    words: Vec<WhisperWord>,
}

#[derive(serde::Deserialize)]
struct WhisperSegment {
    text: String,
    start: f64,
    end: f64,
}

#[derive(serde::Deserialize)]
struct WhisperWord {
    word: String,
    start: f64,
    end: f64,
}

/// Recognition engine backed by the OpenAI Whisper API
pub struct WhisperEngine {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl WhisperEngine {
    /// Create a Whisper engine
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        })
    }

    async fn request(
        &self,
        wav: &[u8],
        language: Option<&str>,
        timestamps: bool,
    ) -> Result<WhisperResponse> {
        tracing::debug!(audio_bytes = wav.len(), timestamps, "starting Whisper transcription");

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        if let Some(lang) = language {
            form = form.text("language", lang.to_string());
        }
        if timestamps {
            form = form
                .text("response_format", "verbose_json")
                .text("timestamp_granularities[]", "segment")
                .text("timestamp_granularities[]", "word");
        }

        let response = self
            .client
            .post(TRANSCRIPTION_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse Whisper response");
            e
        })?;

        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result)
    }
}

#[async_trait]
impl RecognitionEngine for WhisperEngine {
    async fn transcribe(&self, wav: &[u8], language: Option<&str>) -> Result<Transcript> {
        let response = self.request(wav, language, false).await?;
        Ok(Transcript {
            text: response.text,
            segments: Vec::new(),
        })
    }

    async fn transcribe_with_timestamps(
        &self,
        wav: &[u8],
        language: Option<&str>,
    ) -> Result<Transcript> {
        let response = self.request(wav, language, true).await?;

        let words = response.words;
        let segments = response
            .segments
            .into_iter()
            .map(|s| {
                // Attribute word timings to the segment spanning them
                let segment_words = words
                    .iter()
                    .filter(|w| w.start >= s.start && w.end <= s.end)
                    .map(|w| WordTiming {
                        word: w.word.clone(),
                        start: w.start,
                        end: w.end,
                    })
                    .collect();
                TranscriptSegment {
                    text: s.text.trim().to_string(),
                    start: s.start,
                    end: s.end,
                    words: segment_words,
                }
            })
            .collect();

        Ok(Transcript {
            text: response.text,
            segments,
        })
    }

    fn name(&self) -> &'static str {
        "whisper"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_api_key() {
        let result = WhisperEngine::new(String::new(), "whisper-1".to_string());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn parses_verbose_response() {
        let body = r#"{
            "text": "hello world",
            "segments": [{"text": " hello world", "start": 0.0, "end": 1.2}],
            "words": [
                {"word": "hello", "start": 0.0, "end": 0.5},
                {"word": "world", "start": 0.6, "end": 1.2}
            ]
        }"#;
        let parsed: WhisperResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.text, "hello world");
        assert_eq!(parsed.segments.len(), 1);
        assert_eq!(parsed.words.len(), 2);
    }
}
