//! Speech-to-text used to confirm wake word candidates

use secrecy::{ExposeSecret, SecretString};

use super::wake_word::EngineError;

/// Default OpenAI-compatible transcription endpoint
pub const DEFAULT_STT_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Response from a Whisper-style transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcribes short utterances
pub struct SpeechToText {
    client: reqwest::Client,
    url: String,
    api_key: SecretString,
    model: String,
}

impl std::fmt::Debug for SpeechToText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechToText")
            .field("url", &self.url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl SpeechToText {
    /// Create a Whisper client
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new_whisper(
        url: impl Into<String>,
        api_key: SecretString,
        model: impl Into<String>,
    ) -> Result<Self, EngineError> {
        if api_key.expose_secret().is_empty() {
            return Err(EngineError::Init(
                "an STT API key is required to confirm the wake word".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            url: url.into(),
            api_key,
            model: model.into(),
        })
    }

    /// Transcribe WAV bytes to text
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the API answers with an error
    pub async fn transcribe(&self, audio: Vec<u8>) -> Result<String, EngineError> {
        tracing::debug!(audio_bytes = audio.len(), "starting transcription");

        let part = reqwest::multipart::Part::bytes(audio)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| EngineError::Transcription(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| EngineError::Transcription(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "transcription API error");
            return Err(EngineError::Transcription(format!("API error {status}")));
        }

        let result: WhisperResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Transcription(e.to_string()))?;

        tracing::debug!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}
