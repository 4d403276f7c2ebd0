//! Sending a recording to the assistant and receiving its spoken reply

use std::error::Error as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use tempfile::TempPath;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::config::AssistantConfig;

/// Multipart field the recording is sent in
const FILE_FIELD: &str = "file";

/// Media type of the uploaded part
const AUDIO_MIME: &str = "audio/*";

/// Why a request never got an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFailure {
    /// Host name did not resolve
    NoConnection,
    /// Connect or read timed out
    Timeout,
    /// Server refused or dropped the connection
    Unavailable,
    /// Anything else
    Other,
}

/// Assistant round trip failures
#[derive(Debug, Error)]
pub enum UploadError {
    /// Recording is missing
    #[error("audio file not found: {}", .0.display())]
    MissingFile(PathBuf),

    /// Recording could not be read
    #[error("cannot read audio file: {0}")]
    ReadAudio(#[source] std::io::Error),

    /// Reply could not be saved
    #[error("cannot save reply audio: {0}")]
    SaveReply(#[source] std::io::Error),

    /// Request failed before a response arrived
    #[error("network error: {message}")]
    Network {
        failure: NetworkFailure,
        message: String,
    },

    /// Server answered with a non-success status
    #[error("server error ({code})")]
    Status { code: u16 },

    /// Server answered with no audio
    #[error("empty response from server")]
    EmptyBody,
}

impl UploadError {
    /// Short notice for the user
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingFile(_) => "Audio file not found".to_string(),
            Self::ReadAudio(_) => "Cannot read audio file".to_string(),
            Self::SaveReply(_) => "Error saving audio".to_string(),
            Self::Network { failure, .. } => match failure {
                NetworkFailure::NoConnection => "No internet connection",
                NetworkFailure::Timeout => "Connection timeout",
                NetworkFailure::Unavailable => "Server unavailable",
                NetworkFailure::Other => "Network error",
            }
            .to_string(),
            Self::Status { code } => format!("Server error ({code})"),
            Self::EmptyBody => "Empty response from server".to_string(),
        }
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        let failure = classify(&err);
        Self::Network {
            failure,
            message: err.to_string(),
        }
    }
}

/// Map a transport error to a failure category
fn classify(err: &reqwest::Error) -> NetworkFailure {
    if err.is_timeout() {
        return NetworkFailure::Timeout;
    }

    let mut detail = String::new();
    let mut source = err.source();
    while let Some(cause) = source {
        detail.push_str(&cause.to_string().to_lowercase());
        detail.push(' ');
        source = cause.source();
    }

    if detail.contains("dns") || detail.contains("lookup") || detail.contains("resolve") {
        NetworkFailure::NoConnection
    } else if detail.contains("timed out") {
        NetworkFailure::Timeout
    } else if err.is_connect() || detail.contains("refused") || detail.contains("reset") {
        NetworkFailure::Unavailable
    } else {
        NetworkFailure::Other
    }
}

/// What the assistant sent back
#[derive(Debug)]
pub struct AssistantReply {
    /// The user's words as the assistant heard them
    pub transcription: Option<String>,

    /// The assistant's reply as text
    pub response_text: Option<String>,

    /// Whether to listen again right after playback
    pub continue_conversation: bool,

    /// Reply audio; the file is deleted when this is dropped or closed
    pub audio: TempPath,
}

/// One request, one reply
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Send the recording at `file` and wait for the reply
    ///
    /// # Errors
    ///
    /// Returns error if the file is unreadable, the request fails or the
    /// server answers without audio
    async fn upload(&self, file: &Path) -> Result<AssistantReply, UploadError>;
}

/// Multipart HTTP uploader
#[derive(Debug)]
pub struct HttpUploader {
    client: reqwest::Client,
    url: String,
    transcription_header: String,
    response_text_header: String,
    continue_header: String,
    reply_dir: PathBuf,
}

impl HttpUploader {
    /// Create an uploader; replies are stored under `reply_dir`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: &AssistantConfig, reply_dir: impl Into<PathBuf>) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.io_timeout)
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
            transcription_header: config.transcription_header.clone(),
            response_text_header: config.response_text_header.clone(),
            continue_header: config.continue_header.clone(),
            reply_dir: reply_dir.into(),
        })
    }

    fn header(response: &reqwest::Response, name: &str) -> Option<String> {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
    }

    /// Stream the body into a temporary `.mp3`, returning it with its size
    async fn save_body(&self, response: reqwest::Response) -> Result<(TempPath, u64), UploadError> {
        tokio::fs::create_dir_all(&self.reply_dir)
            .await
            .map_err(UploadError::SaveReply)?;
        let (file, path) = tempfile::Builder::new()
            .prefix("voicegate_reply_")
            .suffix(".mp3")
            .tempfile_in(&self.reply_dir)
            .map_err(UploadError::SaveReply)?
            .into_parts();

        let mut file = tokio::fs::File::from_std(file);
        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await.map_err(UploadError::SaveReply)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(UploadError::SaveReply)?;

        Ok((path, written))
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, file: &Path) -> Result<AssistantReply, UploadError> {
        if !tokio::fs::try_exists(file).await.unwrap_or(false) {
            return Err(UploadError::MissingFile(file.to_path_buf()));
        }
        let audio = tokio::fs::read(file).await.map_err(UploadError::ReadAudio)?;
        let file_name = file
            .file_name()
            .map_or_else(|| "recording.wav".to_string(), |n| n.to_string_lossy().into_owned());

        tracing::info!(url = %self.url, bytes = audio.len(), file = %file_name, "uploading recording");

        let part = reqwest::multipart::Part::bytes(audio)
            .file_name(file_name)
            .mime_str(AUDIO_MIME)?;
        let form = reqwest::multipart::Form::new().part(FILE_FIELD, part);

        let response = self.client.post(&self.url).multipart(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "assistant returned an error");
            return Err(UploadError::Status {
                code: status.as_u16(),
            });
        }

        let transcription = Self::header(&response, &self.transcription_header);
        let response_text = Self::header(&response, &self.response_text_header);
        let continue_conversation = Self::header(&response, &self.continue_header)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));

        let (audio, size) = self.save_body(response).await?;
        if size == 0 {
            return Err(UploadError::EmptyBody);
        }

        tracing::info!(
            bytes = size,
            continue_conversation,
            transcription = transcription.as_deref().unwrap_or_default(),
            "assistant replied"
        );

        Ok(AssistantReply {
            transcription,
            response_text,
            continue_conversation,
            audio,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
    use tokio::net::TcpListener;

    use super::*;

    /// Serve one canned response, returning the raw request
    async fn serve_once(response: &'static [u8]) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/talk", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);

            let mut head = String::new();
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).await.unwrap();
                if let Some(v) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = v.trim().parse().unwrap();
                }
                head.push_str(&line);
                if line == "\r\n" {
                    break;
                }
            }
            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).await.unwrap();

            reader.get_mut().write_all(response).await.unwrap();
            reader.get_mut().shutdown().await.unwrap();

            head + &String::from_utf8_lossy(&body)
        });

        (url, handle)
    }

    fn uploader(url: String, dir: &Path) -> HttpUploader {
        let config = AssistantConfig {
            url,
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(5),
            ..AssistantConfig::default()
        };
        HttpUploader::new(&config, dir).unwrap()
    }

    fn recording(dir: &Path) -> PathBuf {
        let path = dir.join("rec.wav");
        std::fs::write(&path, b"RIFF fake wav").unwrap();
        path
    }

    #[tokio::test]
    async fn reply_headers_and_audio_are_captured() {
        let (url, server) = serve_once(
            b"HTTP/1.1 200 OK\r\n\
              Content-Type: audio/mpeg\r\n\
              X-Transcription: buy milk\r\n\
              X-Response-Text: added to your list\r\n\
              X-Continue-Conversation: TRUE\r\n\
              Content-Length: 4\r\n\r\nID3x",
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let file = recording(dir.path());

        let reply = uploader(url, dir.path()).upload(&file).await.unwrap();
        assert_eq!(reply.transcription.as_deref(), Some("buy milk"));
        assert_eq!(reply.response_text.as_deref(), Some("added to your list"));
        assert!(reply.continue_conversation);
        assert_eq!(std::fs::read(&reply.audio).unwrap(), b"ID3x");
        assert!(reply.audio.to_string_lossy().ends_with(".mp3"));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /talk"));
        assert!(request.contains("name=\"file\"; filename=\"rec.wav\""));
        assert!(request.contains("Content-Type: audio/*"));

        let path = reply.audio.to_path_buf();
        drop(reply);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn missing_continue_header_means_stop() {
        let (url, _server) =
            serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").await;
        let dir = tempfile::tempdir().unwrap();
        let file = recording(dir.path());

        let reply = uploader(url, dir.path()).upload(&file).await.unwrap();
        assert!(!reply.continue_conversation);
        assert!(reply.transcription.is_none());
    }

    #[tokio::test]
    async fn server_error_status() {
        let (url, _server) =
            serve_once(b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 4\r\n\r\nbusy").await;
        let dir = tempfile::tempdir().unwrap();
        let file = recording(dir.path());

        let err = uploader(url, dir.path()).upload(&file).await.unwrap_err();
        assert!(matches!(err, UploadError::Status { code: 503 }));
        assert_eq!(err.user_message(), "Server error (503)");
    }

    #[tokio::test]
    async fn empty_body_is_an_error() {
        let (url, _server) = serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await;
        let dir = tempfile::tempdir().unwrap();
        let file = recording(dir.path());

        let err = uploader(url, dir.path()).upload(&file).await.unwrap_err();
        assert!(matches!(err, UploadError::EmptyBody));
    }

    #[tokio::test]
    async fn missing_recording() {
        let dir = tempfile::tempdir().unwrap();
        let err = uploader("http://127.0.0.1:9/talk".to_string(), dir.path())
            .upload(&dir.path().join("nope.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::MissingFile(_)));
    }

    #[tokio::test]
    async fn refused_connection_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/talk", listener.local_addr().unwrap());
        drop(listener);

        let dir = tempfile::tempdir().unwrap();
        let file = recording(dir.path());

        let err = uploader(url, dir.path()).upload(&file).await.unwrap_err();
        assert!(matches!(
            err,
            UploadError::Network {
                failure: NetworkFailure::Unavailable,
                ..
            }
        ));
        assert_eq!(err.user_message(), "Server unavailable");
    }
}
