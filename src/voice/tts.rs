//! TTS backends: text -> MP3 file bytes (44.1kHz/128kbps) for the file-backed
//! path, or a live μ-law 8kHz byte stream for the stream-backed path.

use crate::config::Config;
use crate::error::VoiceError;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Bounded queue capacity for the TTS stream contract (§4.6).
pub const STREAM_QUEUE_CAPACITY: usize = 512;

#[async_trait]
pub trait TtsBackend: Send + Sync {
    /// Synthesize the full utterance to MP3 bytes.
    async fn synthesize_file(&self, text: &str) -> Result<Vec<u8>, VoiceError>;

    /// Synthesize incrementally, pushing raw μ-law bytes into a bounded
    /// channel as they arrive. Backpressure policy is drop-newest: once the
    /// channel is full, further bytes for this utterance are discarded
    /// rather than blocking the producer, preserving the head of the
    /// utterance over its tail.
    async fn synthesize_stream(&self, text: &str) -> Result<mpsc::Receiver<Vec<u8>>, VoiceError>;
}

pub struct CloudTtsBackend {
    client: reqwest::Client,
    api_key: String,
    voice_id: String,
}

impl CloudTtsBackend {
    pub fn new(api_key: String, voice_id: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            voice_id,
        }
    }
}

#[async_trait]
impl TtsBackend for CloudTtsBackend {
    async fn synthesize_file(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
        let url = format!("https://api.elevenlabs.io/v1/text-to-speech/{}", self.voice_id);
        let resp = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&serde_json::json!({ "text": text }))
            .timeout(std::time::Duration::from_secs(15))
            .send()
            .await
            .map_err(|e| VoiceError::Transient(e.to_string()))?;

        if resp.status().is_server_error() {
            return Err(VoiceError::Transient(format!("tts {}", resp.status())));
        }
        if !resp.status().is_success() {
            return Err(VoiceError::PermanentClient(format!("tts {}", resp.status())));
        }
        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| VoiceError::Transient(e.to_string()))
    }

    async fn synthesize_stream(&self, text: &str) -> Result<mpsc::Receiver<Vec<u8>>, VoiceError> {
        let url = format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}/stream?output_format=ulaw_8000",
            self.voice_id
        );
        let resp = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&serde_json::json!({ "text": text }))
            .timeout(std::time::Duration::from_secs(15))
            .send()
            .await
            .map_err(|e| VoiceError::Transient(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(VoiceError::Transient(format!("tts stream {}", resp.status())));
        }

        let (tx, rx) = mpsc::channel(STREAM_QUEUE_CAPACITY);
        tokio::spawn(async move {
            use futures_util::StreamExt;
            let mut stream = resp.bytes_stream();
            while let Some(next) = stream.next().await {
                match next {
                    Ok(bytes) => {
                        // drop-newest: try_send never blocks; a full channel
                        // silently discards this slice but the producer keeps
                        // pulling rather than abandoning the rest of the utterance.
                        if let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(bytes.to_vec()) {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "tts stream read error");
                        break;
                    }
                }
            }
        });
        Ok(rx)
    }
}

pub struct LocalTtsBackend {
    client: reqwest::Client,
    endpoint: String,
}

impl LocalTtsBackend {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl TtsBackend for LocalTtsBackend {
    async fn synthesize_file(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "text": text, "format": "mp3" }))
            .timeout(std::time::Duration::from_secs(15))
            .send()
            .await
            .map_err(|e| VoiceError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(VoiceError::Transient(format!("local tts {}", resp.status())));
        }
        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| VoiceError::Transient(e.to_string()))
    }

    async fn synthesize_stream(&self, text: &str) -> Result<mpsc::Receiver<Vec<u8>>, VoiceError> {
        // Local engines in this deployment are file-backed only; present an
        // immediately-closed stream so callers fall back to silence rather
        // than blocking.
        let _ = text;
        let (_tx, rx) = mpsc::channel(STREAM_QUEUE_CAPACITY);
        Ok(rx)
    }
}

pub fn build_backend(cfg: &Config) -> Box<dyn TtsBackend> {
    match cfg.tts_strategy {
        crate::config::Strategy::CloudApi => Box::new(CloudTtsBackend::new(
            cfg.elevenlabs_api_key.clone(),
            "21m00Tcm4TlvDq8ikWAM".to_string(),
        )),
        crate::config::Strategy::LocalModel => {
            Box::new(LocalTtsBackend::new("http://localhost:5002/api/tts".to_string()))
        }
    }
}
