//! Static Prompt Cache (C10): the greeting, reminder, and goodbye lines are
//! synthesized once at process start rather than per-call, since their text
//! never changes.

use crate::config::Config;
use crate::voice::tts::TtsBackend;
use std::path::{Path, PathBuf};

pub const SYSTEM_INSTRUCTIONS: &str = "You are a friendly phone check-in assistant. \
You are patient and speak in a natural, conversational tone. \
Your role is to check in on the caller and gently understand how they are doing. \
Replies must be three sentences or fewer. \
Do not use 'e.g.', lists, bullets, numbering, emoji, slang, or symbols like '*' or '-'. \
Write one short response only.";

pub const GREETING_TEXT: &str = "Hello! This is your check-in assistant calling. How are you doing today?";
pub const REMINDER_TEXT: &str = "Hello? Are you still there?";
pub const GOODBYE_TEXT: &str = "Goodbye.";

/// Paths to the three pre-synthesized prompt files, relative to a static
/// audio directory.
#[derive(Debug, Clone)]
pub struct StaticPrompts {
    pub greeting: PathBuf,
    pub reminder: PathBuf,
    pub goodbye: PathBuf,
}

impl StaticPrompts {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            greeting: dir.join("greeting.mp3"),
            reminder: dir.join("reminder.mp3"),
            goodbye: dir.join("goodbye.mp3"),
        }
    }
}

/// Synthesize any of the three static prompts that aren't already on disk.
/// Failure to synthesize one is logged and left for the caller to notice
/// later (a missing prompt file is simply skipped at playback time); this
/// must never be fatal to process startup.
pub async fn ensure_static_prompts(tts: &dyn TtsBackend, dir: impl AsRef<Path>) -> StaticPrompts {
    let dir = dir.as_ref();
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        tracing::warn!(error = %e, dir = %dir.display(), "failed to create static audio dir");
    }
    let prompts = StaticPrompts::new(dir);

    synthesize_if_missing(tts, &prompts.greeting, GREETING_TEXT).await;
    synthesize_if_missing(tts, &prompts.reminder, REMINDER_TEXT).await;
    synthesize_if_missing(tts, &prompts.goodbye, GOODBYE_TEXT).await;

    prompts
}

async fn synthesize_if_missing(tts: &dyn TtsBackend, path: &Path, text: &str) {
    if tokio::fs::metadata(path).await.is_ok() {
        return;
    }
    match tts.synthesize_file(text).await {
        Ok(bytes) => {
            if let Err(e) = tokio::fs::write(path, bytes).await {
                tracing::warn!(error = %e, path = %path.display(), "failed to write static prompt mp3");
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "failed to synthesize static prompt");
        }
    }
}

pub fn static_audio_dir(_cfg: &Config) -> PathBuf {
    PathBuf::from("audio_static")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VoiceError;
    use async_trait::async_trait;
    use tempfile::tempdir;
    use tokio::sync::mpsc;

    struct StubTts;
    #[async_trait]
    impl TtsBackend for StubTts {
        async fn synthesize_file(&self, _text: &str) -> Result<Vec<u8>, VoiceError> {
            Ok(vec![1, 2, 3])
        }
        async fn synthesize_stream(&self, _text: &str) -> Result<mpsc::Receiver<Vec<u8>>, VoiceError> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
    }

    #[tokio::test]
    async fn synthesizes_all_three_missing_prompts() {
        let dir = tempdir().unwrap();
        let prompts = ensure_static_prompts(&StubTts, dir.path()).await;
        assert!(tokio::fs::metadata(&prompts.greeting).await.is_ok());
        assert!(tokio::fs::metadata(&prompts.reminder).await.is_ok());
        assert!(tokio::fs::metadata(&prompts.goodbye).await.is_ok());
    }

    #[tokio::test]
    async fn does_not_resynthesize_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("greeting.mp3");
        tokio::fs::write(&path, b"already here").await.unwrap();
        ensure_static_prompts(&StubTts, dir.path()).await;
        let contents = tokio::fs::read(&path).await.unwrap();
        assert_eq!(contents, b"already here");
    }
}
