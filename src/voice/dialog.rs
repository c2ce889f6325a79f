//! Dialog Manager (C5): rolling history, LLM call with retry, reply
//! post-processing, TTS synthesis for the file-backed path, and PlayerJob
//! enqueue.

use crate::config::Config;
use crate::voice::llm::{LlmBackend, LLM_FAILURE_PLACEHOLDER};
use crate::voice::transcript::TranscriptLog;
use crate::voice::tts::TtsBackend;
use crate::voice::types::{ConversationHistory, PhraseObject, PlayerJob, Role};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

static LIST_MARKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*(?:[*\-•]|\d+\.)\s+").unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static SENTENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^.!?]+[.!?]+").unwrap());
static DECORATIVE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[`*_#~]").unwrap());

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences: Vec<String> = SENTENCE_RE
        .find_iter(text)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if sentences.is_empty() && !text.trim().is_empty() {
        sentences.push(text.trim().to_string());
    }
    sentences
}

/// Strip list markers, decorative glyphs, normalize "e.g.", collapse
/// whitespace, and truncate to at most three sentences. Idempotent: running
/// this twice produces the same output as running it once.
pub fn normalize_reply(text: &str) -> String {
    let stripped = LIST_MARKER_RE.replace_all(text, "");
    let no_decoration = DECORATIVE_RE.replace_all(&stripped, "");
    let substituted = no_decoration.replace("e.g.", "for example").replace("E.g.", "For example");
    let collapsed = WHITESPACE_RE.replace_all(substituted.trim(), " ").to_string();

    split_sentences(collapsed.trim()).into_iter().take(3).collect::<Vec<_>>().join(" ")
}

pub struct DialogManager {
    history: ConversationHistory,
    llm: Box<dyn LlmBackend>,
    tts: Box<dyn TtsBackend>,
    max_turns: usize,
    eleven_streaming: bool,
    audio_temp_dir: PathBuf,
}

pub struct DialogOutcome {
    pub reply_text: String,
    pub job: Option<PlayerJob>,
}

impl DialogManager {
    pub fn new(
        system_prompt: impl Into<String>,
        llm: Box<dyn LlmBackend>,
        tts: Box<dyn TtsBackend>,
        cfg: &Config,
    ) -> Self {
        Self {
            history: ConversationHistory::new(system_prompt, cfg.max_turns),
            llm,
            tts,
            max_turns: cfg.max_turns,
            eleven_streaming: cfg.eleven_streaming,
            audio_temp_dir: PathBuf::from("audio_temp"),
        }
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Handle one completed phrase hand-off: write the Caller transcript
    /// line, call the LLM, post-process the reply, update history, and
    /// produce a PlayerJob for the reply (or None if the LLM or TTS
    /// synthesis failed, in which case no assistant audio is enqueued).
    ///
    /// Takes the transcript log behind a shared lock rather than `&mut` so
    /// the lock is only held for the caller-line append, not across the LLM
    /// and TTS network calls that follow.
    pub async fn handle_phrase(
        &mut self,
        phrase: &PhraseObject,
        generation: u64,
        transcript: &Arc<Mutex<TranscriptLog>>,
    ) -> DialogOutcome {
        let user_text = phrase.phrase_text();
        transcript.lock().await.append_caller(&user_text);
        self.history.push(Role::User, user_text);

        let raw_reply = match self.llm.complete(&self.history).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "llm call failed after retries, skipping playback");
                self.history.push(Role::Assistant, LLM_FAILURE_PLACEHOLDER);
                return DialogOutcome {
                    reply_text: LLM_FAILURE_PLACEHOLDER.to_string(),
                    job: None,
                };
            }
        };

        let reply = normalize_reply(&raw_reply);
        self.history.push(Role::Assistant, reply.clone());
        let job = self.build_job(&reply, generation).await;
        DialogOutcome { reply_text: reply, job }
    }

    async fn build_job(&self, reply: &str, generation: u64) -> Option<PlayerJob> {
        if self.eleven_streaming {
            return Some(PlayerJob::stream(reply.to_string(), generation, Some(reply.to_string())));
        }

        match self.tts.synthesize_file(reply).await {
            Ok(mp3_bytes) => {
                let path = self
                    .audio_temp_dir
                    .join(format!("llm_response__{}.mp3", Uuid::new_v4().simple()));
                if let Some(parent) = path.parent() {
                    if let Err(e) = tokio::fs::create_dir_all(parent).await {
                        tracing::warn!(error = %e, "failed to create audio temp dir, skipping playback");
                        return None;
                    }
                }
                if let Err(e) = tokio::fs::write(&path, mp3_bytes).await {
                    tracing::warn!(error = %e, "failed to write synthesized mp3, skipping playback");
                    return None;
                }
                Some(PlayerJob::file(path, generation, Some(reply.to_string())))
            }
            Err(e) => {
                tracing::warn!(error = %e, "tts synthesis failed, skipping playback enqueue");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VoiceError;
    use crate::voice::types::AudioChunk;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct StubLlm(String);
    #[async_trait]
    impl LlmBackend for StubLlm {
        async fn complete(&self, _history: &ConversationHistory) -> Result<String, VoiceError> {
            Ok(self.0.clone())
        }
    }

    struct FailingLlm;
    #[async_trait]
    impl LlmBackend for FailingLlm {
        async fn complete(&self, _history: &ConversationHistory) -> Result<String, VoiceError> {
            Err(VoiceError::Transient("down".into()))
        }
    }

    struct StubTts;
    #[async_trait]
    impl TtsBackend for StubTts {
        async fn synthesize_file(&self, _text: &str) -> Result<Vec<u8>, VoiceError> {
            Ok(vec![0u8; 16])
        }
        async fn synthesize_stream(&self, _text: &str) -> Result<mpsc::Receiver<Vec<u8>>, VoiceError> {
            let (_tx, rx) = mpsc::channel(8);
            Ok(rx)
        }
    }

    struct FailingTts;
    #[async_trait]
    impl TtsBackend for FailingTts {
        async fn synthesize_file(&self, _text: &str) -> Result<Vec<u8>, VoiceError> {
            Err(VoiceError::Transient("tts down".into()))
        }
        async fn synthesize_stream(&self, _text: &str) -> Result<mpsc::Receiver<Vec<u8>>, VoiceError> {
            let (_tx, rx) = mpsc::channel(8);
            Ok(rx)
        }
    }

    fn phrase_with_text(text: &str) -> PhraseObject {
        let mut phrase = PhraseObject::new("p1".into());
        let mut chunk = AudioChunk::new("p1".into(), 0, vec![], 800.0, 0.0);
        chunk.transcription = text.to_string();
        chunk.is_transcribed = true;
        phrase.chunks.push(chunk);
        phrase
    }

    #[test]
    fn normalize_strips_markers_and_truncates() {
        let input = "- Hi there!\n* This is great. e.g. wow! This. That. Another.";
        let out = normalize_reply(input);
        assert!(!out.contains('-'));
        assert!(!out.contains('*'));
        assert!(!out.contains("e.g."));
        assert!(out.contains("for example"));
        assert!(out.split_terminator(['.', '!', '?']).filter(|s| !s.trim().is_empty()).count() <= 3);
    }

    #[test]
    fn normalize_is_idempotent() {
        let input = "* Hello there. e.g. stuff. More. Even more. Too much.";
        let once = normalize_reply(input);
        let twice = normalize_reply(&once);
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn successful_reply_enqueues_a_job_and_writes_caller_line() {
        let cfg = Config::from_env();
        let mut mgr = DialogManager::new("be nice", Box::new(StubLlm("Hello! How are you?".into())), Box::new(StubTts), &cfg);
        let transcript = Arc::new(Mutex::new(TranscriptLog::new()));
        let outcome = mgr.handle_phrase(&phrase_with_text("hi"), 0, &transcript).await;
        assert!(outcome.job.is_some());
        assert_eq!(transcript.lock().await.lines().len(), 1);
    }

    #[tokio::test]
    async fn failed_llm_call_does_not_enqueue_playback() {
        let cfg = Config::from_env();
        let mut mgr = DialogManager::new("be nice", Box::new(FailingLlm), Box::new(StubTts), &cfg);
        let transcript = Arc::new(Mutex::new(TranscriptLog::new()));
        let outcome = mgr.handle_phrase(&phrase_with_text("hi"), 0, &transcript).await;
        assert!(outcome.job.is_none());
        assert_eq!(outcome.reply_text, LLM_FAILURE_PLACEHOLDER);
    }

    #[tokio::test]
    async fn failed_tts_synthesis_does_not_enqueue_playback() {
        let cfg = Config::from_env();
        let mut mgr = DialogManager::new("be nice", Box::new(StubLlm("hi there".into())), Box::new(FailingTts), &cfg);
        let transcript = Arc::new(Mutex::new(TranscriptLog::new()));
        let outcome = mgr.handle_phrase(&phrase_with_text("hi"), 0, &transcript).await;
        assert!(outcome.job.is_none());
    }
}
