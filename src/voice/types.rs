//! Data model shared across the pipeline: AudioChunk, PhraseObject,
//! ConversationHistory, PlayerJob, TranscriptLine.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// One VAD-bounded speech segment, contiguous in time, belonging to a phrase.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub phrase_id: String,
    pub chunk_index: u32,
    /// Linear PCM16 @ 8 kHz, mono.
    pub audio_bytes: Vec<u8>,
    pub rms: f32,
    pub timestamp_sec: f32,
    pub duration_sec: f32,
    pub transcription: String,
    pub is_transcribed: bool,
    pub capture_state: CaptureState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Listening,
    Speaking,
}

impl AudioChunk {
    pub fn new(
        phrase_id: String,
        chunk_index: u32,
        audio_bytes: Vec<u8>,
        rms: f32,
        timestamp_sec: f32,
    ) -> Self {
        let duration_sec = audio_bytes.len() as f32 / (8000.0 * 2.0);
        Self {
            phrase_id,
            chunk_index,
            audio_bytes,
            rms,
            timestamp_sec,
            duration_sec,
            transcription: String::new(),
            is_transcribed: false,
            capture_state: CaptureState::Speaking,
        }
    }
}

/// One caller utterance, made of one or more chunks.
#[derive(Debug, Clone, Default)]
pub struct PhraseObject {
    pub phrase_id: String,
    pub chunks: Vec<AudioChunk>,
    pub is_done: bool,
}

impl PhraseObject {
    pub fn new(phrase_id: String) -> Self {
        Self {
            phrase_id,
            chunks: Vec::new(),
            is_done: false,
        }
    }

    /// True once every chunk has been transcribed, empty transcripts included.
    pub fn is_complete(&self) -> bool {
        !self.chunks.is_empty() && self.chunks.iter().all(|c| c.is_transcribed)
    }

    /// Chunks joined in index order, skipping empty transcripts.
    pub fn phrase_text(&self) -> String {
        let mut ordered: Vec<&AudioChunk> = self.chunks.iter().collect();
        ordered.sort_by_key(|c| c.chunk_index);
        ordered
            .into_iter()
            .map(|c| c.transcription.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
}

/// Rolling conversation history. Element 0 is always the immutable system
/// message; after every turn the tail is trimmed to the last 2*max_turns
/// role messages.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    messages: Vec<HistoryMessage>,
    max_turns: usize,
}

impl ConversationHistory {
    pub fn new(system_prompt: impl Into<String>, max_turns: usize) -> Self {
        Self {
            messages: vec![HistoryMessage {
                role: Role::System,
                content: system_prompt.into(),
            }],
            max_turns,
        }
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(HistoryMessage {
            role,
            content: content.into(),
        });
        self.trim();
    }

    fn trim(&mut self) {
        if self.messages.is_empty() {
            return;
        }
        let system = self.messages[0].clone();
        let keep = 2 * self.max_turns;
        let tail: Vec<HistoryMessage> = if self.messages.len() > 1 {
            let start = self.messages.len().saturating_sub(keep);
            self.messages[start.max(1)..].to_vec()
        } else {
            Vec::new()
        };
        self.messages = std::iter::once(system).chain(tail).collect();
    }

    pub fn as_slice(&self) -> &[HistoryMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// What the Player should stream: a pre-rendered file, or a live TTS stream.
#[derive(Debug, Clone)]
pub enum PlayerJobKind {
    File { mp3_path: std::path::PathBuf },
    Stream { text: String },
}

/// One queued reply, tagged with the generation it was enqueued under so a
/// barge-in can invalidate every job enqueued before it.
#[derive(Debug, Clone)]
pub struct PlayerJob {
    pub kind: PlayerJobKind,
    pub generation: u64,
    pub transcript_text: Option<String>,
}

impl PlayerJob {
    pub fn file(mp3_path: std::path::PathBuf, generation: u64, transcript_text: Option<String>) -> Self {
        Self {
            kind: PlayerJobKind::File { mp3_path },
            generation,
            transcript_text,
        }
    }

    pub fn stream(text: String, generation: u64, transcript_text: Option<String>) -> Self {
        Self {
            kind: PlayerJobKind::Stream { text },
            generation,
            transcript_text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptRole {
    Caller,
    Assistant,
}

impl TranscriptRole {
    fn as_str(&self) -> &'static str {
        match self {
            TranscriptRole::Caller => "Caller",
            TranscriptRole::Assistant => "Assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranscriptLine {
    pub timestamp: DateTime<Local>,
    pub role: TranscriptRole,
    pub text: String,
}

impl TranscriptLine {
    pub fn format(&self) -> String {
        format!(
            "[{}] {}: {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.role.as_str(),
            self.text
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(idx: u32, transcription: &str, transcribed: bool) -> AudioChunk {
        let mut c = AudioChunk::new("p1".into(), idx, vec![0u8; 16000], 800.0, idx as f32 * 0.02);
        c.transcription = transcription.to_string();
        c.is_transcribed = transcribed;
        c
    }

    #[test]
    fn phrase_text_skips_empty_and_orders_by_index() {
        let mut phrase = PhraseObject::new("p1".into());
        phrase.chunks.push(chunk(2, "yes", true));
        phrase.chunks.push(chunk(0, "", true));
        phrase.chunks.push(chunk(1, "and", true));
        assert!(phrase.is_complete());
        assert_eq!(phrase.phrase_text(), "and yes");
    }

    #[test]
    fn phrase_not_complete_until_every_chunk_transcribed() {
        let mut phrase = PhraseObject::new("p1".into());
        phrase.chunks.push(chunk(0, "hi", true));
        phrase.chunks.push(chunk(1, "", false));
        assert!(!phrase.is_complete());
    }

    #[test]
    fn history_trim_keeps_system_plus_last_n_turns() {
        let mut hist = ConversationHistory::new("be nice", 2);
        for i in 0..5 {
            hist.push(Role::User, format!("u{i}"));
            hist.push(Role::Assistant, format!("a{i}"));
        }
        assert_eq!(hist.len(), 1 + 2 * 2);
        assert_eq!(hist.as_slice()[0].role, Role::System);
    }
}
