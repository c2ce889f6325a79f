//! Error taxonomy for the voice bridge.
//!
//! Matches the call's own error handling policy: transient network errors to
//! ASR/LLM/TTS are retried where specified, everything else surfaces as a
//! logged warning and the subsystem continues without tearing the call down.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VoiceError {
    /// ASR/LLM/TTS 5xx or timeout. Retried where the component specifies a
    /// retry policy (currently: LLM only).
    #[error("transient upstream error: {0}")]
    Transient(String),

    /// ASR/LLM/TTS 4xx or other non-retryable client error.
    #[error("permanent client error: {0}")]
    PermanentClient(String),

    /// Bad MP3, malformed frame, or otherwise unparsable audio.
    #[error("decoder error: {0}")]
    Decoder(String),

    /// Unknown carrier event, or the WebSocket closed unexpectedly.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Bug or invariant violation; should never reach a caller in practice.
    #[error("internal error: {0}")]
    Internal(String),
}

impl VoiceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, VoiceError::Transient(_))
    }
}
