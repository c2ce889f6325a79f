//! Process configuration, loaded once from the environment.
//!
//! Secrets (API keys, phone numbers, tokens, the public base URL) live only
//! in environment variables and never appear as code constants. Every other
//! tunable has a literal default matching the recognized-options table.

use serde::{Deserialize, Serialize};
use std::env;

fn env_f32(key: &str, default: f32) -> f32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(default)
}

/// ASR/LLM/TTS backend strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    CloudApi,
    LocalModel,
}

impl Strategy {
    fn from_env(key: &str, default: Strategy) -> Self {
        match env::var(key).ok().as_deref() {
            Some("local_model") | Some("local") => Strategy::LocalModel,
            Some("cloud_api") | Some("cloud") => Strategy::CloudApi,
            _ => default,
        }
    }
}

/// VAD / phrase segmentation tuning, mirroring §6's environment table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    pub min_rms: f32,
    pub barge_in_multiplier: f32,
    pub barge_in_consec_frames: u32,
    pub chunk_silence_sec: f32,
    pub done_speaking_silence_sec: f32,
    pub min_chunk_sec: f32,
    pub max_chunk_sec: f32,
    pub lead_in_sec: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            min_rms: env_f32("MIN_SPEECH_RMS_THRESHOLD", 750.0),
            barge_in_multiplier: env_f32("BARGE_IN_MULTIPLIER", 1.25),
            barge_in_consec_frames: env_u32("BARGE_IN_CONSEC_FRAMES", 2),
            chunk_silence_sec: env_f32("CHUNK_SILENCE_DURATION_SECONDS", 0.55),
            done_speaking_silence_sec: env_f32("DONE_SPEAKING_SILENCE_DURATION_SECONDS", 1.2),
            min_chunk_sec: env_f32("MINCHUNK_DURATION_SECONDS", 0.9),
            max_chunk_sec: env_f32("MAXCHUNK_DURATION_SECONDS", 10.0),
            lead_in_sec: env_f32("LEAD_IN_DURATION_SECONDS", 0.35),
        }
    }
}

/// Top-level process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub vad: VadConfig,

    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    #[serde(default = "default_playback_clear_margin")]
    pub playback_clear_margin_sec: f32,

    #[serde(default = "default_true")]
    pub playback_clear_after_end: bool,

    #[serde(default)]
    pub eleven_streaming: bool,

    #[serde(default = "default_max_silence")]
    pub max_silence_sec: f32,

    #[serde(default = "default_reminder_sec")]
    pub reminder_sec: f32,

    #[serde(default)]
    pub store_all_response_audio: bool,

    #[serde(default = "default_asr_strategy")]
    pub asr_strategy: Strategy,

    #[serde(default = "default_llm_strategy")]
    pub llm_strategy: Strategy,

    #[serde(default = "default_tts_strategy")]
    pub tts_strategy: Strategy,

    #[serde(skip)]
    pub openai_api_key: String,
    #[serde(skip)]
    pub elevenlabs_api_key: String,
    #[serde(skip)]
    pub llm_model: String,
    #[serde(skip)]
    pub local_llm_url: String,
    #[serde(skip)]
    pub call_trigger_token: String,
    #[serde(skip)]
    pub public_base_url: String,
    #[serde(skip)]
    pub mom_phone_number: String,
    #[serde(skip)]
    pub twilio_account_sid: String,
    #[serde(skip)]
    pub twilio_auth_token: String,
    #[serde(skip)]
    pub twilio_from_number: String,
    #[serde(skip)]
    pub transcript_path: String,
}

fn default_max_turns() -> usize {
    2
}
fn default_playback_clear_margin() -> f32 {
    0.25
}
fn default_true() -> bool {
    true
}
fn default_max_silence() -> f32 {
    30.0
}
fn default_reminder_sec() -> f32 {
    10.0
}
fn default_asr_strategy() -> Strategy {
    Strategy::CloudApi
}
fn default_llm_strategy() -> Strategy {
    Strategy::LocalModel
}
fn default_tts_strategy() -> Strategy {
    Strategy::CloudApi
}

impl Config {
    /// Build configuration from the process environment. Never panics; every
    /// field has a literal fallback.
    pub fn from_env() -> Self {
        Self {
            vad: VadConfig::default(),
            max_turns: env::var("MAX_TURNS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_max_turns),
            playback_clear_margin_sec: env_f32("PLAYBACK_CLEAR_MARGIN", default_playback_clear_margin()),
            playback_clear_after_end: env_bool("PLAYBACK_CLEAR_AFTER_END", true),
            eleven_streaming: env_bool("ELEVEN_STREAMING", false),
            max_silence_sec: env_f32("MAX_SILENCE_SECONDS", default_max_silence()),
            reminder_sec: env_f32("REMINDER_SECONDS", default_reminder_sec()),
            store_all_response_audio: env_bool("STORE_ALL_RESPONSE_AUDIO", false),
            asr_strategy: Strategy::from_env("ASR_STRATEGY", default_asr_strategy()),
            llm_strategy: Strategy::from_env("LLM_STRATEGY", default_llm_strategy()),
            tts_strategy: Strategy::from_env("TTS_STRATEGY", default_tts_strategy()),
            openai_api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            elevenlabs_api_key: env::var("ELEVENLABS_API_KEY").unwrap_or_default(),
            llm_model: env::var("LLM_MODEL").unwrap_or_else(|_| "gemma3:1b".to_string()),
            local_llm_url: env::var("LOCAL_LLM_URL")
                .unwrap_or_else(|_| "http://localhost:11434/api/generate".to_string()),
            call_trigger_token: env::var("CALL_TRIGGER_TOKEN").unwrap_or_default(),
            public_base_url: env::var("PUBLIC_BASE_URL").unwrap_or_default(),
            mom_phone_number: env::var("MOM_PHONE_NUMBER").unwrap_or_default(),
            twilio_account_sid: env::var("TWILIO_ACCOUNT_SID").unwrap_or_default(),
            twilio_auth_token: env::var("TWILIO_AUTH_TOKEN").unwrap_or_default(),
            twilio_from_number: env::var("TWILIO_FROM_NUMBER").unwrap_or_default(),
            transcript_path: env::var("TRANSCRIPT_PATH").unwrap_or_else(|_| "transcript.txt".to_string()),
        }
    }

    /// Silence the caller cannot hear MAX_SILENCE_SECONDS disables the watchdog entirely.
    pub fn silence_watchdog_enabled(&self) -> bool {
        self.max_silence_sec > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        // SAFETY: tests run single-threaded within this module; no other test
        // in the suite mutates this specific set of env vars concurrently.
        for key in [
            "MAX_TURNS",
            "MIN_SPEECH_RMS_THRESHOLD",
            "MAX_SILENCE_SECONDS",
            "PLAYBACK_CLEAR_MARGIN",
        ] {
            env::remove_var(key);
        }
        let cfg = Config::from_env();
        assert_eq!(cfg.max_turns, 2);
        assert_eq!(cfg.vad.min_rms, 750.0);
        assert_eq!(cfg.max_silence_sec, 30.0);
        assert_eq!(cfg.playback_clear_margin_sec, 0.25);
    }

    #[test]
    fn vad_config_reads_overrides() {
        env::set_var("MIN_SPEECH_RMS_THRESHOLD", "400");
        let vad = VadConfig::default();
        assert_eq!(vad.min_rms, 400.0);
        env::remove_var("MIN_SPEECH_RMS_THRESHOLD");
    }
}
