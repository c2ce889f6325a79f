//! VAD & Phrase Segmenter (C2): turns a stream of 20ms μ-law frames into
//! AudioChunk emissions, scoped to phrases, plus a separate barge-in signal
//! usable while the Player is active.

use crate::config::VadConfig;
use crate::voice::codec::{calculate_rms_pcm, ulaw_to_pcm};
use crate::voice::types::AudioChunk;
use std::collections::VecDeque;
use uuid::Uuid;

const FRAME_DURATION_SEC: f32 = 0.02;
const BYTES_PER_SAMPLE: usize = 2;
const SAMPLE_RATE: usize = 8000;

/// What the segmenter produced for a single incoming frame.
#[derive(Debug, Default)]
pub struct FrameOutcome {
    pub chunk: Option<AudioChunk>,
    pub phrase_ended: bool,
}

pub struct VadSegmenter {
    cfg: VadConfig,
    phrase_id: String,
    chunk_index: u32,
    active_pcm: Vec<u8>,
    pre_roll: VecDeque<u8>,
    pre_roll_cap: usize,
    silence_frames: u32,
    phrase_silence_frames: u32,
    in_chunk: bool,
    has_spoken: bool,
    frame_counter: u64,

    // barge-in tracking, only meaningful while caller is told the player is active
    barge_in_consec: u32,
    barge_in_signaled: bool,
}

impl VadSegmenter {
    pub fn new(cfg: VadConfig) -> Self {
        let pre_roll_cap = (cfg.lead_in_sec * SAMPLE_RATE as f32) as usize * BYTES_PER_SAMPLE;
        Self {
            cfg,
            phrase_id: Uuid::new_v4().to_string(),
            chunk_index: 0,
            active_pcm: Vec::new(),
            pre_roll: VecDeque::with_capacity(pre_roll_cap),
            pre_roll_cap,
            silence_frames: 0,
            phrase_silence_frames: 0,
            in_chunk: false,
            has_spoken: false,
            frame_counter: 0,
            barge_in_consec: 0,
            barge_in_signaled: false,
        }
    }

    pub fn current_phrase_id(&self) -> &str {
        &self.phrase_id
    }

    fn silence_chunk_limit(&self) -> u32 {
        (self.cfg.chunk_silence_sec / FRAME_DURATION_SEC) as u32
    }
    fn done_speaking_limit(&self) -> u32 {
        (self.cfg.done_speaking_silence_sec / FRAME_DURATION_SEC) as u32
    }
    fn min_chunk_bytes(&self) -> usize {
        (self.cfg.min_chunk_sec * SAMPLE_RATE as f32) as usize * BYTES_PER_SAMPLE
    }
    fn max_chunk_bytes(&self) -> usize {
        (self.cfg.max_chunk_sec * SAMPLE_RATE as f32) as usize * BYTES_PER_SAMPLE
    }

    fn push_pre_roll(&mut self, pcm: &[u8]) {
        for &b in pcm {
            if self.pre_roll.len() >= self.pre_roll_cap && self.pre_roll_cap > 0 {
                self.pre_roll.pop_front();
            }
            self.pre_roll.push_back(b);
        }
    }

    /// Process one 20ms μ-law frame. Returns any emitted AudioChunk and
    /// whether this frame marked the end of a phrase with no new chunk.
    pub fn process_frame(&mut self, ulaw_frame: &[u8]) -> FrameOutcome {
        let pcm = ulaw_to_pcm(ulaw_frame);
        let rms = calculate_rms_pcm(&pcm);
        let mut outcome = FrameOutcome::default();

        self.push_pre_roll(&pcm);

        if !self.in_chunk && rms >= self.cfg.min_rms {
            if self.has_spoken && self.phrase_silence_frames >= self.done_speaking_limit() {
                self.phrase_id = Uuid::new_v4().to_string();
            }
            self.has_spoken = true;
            self.in_chunk = true;
            self.silence_frames = 0;
            self.phrase_silence_frames = 0;
            self.active_pcm.clear();
            self.active_pcm.extend(self.pre_roll.iter().copied());
            self.pre_roll.clear();
        }

        if self.in_chunk {
            self.active_pcm.extend_from_slice(&pcm);

            if rms < self.cfg.min_rms {
                self.silence_frames += 1;
                self.phrase_silence_frames += 1;
            } else {
                self.silence_frames = 0;
                self.phrase_silence_frames = 0;
            }

            let trailing_silence_done = self.silence_frames >= self.silence_chunk_limit();
            let forced_cut = self.active_pcm.len() >= self.max_chunk_bytes();

            if (trailing_silence_done && self.active_pcm.len() >= self.min_chunk_bytes()) || forced_cut {
                let chunk = AudioChunk::new(
                    self.phrase_id.clone(),
                    self.chunk_index,
                    std::mem::take(&mut self.active_pcm),
                    rms,
                    self.frame_counter as f32 * FRAME_DURATION_SEC,
                );
                self.chunk_index += 1;
                self.in_chunk = false;
                self.silence_frames = 0;
                outcome.chunk = Some(chunk);
            }
        } else if rms < self.cfg.min_rms {
            self.phrase_silence_frames += 1;
            if self.phrase_silence_frames == self.done_speaking_limit() && self.has_spoken {
                self.has_spoken = false;
                self.phrase_id = Uuid::new_v4().to_string();
                outcome.phrase_ended = true;
            }
        }

        self.frame_counter += 1;
        outcome
    }

    /// Reset VAD state after a barge-in so the caller's next speech starts a
    /// fresh phrase rather than continuing the interrupted one.
    pub fn reset_for_barge_in(&mut self) {
        self.phrase_id = Uuid::new_v4().to_string();
        self.chunk_index = 0;
        self.active_pcm.clear();
        self.pre_roll.clear();
        self.silence_frames = 0;
        self.phrase_silence_frames = 0;
        self.in_chunk = false;
        self.has_spoken = false;
        self.barge_in_consec = 0;
        self.barge_in_signaled = false;
    }

    /// Feed one frame's RMS through the barge-in detector. Only call this
    /// while the Player is actively streaming. Returns true exactly once per
    /// ongoing playback, the instant the threshold is crossed.
    pub fn check_barge_in(&mut self, ulaw_frame: &[u8]) -> bool {
        let pcm = ulaw_to_pcm(ulaw_frame);
        let rms = calculate_rms_pcm(&pcm);
        let threshold = self.cfg.min_rms * self.cfg.barge_in_multiplier;
        if rms >= threshold {
            self.barge_in_consec += 1;
        } else {
            self.barge_in_consec = 0;
        }
        if !self.barge_in_signaled && self.barge_in_consec >= self.cfg.barge_in_consec_frames {
            self.barge_in_signaled = true;
            return true;
        }
        false
    }

    pub fn clear_barge_in_signal(&mut self) {
        self.barge_in_consec = 0;
        self.barge_in_signaled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::codec::pcm_to_ulaw;

    fn loud_frame() -> Vec<u8> {
        let mut pcm = Vec::new();
        for i in 0..160 {
            let v = if i % 2 == 0 { 16000i16 } else { -16000i16 };
            pcm.extend_from_slice(&v.to_le_bytes());
        }
        pcm_to_ulaw(&pcm)
    }

    fn silence_frame() -> Vec<u8> {
        vec![0xFFu8; 160]
    }

    #[test]
    fn emits_chunk_after_min_duration_and_trailing_silence() {
        let mut cfg = VadConfig::default();
        cfg.min_chunk_sec = 0.1;
        cfg.chunk_silence_sec = 0.1;
        let mut vad = VadSegmenter::new(cfg);

        let mut emitted = None;
        for _ in 0..10 {
            let out = vad.process_frame(&loud_frame());
            if out.chunk.is_some() {
                emitted = out.chunk;
            }
        }
        for _ in 0..10 {
            let out = vad.process_frame(&silence_frame());
            if out.chunk.is_some() {
                emitted = out.chunk;
            }
        }
        assert!(emitted.is_some());
    }

    #[test]
    fn silence_only_never_emits_a_chunk() {
        let mut vad = VadSegmenter::new(VadConfig::default());
        for _ in 0..200 {
            let out = vad.process_frame(&silence_frame());
            assert!(out.chunk.is_none());
        }
    }

    #[test]
    fn barge_in_fires_once_after_consecutive_loud_frames() {
        let cfg = VadConfig::default();
        let mut vad = VadSegmenter::new(cfg);
        let mut fired = 0;
        for _ in 0..5 {
            if vad.check_barge_in(&loud_frame()) {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
    }
}
