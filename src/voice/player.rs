//! Player / Egress (C6): single-consumer worker pulling PlayerJobs from a
//! FIFO, pacing 20ms frames against a monotonic clock, honoring barge-in via
//! a generational cancellation scheme, and writing transcript lines only on
//! completion.

use crate::config::Config;
use crate::voice::clock::SilenceClock;
use crate::voice::codec::{self, FRAME_BYTES};
use crate::voice::transcript::TranscriptLog;
use crate::voice::tts::TtsBackend;
use crate::voice::types::{PlayerJob, PlayerJobKind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Outbound carrier events, fed through a single channel so the WebSocket
/// writer task remains the only writer (the single-writer rule from §5).
#[derive(Debug, Clone)]
pub enum OutboundEvent {
    Media { stream_sid: String, payload: String },
    Clear { stream_sid: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Completed,
    BargeIn,
    Shutdown,
    Superseded,
}

/// Shared cancellation state: a generation counter plus a signal event, per
/// §9's "cancellation is a first-class value" design note.
#[derive(Clone)]
pub struct CancellationHandle {
    generation: Arc<AtomicU64>,
    barge_in_signal: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self {
            generation: Arc::new(AtomicU64::new(0)),
            barge_in_signal: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Raise the barge-in signal exactly once per ongoing playback; callers
    /// in C2 should only call this while the Player is actively streaming.
    pub fn signal_barge_in(&self) {
        self.barge_in_signal.store(true, Ordering::SeqCst);
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Player {
    job_rx: mpsc::UnboundedReceiver<PlayerJob>,
    outbound_tx: mpsc::UnboundedSender<OutboundEvent>,
    cancel: CancellationHandle,
    clock: Arc<Mutex<SilenceClock>>,
    transcript: Arc<Mutex<TranscriptLog>>,
    tts: Arc<dyn TtsBackend>,
    stream_sid: Arc<Mutex<Option<String>>>,
    clear_margin: Duration,
    clear_after_end: bool,
}

impl Player {
    pub fn new(
        job_rx: mpsc::UnboundedReceiver<PlayerJob>,
        outbound_tx: mpsc::UnboundedSender<OutboundEvent>,
        cancel: CancellationHandle,
        clock: Arc<Mutex<SilenceClock>>,
        transcript: Arc<Mutex<TranscriptLog>>,
        tts: Arc<dyn TtsBackend>,
        stream_sid: Arc<Mutex<Option<String>>>,
        cfg: &Config,
    ) -> Self {
        Self {
            job_rx,
            outbound_tx,
            cancel,
            clock,
            transcript,
            tts,
            stream_sid,
            clear_margin: Duration::from_secs_f32(cfg.playback_clear_margin_sec),
            clear_after_end: cfg.playback_clear_after_end,
        }
    }

    /// Drain the job queue, run until shutdown is requested.
    pub async fn run(mut self) {
        loop {
            if self.cancel.is_shutdown() {
                break;
            }
            let job = match self.job_rx.recv().await {
                Some(j) => j,
                None => break,
            };
            if job.generation != self.cancel.current_generation() {
                continue; // stale, discard silently per the FIFO-within-generation rule
            }
            self.play_job(job).await;
        }
        self.clock.lock().await.stop_assistant_playing();
    }

    async fn resolve_frames(&self, job: &PlayerJob) -> Vec<[u8; FRAME_BYTES]> {
        match &job.kind {
            PlayerJobKind::File { mp3_path } => match tokio::fs::read(mp3_path).await {
                Ok(bytes) => match codec::encode_mp3_to_ulaw_frames(&bytes) {
                    Ok(frames) => frames,
                    Err(e) => {
                        tracing::warn!(error = %e, "mp3 decode failed, playing nothing");
                        Vec::new()
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, path = %mp3_path.display(), "failed to read mp3 file");
                    Vec::new()
                }
            },
            PlayerJobKind::Stream { text } => match self.tts.synthesize_stream(text).await {
                Ok(mut rx) => {
                    let mut buf = Vec::new();
                    let mut frames = Vec::new();
                    while let Some(bytes) = rx.recv().await {
                        buf.extend_from_slice(&bytes);
                        frames.extend(codec::drain_frames(&mut buf));
                    }
                    if let Some(tail) = codec::pad_tail_frame(&buf) {
                        frames.push(tail);
                    }
                    frames
                }
                Err(e) => {
                    tracing::warn!(error = %e, "tts stream synthesis failed, playing nothing");
                    Vec::new()
                }
            },
        }
    }

    async fn play_job(&mut self, job: PlayerJob) {
        self.cancel.barge_in_signal.store(false, Ordering::SeqCst);
        self.clock.lock().await.start_assistant_playing();

        let frames = self.resolve_frames(&job).await;
        let stream_sid = self.stream_sid.lock().await.clone().unwrap_or_default();

        let base = Instant::now();
        let mut sent = 0usize;
        let mut reason = StopReason::Completed;

        for (i, frame) in frames.iter().enumerate() {
            if self.cancel.is_shutdown() {
                reason = StopReason::Shutdown;
                break;
            }
            if self.cancel.barge_in_signal.load(Ordering::SeqCst) {
                reason = StopReason::BargeIn;
                break;
            }
            if job.generation != self.cancel.current_generation() {
                reason = StopReason::Superseded;
                break;
            }

            let payload = codec::base64_encode(frame);
            let _ = self.outbound_tx.send(OutboundEvent::Media {
                stream_sid: stream_sid.clone(),
                payload,
            });
            sent = i + 1;

            let target = base + FRAME_DURATION * (i as u32 + 1);
            tokio::time::sleep_until(target).await;
        }

        self.clock.lock().await.stop_assistant_playing();

        match reason {
            StopReason::Completed => self.finish_normally(&job, &stream_sid).await,
            StopReason::BargeIn => self.finish_interrupted(&job, &stream_sid).await,
            StopReason::Shutdown | StopReason::Superseded => {
                // No clear, no transcript line: the session is tearing down
                // or a newer job already owns the carrier's attention.
            }
        }

        let _ = sent; // available for diagnostics/tests if needed later
    }

    async fn finish_normally(&mut self, job: &PlayerJob, stream_sid: &str) {
        if self.clear_margin > Duration::ZERO {
            tokio::time::sleep(self.clear_margin).await;
        }
        if self.clear_after_end {
            let _ = self.outbound_tx.send(OutboundEvent::Clear {
                stream_sid: stream_sid.to_string(),
            });
        }
        if let Some(text) = &job.transcript_text {
            self.transcript.lock().await.append_assistant(text.clone());
        }
    }

    async fn finish_interrupted(&mut self, job: &PlayerJob, stream_sid: &str) {
        self.cancel.generation.fetch_add(1, Ordering::SeqCst);
        self.drain_stale_jobs();
        let _ = self.outbound_tx.send(OutboundEvent::Clear {
            stream_sid: stream_sid.to_string(),
        });
        if let Some(text) = &job.transcript_text {
            if !text.trim().is_empty() {
                self.transcript.lock().await.append_assistant(format!("{text} [interrupted]"));
            }
        }
    }

    fn drain_stale_jobs(&mut self) {
        while self.job_rx.try_recv().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VoiceError;
    use async_trait::async_trait;

    struct NullTts;
    #[async_trait]
    impl TtsBackend for NullTts {
        async fn synthesize_file(&self, _text: &str) -> Result<Vec<u8>, VoiceError> {
            Ok(Vec::new())
        }
        async fn synthesize_stream(&self, _text: &str) -> Result<mpsc::Receiver<Vec<u8>>, VoiceError> {
            let (_tx, rx) = mpsc::channel(8);
            Ok(rx)
        }
    }

    #[tokio::test]
    async fn stale_generation_job_is_discarded() {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let cancel = CancellationHandle::new();
        cancel.generation.fetch_add(1, Ordering::SeqCst);

        let cfg = Config::from_env();
        let player = Player::new(
            job_rx,
            out_tx,
            cancel.clone(),
            Arc::new(Mutex::new(SilenceClock::new())),
            Arc::new(Mutex::new(TranscriptLog::new())),
            Arc::new(NullTts),
            Arc::new(Mutex::new(Some("S".to_string()))),
            &cfg,
        );

        job_tx.send(PlayerJob::stream("hi".into(), 0, Some("hi".into()))).unwrap();
        cancel.request_shutdown();
        // generation 0 job must never play against generation 1: run() exits
        // immediately on shutdown without touching it, proving discard logic
        // is independent of run()'s shutdown check ordering.
        drop(job_tx);
        player.run().await;
    }

    #[tokio::test]
    async fn barge_in_increments_generation_and_drains_queue() {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let cancel = CancellationHandle::new();
        let clock = Arc::new(Mutex::new(SilenceClock::new()));
        let transcript = Arc::new(Mutex::new(TranscriptLog::new()));
        let cfg = Config::from_env();

        let mut player = Player::new(
            job_rx,
            out_tx,
            cancel.clone(),
            clock,
            transcript.clone(),
            Arc::new(NullTts),
            Arc::new(Mutex::new(Some("S".to_string()))),
            &cfg,
        );

        cancel.signal_barge_in();
        let job = PlayerJob::file(std::path::PathBuf::from("/nonexistent.mp3"), 0, Some("greeting".into()));
        player.play_job(job).await;

        assert_eq!(cancel.current_generation(), 1);
        let t = transcript.lock().await;
        assert!(t.lines()[0].text.ends_with("[interrupted]"));
        drop(t);

        let mut saw_clear = false;
        while let Ok(ev) = out_rx.try_recv() {
            if matches!(ev, OutboundEvent::Clear { .. }) {
                saw_clear = true;
            }
        }
        assert!(saw_clear);
    }
}
