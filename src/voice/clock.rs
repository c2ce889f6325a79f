//! Silence / Playback Clock (C8): effective-silence accounting that excludes
//! time the agent itself spent playing audio.

use tokio::time::Instant;

pub struct SilenceClock {
    last_speech: Instant,
    assistant_playing: bool,
    pause_accumulator: std::time::Duration,
    pause_start: Option<Instant>,
}

impl SilenceClock {
    pub fn new() -> Self {
        Self {
            last_speech: Instant::now(),
            assistant_playing: false,
            pause_accumulator: std::time::Duration::ZERO,
            pause_start: None,
        }
    }

    /// Caller spoke: reset the silence clock and the playback-pause window.
    pub fn mark_speech(&mut self) {
        self.last_speech = Instant::now();
        self.pause_accumulator = std::time::Duration::ZERO;
        self.pause_start = if self.assistant_playing {
            Some(Instant::now())
        } else {
            None
        };
    }

    pub fn start_assistant_playing(&mut self) {
        if !self.assistant_playing {
            self.assistant_playing = true;
            self.pause_start = Some(Instant::now());
        }
    }

    pub fn is_assistant_playing(&self) -> bool {
        self.assistant_playing
    }

    pub fn stop_assistant_playing(&mut self) {
        if self.assistant_playing {
            if let Some(start) = self.pause_start.take() {
                self.pause_accumulator += start.elapsed();
            }
            self.assistant_playing = false;
        }
    }

    /// Total assistant playback time since the last caller speech, including
    /// any interval currently in progress.
    pub fn pause_since_reset(&self) -> std::time::Duration {
        let mut total = self.pause_accumulator;
        if self.assistant_playing {
            if let Some(start) = self.pause_start {
                total += start.elapsed();
            }
        }
        total
    }

    /// Wall-clock silence since the caller last spoke, minus time the agent
    /// itself was playing audio during that window.
    pub fn effective_silence(&self) -> std::time::Duration {
        self.last_speech.elapsed().saturating_sub(self.pause_since_reset())
    }
}

impl Default for SilenceClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn assistant_playback_does_not_advance_effective_silence() {
        let mut clock = SilenceClock::new();
        clock.mark_speech();

        clock.start_assistant_playing();
        tokio::time::advance(Duration::from_secs(3)).await;
        clock.stop_assistant_playing();

        assert!(clock.effective_silence() < Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn silence_without_playback_advances_normally() {
        let mut clock = SilenceClock::new();
        clock.mark_speech();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(clock.effective_silence() >= Duration::from_secs(2));
    }
}
