//! Session Controller (C7): owns one call's websocket, demuxes carrier
//! events, wires the VAD/ASR/Dialog/Player pipeline together, and runs the
//! silence watchdog.

use crate::config::Config;
use crate::voice::clock::SilenceClock;
use crate::voice::codec;
use crate::voice::dialog::DialogManager;
use crate::voice::phrase::PhraseAssembler;
use crate::voice::player::{CancellationHandle, OutboundEvent, Player};
use crate::voice::prompts::{self, StaticPrompts};
use crate::voice::transcript::TranscriptLog;
use crate::voice::types::PlayerJob;
use crate::voice::vad::VadSegmenter;
use crate::voice::{asr, llm, tts};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

const WATCHDOG_TICK: Duration = Duration::from_millis(500);

/// Run one call end to end. Returns once the carrier closes the stream, the
/// silence watchdog triggers a goodbye, or the websocket errors out.
pub async fn run(ws: WebSocket, cfg: Arc<Config>) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let asr_backend: Arc<dyn asr::AsrBackend> = Arc::from(asr::build_backend(&cfg));
    let llm_backend = llm::build_backend(&cfg);
    let dialog_tts = tts::build_backend(&cfg);
    let player_tts: Arc<dyn tts::TtsBackend> = Arc::from(tts::build_backend(&cfg));

    let static_dir = prompts::static_audio_dir(&cfg);
    let static_prompts: StaticPrompts = prompts::ensure_static_prompts(player_tts.as_ref(), &static_dir).await;

    let clock = Arc::new(Mutex::new(SilenceClock::new()));
    let transcript = Arc::new(Mutex::new(TranscriptLog::new()));
    let stream_sid = Arc::new(Mutex::new(None::<String>));
    let phrase_assembler = Arc::new(Mutex::new(PhraseAssembler::new()));
    let dialog = Arc::new(Mutex::new(DialogManager::new(
        prompts::SYSTEM_INSTRUCTIONS,
        llm_backend,
        dialog_tts,
        &cfg,
    )));

    let (job_tx, job_rx) = mpsc::unbounded_channel::<PlayerJob>();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutboundEvent>();
    let cancel = CancellationHandle::new();

    let sender_task = tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            let frame = match event {
                OutboundEvent::Media { stream_sid, payload } => json!({
                    "event": "media",
                    "streamSid": stream_sid,
                    "media": { "payload": payload },
                }),
                OutboundEvent::Clear { stream_sid } => json!({
                    "event": "clear",
                    "streamSid": stream_sid,
                }),
            };
            if ws_tx.send(Message::Text(frame.to_string())).await.is_err() {
                break;
            }
        }
    });

    let session_out_tx = out_tx.clone();
    let player = Player::new(
        job_rx,
        out_tx,
        cancel.clone(),
        clock.clone(),
        transcript.clone(),
        player_tts,
        stream_sid.clone(),
        &cfg,
    );
    let player_task = tokio::spawn(player.run());

    let watchdog_task = {
        let clock = clock.clone();
        let job_tx = job_tx.clone();
        let cancel = cancel.clone();
        let cfg = cfg.clone();
        let prompts = static_prompts.clone();
        tokio::spawn(async move {
            if !cfg.silence_watchdog_enabled() {
                return;
            }
            let mut last_reminder_silence = 0.0f32;
            loop {
                tokio::time::sleep(WATCHDOG_TICK).await;
                if cancel.is_shutdown() {
                    break;
                }
                let silence = clock.lock().await.effective_silence().as_secs_f32();

                if silence < 0.25 {
                    last_reminder_silence = 0.0;
                }

                if silence - last_reminder_silence >= cfg.reminder_sec && silence < cfg.max_silence_sec {
                    let generation = cancel.current_generation();
                    let _ = job_tx.send(PlayerJob::file(prompts.reminder.clone(), generation, None));
                    last_reminder_silence = silence;
                }

                if silence >= cfg.max_silence_sec {
                    let generation = cancel.current_generation();
                    let _ = job_tx.send(PlayerJob::file(prompts.goodbye.clone(), generation, Some(crate::voice::prompts::GOODBYE_TEXT.to_string())));
                    // Give the goodbye line time to play before tearing the call down.
                    for _ in 0..40 {
                        tokio::time::sleep(Duration::from_millis(250)).await;
                        if !clock.lock().await.is_assistant_playing() {
                            break;
                        }
                    }
                    cancel.request_shutdown();
                    break;
                }
            }
        })
    };

    let mut vad = VadSegmenter::new(cfg.vad.clone());

    loop {
        if cancel.is_shutdown() {
            break;
        }
        let next = match tokio::time::timeout(WATCHDOG_TICK, ws_rx.next()).await {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(_))) | Ok(None) => break,
            Err(_) => continue, // poll interval elapsed, recheck cancel.is_shutdown()
        };
        let text = match next {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };
        let event: serde_json::Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(_) => continue,
        };
        let event_type = event.get("event").and_then(|v| v.as_str()).unwrap_or("");

        match event_type {
            "start" => {
                let sid = event
                    .get("start")
                    .and_then(|s| s.get("streamSid"))
                    .or_else(|| event.get("streamSid"))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                *stream_sid.lock().await = Some(sid.clone());
                // Hold the stream open with a single dummy silence frame before
                // anything else is queued.
                let _ = session_out_tx.send(OutboundEvent::Media {
                    stream_sid: sid,
                    payload: codec::base64_encode(&[0xFFu8; codec::FRAME_BYTES]),
                });
                let generation = cancel.current_generation();
                let _ = job_tx.send(PlayerJob::file(
                    static_prompts.greeting.clone(),
                    generation,
                    Some(prompts::GREETING_TEXT.to_string()),
                ));
            }
            "media" => {
                let payload = match event.get("media").and_then(|m| m.get("payload")).and_then(|v| v.as_str()) {
                    Some(p) => p,
                    None => continue,
                };
                let frame = match codec::base64_decode(payload) {
                    Ok(f) => f,
                    Err(_) => continue,
                };

                if vad.check_barge_in(&frame) {
                    cancel.signal_barge_in();
                }

                let outcome = vad.process_frame(&frame);
                if let Some(chunk) = outcome.chunk {
                    clock.lock().await.mark_speech();
                    spawn_transcription(
                        chunk,
                        asr_backend.clone(),
                        phrase_assembler.clone(),
                        dialog.clone(),
                        transcript.clone(),
                        job_tx.clone(),
                        cancel.clone(),
                        cfg.clone(),
                    );
                }
            }
            "stop" => {
                cancel.request_shutdown();
                break;
            }
            _ => {}
        }
    }

    cancel.request_shutdown();
    watchdog_task.abort();
    drop(job_tx);
    let _ = player_task.await;
    let _ = sender_task.await;

    transcript.lock().await.flush(&cfg.transcript_path).ok();
}

/// Hand a completed chunk off to the ASR worker; on phrase completion, run
/// the dialog turn and enqueue whatever playback job it produces.
fn spawn_transcription(
    chunk: crate::voice::types::AudioChunk,
    asr_backend: Arc<dyn asr::AsrBackend>,
    phrase_assembler: Arc<Mutex<PhraseAssembler>>,
    dialog: Arc<Mutex<DialogManager>>,
    transcript: Arc<Mutex<TranscriptLog>>,
    job_tx: mpsc::UnboundedSender<PlayerJob>,
    cancel: CancellationHandle,
    cfg: Arc<Config>,
) {
    tokio::spawn(async move {
        let phrase_id = chunk.phrase_id.clone();
        let chunk_index = chunk.chunk_index;
        if cfg.store_all_response_audio {
            asr::store_chunk_wav(&phrase_id, chunk_index, &chunk.audio_bytes).await;
        }
        let (text, _timing) = asr::transcribe_chunk(asr_backend.as_ref(), &chunk.audio_bytes).await;

        let completed = {
            let mut assembler = phrase_assembler.lock().await;
            assembler.add_chunk(chunk);
            assembler.mark_transcribed(&phrase_id, chunk_index, text)
        };

        if let Some(phrase) = completed {
            let generation = cancel.current_generation();
            let mut mgr = dialog.lock().await;
            let outcome = mgr.handle_phrase(&phrase, generation, &transcript).await;
            drop(mgr);
            if let Some(job) = outcome.job {
                let _ = job_tx.send(job);
            }
        }
    });
}
