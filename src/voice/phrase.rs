//! Phrase Assembler (C4): maintains phrase_id -> PhraseObject, and fires the
//! completion hand-off exactly once per phrase.

use crate::voice::types::{AudioChunk, PhraseObject};
use std::collections::HashMap;

pub struct PhraseAssembler {
    phrases: HashMap<String, PhraseObject>,
}

impl PhraseAssembler {
    pub fn new() -> Self {
        Self {
            phrases: HashMap::new(),
        }
    }

    /// Add a newly-emitted chunk to its phrase, creating the PhraseObject on
    /// first sight of a phrase_id.
    pub fn add_chunk(&mut self, chunk: AudioChunk) {
        let phrase = self
            .phrases
            .entry(chunk.phrase_id.clone())
            .or_insert_with(|| PhraseObject::new(chunk.phrase_id.clone()));
        phrase.chunks.push(chunk);
    }

    /// Update the chunk at `chunk_index` within `phrase_id` with an ASR
    /// result, then check whether the phrase just became complete. Returns a
    /// snapshot to hand to the Dialog Manager exactly once.
    pub fn mark_transcribed(
        &mut self,
        phrase_id: &str,
        chunk_index: u32,
        transcription: String,
    ) -> Option<PhraseObject> {
        let phrase = self.phrases.get_mut(phrase_id)?;
        if let Some(chunk) = phrase.chunks.iter_mut().find(|c| c.chunk_index == chunk_index) {
            chunk.transcription = transcription;
            chunk.is_transcribed = true;
        }

        if phrase.is_complete() && !phrase.is_done {
            phrase.is_done = true;
            let snapshot = phrase.clone();
            self.phrases.remove(phrase_id);
            return Some(snapshot);
        }
        None
    }
}

impl Default for PhraseAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::types::AudioChunk;

    fn chunk(phrase: &str, idx: u32) -> AudioChunk {
        AudioChunk::new(phrase.to_string(), idx, vec![0u8; 100], 800.0, idx as f32 * 0.02)
    }

    #[test]
    fn fires_completion_exactly_once_even_with_duplicate_marks() {
        let mut assembler = PhraseAssembler::new();
        assembler.add_chunk(chunk("p1", 0));
        assembler.add_chunk(chunk("p1", 1));

        assert!(assembler.mark_transcribed("p1", 0, "and".into()).is_none());
        let first = assembler.mark_transcribed("p1", 1, "yes".into());
        assert!(first.is_some());
        assert_eq!(first.unwrap().phrase_text(), "and yes");

        // phrase was removed on completion; re-marking finds nothing to fire.
        assert!(assembler.mark_transcribed("p1", 1, "yes again".into()).is_none());
    }

    #[test]
    fn out_of_order_asr_still_joins_by_chunk_index() {
        let mut assembler = PhraseAssembler::new();
        assembler.add_chunk(chunk("p1", 0));
        assembler.add_chunk(chunk("p1", 1));
        assembler.add_chunk(chunk("p1", 2));

        assert!(assembler.mark_transcribed("p1", 2, "world".into()).is_none());
        assert!(assembler.mark_transcribed("p1", 0, "hello".into()).is_none());
        let done = assembler.mark_transcribed("p1", 1, "there".into()).unwrap();
        assert_eq!(done.phrase_text(), "hello there world");
    }
}
