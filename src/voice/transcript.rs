//! Transcript Log (C9): in-memory ordered lines, flushed to disk on
//! teardown. The only Assistant appenders are the Player (normal completion
//! and interruption marker); the only Caller appender is the Dialog Manager.

use crate::voice::types::{TranscriptLine, TranscriptRole};
use chrono::Local;
use std::path::Path;

#[derive(Default)]
pub struct TranscriptLog {
    lines: Vec<TranscriptLine>,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self { lines: Vec::new() }
    }

    pub fn append(&mut self, role: TranscriptRole, text: impl Into<String>) {
        self.lines.push(TranscriptLine {
            timestamp: Local::now(),
            role,
            text: text.into(),
        });
    }

    pub fn append_caller(&mut self, text: impl Into<String>) {
        self.append(TranscriptRole::Caller, text);
    }

    pub fn append_assistant(&mut self, text: impl Into<String>) {
        self.append(TranscriptRole::Assistant, text);
    }

    pub fn lines(&self) -> &[TranscriptLine] {
        &self.lines
    }

    /// Overwrite `path` with every line in insertion order.
    pub fn flush(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let body = self
            .lines
            .iter()
            .map(|l| l.format())
            .collect::<Vec<_>>()
            .join("\n");
        let body = if body.is_empty() { body } else { format!("{body}\n") };
        std::fs::write(path, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn flush_writes_lines_in_order() {
        let mut log = TranscriptLog::new();
        log.append_caller("hello there");
        log.append_assistant("hi, how can I help");

        let file = NamedTempFile::new().unwrap();
        log.flush(file.path()).unwrap();
        let contents = std::fs::read_to_string(file.path()).unwrap();
        let mut iter = contents.lines();
        assert!(iter.next().unwrap().contains("Caller: hello there"));
        assert!(iter.next().unwrap().contains("Assistant: hi, how can I help"));
    }
}
