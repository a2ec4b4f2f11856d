// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Newline-delimited JSON file transport.
//!
//! Reads follow the input file from its start, one JSON object per line,
//! waiting for more data at end of file. Writes append one object per line
//! to the output file. Lines that are not JSON objects, or not UTF-8, are
//! skipped.
//!
//! The read position survives pause, close and reset: reopening continues
//! after the last complete line instead of replaying the file.

use super::Transport;
use crate::error::TransportError;
use crate::payload::{self, Payload};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const EOF_POLL: Duration = Duration::from_millis(20);

#[derive(Default)]
struct ReaderState {
    /// Present while open.
    reader: Option<BufReader<File>>,
    /// Partial line read before the writer finished it.
    pending: Vec<u8>,
    /// Byte offset just past the last complete line.
    offset: u64,
    line_no: u64,
}

/// File-backed transport.
pub struct JsonlTransport {
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    reader: Mutex<ReaderState>,
    writer: Mutex<Option<File>>,
}

impl JsonlTransport {
    /// `input` is read from, `output` is appended to. Either may be absent.
    pub fn new(input: Option<PathBuf>, output: Option<PathBuf>) -> Self {
        Self {
            input,
            output,
            reader: Mutex::new(ReaderState::default()),
            writer: Mutex::new(None),
        }
    }

    pub fn input_path(&self) -> Option<&Path> {
        self.input.as_deref()
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    /// Byte offset of the next unread line.
    pub fn read_offset(&self) -> u64 {
        self.reader.lock().offset
    }

    fn parse_line(&self, line: &[u8], line_no: u64) -> Option<Payload> {
        let text = match std::str::from_utf8(line) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(line = line_no, "Skipping non-UTF-8 line: {}", e);
                return None;
            }
        };
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(value) => {
                let parsed = payload::from_json(value);
                if parsed.is_none() {
                    tracing::warn!(line = line_no, "Skipping non-object JSON line");
                }
                parsed
            }
            Err(e) => {
                tracing::warn!(line = line_no, "Skipping malformed JSON line: {}", e);
                None
            }
        }
    }
}

impl Transport for JsonlTransport {
    fn open(&self) -> Result<(), TransportError> {
        if let Some(path) = &self.input {
            let mut state = self.reader.lock();
            if state.reader.is_none() {
                let mut file = OpenOptions::new()
                    .read(true)
                    .append(true)
                    .create(true)
                    .open(path)?;
                file.seek(SeekFrom::Start(state.offset))?;
                state.pending.clear();
                state.reader = Some(BufReader::new(file));
            }
        }
        if let Some(path) = &self.output {
            let mut writer = self.writer.lock();
            if writer.is_none() {
                *writer = Some(OpenOptions::new().append(true).create(true).open(path)?);
            }
        }
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        if let Some(mut file) = self.writer.lock().take() {
            file.flush()?;
        }
        let mut state = self.reader.lock();
        state.reader = None;
        // Re-read from `offset` on the next open.
        state.pending.clear();
        Ok(())
    }

    fn reset(&self) -> Result<(), TransportError> {
        self.close()
    }

    fn read_message(&self, timeout: Duration) -> Result<Option<Payload>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.reader.lock();
        let state = &mut *guard;
        let reader = state
            .reader
            .as_mut()
            .ok_or_else(|| TransportError::new("jsonl input is not open"))?;

        loop {
            let mut line = Vec::new();
            let read = reader.read_until(b'\n', &mut line)?;

            if read == 0 {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(None);
                }
                std::thread::sleep(EOF_POLL.min(deadline - now));
                continue;
            }

            if line.last() != Some(&b'\n') {
                state.pending.extend_from_slice(&line);
                continue;
            }

            let full = if state.pending.is_empty() {
                line
            } else {
                let mut full = std::mem::take(&mut state.pending);
                full.extend_from_slice(&line);
                full
            };
            state.offset += full.len() as u64;
            state.line_no += 1;

            if let Some(payload) = self.parse_line(&full, state.line_no) {
                return Ok(Some(payload));
            }
        }
    }

    fn write_message(&self, payload: &Payload) -> Result<Option<Payload>, TransportError> {
        let mut guard = self.writer.lock();
        let file = guard
            .as_mut()
            .ok_or_else(|| TransportError::new("jsonl output is not open"))?;

        let mut line = serde_json::to_vec(payload)?;
        line.push(b'\n');
        file.write_all(&line)?;
        file.flush()?;
        Ok(None)
    }

    fn kind(&self) -> &'static str {
        "jsonl"
    }
}
