//! Incremental parsing of downloaded event arrays.
//!
//! The backend answers a download with one top-level JSON array that can be
//! far larger than memory allows. [`JsonArraySplitter`] cuts the byte stream
//! into element slices as chunks arrive, without building a document tree.
//! [`spawn_record_stream`] runs it on a producer task that feeds a bounded
//! channel, so a slow consumer suspends the download.

use crate::error::{SyncError, SyncResult};
use crate::SYNC_LOG_TARGET;
use bytes::Bytes;
use fieldsync_events::EnrolmentRecordEvent;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SplitState {
    /// Before the opening bracket.
    Start,
    /// After `[`, an element or `]` may follow.
    First,
    /// After `,`, an element must follow.
    Next,
    /// Inside an element.
    Element,
    /// After the closing bracket.
    Done,
}

/// Splits a JSON array into its top-level elements, chunk by chunk.
///
/// Only the array structure is checked. Elements are returned as raw bytes
/// and may still fail to decode.
#[derive(Debug)]
pub struct JsonArraySplitter {
    state: SplitState,
    depth: usize,
    in_string: bool,
    escaped: bool,
    current: Vec<u8>,
}

impl Default for JsonArraySplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonArraySplitter {
    /// Creates a splitter expecting the start of an array.
    pub fn new() -> Self {
        Self {
            state: SplitState::Start,
            depth: 0,
            in_string: false,
            escaped: false,
            current: Vec::new(),
        }
    }

    /// Returns true once the closing bracket has been seen.
    pub fn is_done(&self) -> bool {
        self.state == SplitState::Done
    }

    /// Feeds a chunk and returns the elements it completed.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::StreamStructure`] if the input is not a JSON
    /// array. The splitter must not be used after an error.
    pub fn push(&mut self, chunk: &[u8]) -> SyncResult<Vec<Vec<u8>>> {
        let mut elements = Vec::new();
        for &byte in chunk {
            match self.state {
                SplitState::Start => match byte {
                    b'[' => self.state = SplitState::First,
                    b if b.is_ascii_whitespace() => {}
                    b => {
                        return Err(SyncError::stream_structure(format!(
                            "expected '[' but found {:?}",
                            b as char
                        )))
                    }
                },
                SplitState::First | SplitState::Next => match byte {
                    b if b.is_ascii_whitespace() => {}
                    b']' if self.state == SplitState::First => self.state = SplitState::Done,
                    b']' | b',' => {
                        return Err(SyncError::stream_structure("missing array element"));
                    }
                    b => {
                        self.state = SplitState::Element;
                        self.element_byte(b, &mut elements)?;
                    }
                },
                SplitState::Element => self.element_byte(byte, &mut elements)?,
                SplitState::Done => {
                    if !byte.is_ascii_whitespace() {
                        return Err(SyncError::stream_structure("data after the closing ']'"));
                    }
                }
            }
        }
        Ok(elements)
    }

    /// Checks that the input ended with a complete array.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::StreamStructure`] for a truncated body.
    pub fn finish(&self) -> SyncResult<()> {
        match self.state {
            SplitState::Done => Ok(()),
            SplitState::Start => Err(SyncError::stream_structure("empty body")),
            _ => Err(SyncError::stream_structure("truncated body")),
        }
    }

    fn element_byte(&mut self, byte: u8, elements: &mut Vec<Vec<u8>>) -> SyncResult<()> {
        if self.in_string {
            self.current.push(byte);
            if self.escaped {
                self.escaped = false;
            } else if byte == b'\\' {
                self.escaped = true;
            } else if byte == b'"' {
                self.in_string = false;
            }
            return Ok(());
        }
        match byte {
            b'"' => {
                self.in_string = true;
                self.current.push(byte);
            }
            b'{' | b'[' => {
                self.depth += 1;
                self.current.push(byte);
            }
            b'}' | b']' if self.depth > 0 => {
                self.depth -= 1;
                self.current.push(byte);
            }
            b']' => {
                elements.push(self.take_element()?);
                self.state = SplitState::Done;
            }
            b'}' => return Err(SyncError::stream_structure("unbalanced '}'")),
            b',' if self.depth == 0 => {
                elements.push(self.take_element()?);
                self.state = SplitState::Next;
            }
            b => self.current.push(b),
        }
        Ok(())
    }

    fn take_element(&mut self) -> SyncResult<Vec<u8>> {
        let element = std::mem::take(&mut self.current);
        let end = element
            .iter()
            .rposition(|b| !b.is_ascii_whitespace())
            .map_or(0, |i| i + 1);
        if end == 0 {
            return Err(SyncError::stream_structure("missing array element"));
        }
        let mut element = element;
        element.truncate(end);
        Ok(element)
    }
}

/// Parses a streamed body on a producer task.
///
/// Decoded records are sent in order. Elements that do not decode as an
/// [`EnrolmentRecordEvent`] are logged and skipped. A structural error or
/// a body error is sent as the last item. The producer stops as soon as the
/// receiver is dropped.
///
/// Must be called from within a tokio runtime.
pub fn spawn_record_stream(
    mut body: BoxStream<'static, SyncResult<Bytes>>,
    capacity: usize,
) -> mpsc::Receiver<SyncResult<EnrolmentRecordEvent>> {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(async move {
        let mut splitter = JsonArraySplitter::new();
        let mut skipped = 0usize;
        while let Some(chunk) = body.next().await {
            let elements = match chunk.and_then(|chunk| splitter.push(&chunk)) {
                Ok(elements) => elements,
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                    return;
                }
            };
            for element in elements {
                match serde_json::from_slice::<EnrolmentRecordEvent>(&element) {
                    Ok(record) => {
                        if tx.send(Ok(record)).await.is_err() {
                            debug!(target: SYNC_LOG_TARGET, "download consumer dropped, stopping parser");
                            return;
                        }
                    }
                    Err(err) => {
                        skipped += 1;
                        warn!(target: SYNC_LOG_TARGET, error = %err, "skipping malformed record");
                    }
                }
            }
            if splitter.is_done() {
                break;
            }
        }
        if let Err(err) = splitter.finish() {
            let _ = tx.send(Err(err)).await;
        } else if skipped > 0 {
            debug!(target: SYNC_LOG_TARGET, skipped, "download finished with skipped records");
        }
    });
    rx
}
