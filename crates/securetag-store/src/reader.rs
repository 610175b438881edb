//! Incremental parser for `git cat-file --batch` output.
//!
//! The response stream is a sequence of records, one per request line:
//!
//! ```text
//! <id> <type> <size>\n<size bytes of body>\n
//! <object> missing\n
//! ```
//!
//! Chunks arrive with no framing guarantees from the pipe, so the reader is a
//! three-state machine that can stop and resume at any byte.

use bytes::{Buf, Bytes};
use securetag_types::{is_object_hex, ObjectId, ObjectKind};

use crate::error::{StoreError, StoreResult};

/// Longest header line accepted before the stream is declared out of sync.
pub const MAX_HEADER_LEN: usize = 64 * 1024;

/// One parsed element of the response stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// A resolved object follows with exactly `size` body bytes.
    ///
    /// `size` is a `u64`: objects up to `u64::MAX` bytes are representable,
    /// well beyond anything git itself can store.
    Header { id: ObjectId, kind: ObjectKind, size: u64 },
    /// The requested name did not resolve.
    Missing { object: String },
    /// The requested short name resolved to several objects.
    Ambiguous { object: String },
    /// A slice of the current object's body.
    Body(Bytes),
    /// The current object's body is complete.
    End,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Header,
    Body { id: ObjectId, remaining: u64 },
    BodyTrailer,
}

/// Stateful decoder for the batch response stream.
#[derive(Debug)]
pub struct ObjectStreamReader {
    state: State,
    line: Vec<u8>,
}

impl ObjectStreamReader {
    pub fn new() -> Self {
        Self {
            state: State::Header,
            line: Vec::new(),
        }
    }

    /// Returns `true` when the reader sits on a record boundary.
    pub fn is_idle(&self) -> bool {
        self.state == State::Header && self.line.is_empty()
    }

    /// If a body is in flight, the object and the bytes still owed.
    pub fn pending_body(&self) -> Option<(ObjectId, u64)> {
        match self.state {
            State::Body { id, remaining } => Some((id, remaining)),
            _ => None,
        }
    }

    /// Consume one chunk, appending every event it completes to `events`.
    ///
    /// Body events are zero-copy slices of `data`. On error the reader must be
    /// discarded: the stream can no longer be trusted.
    pub fn feed(&mut self, mut data: Bytes, events: &mut Vec<StreamEvent>) -> StoreResult<()> {
        while data.has_remaining() {
            match self.state {
                State::Header => {
                    let Some(pos) = data.iter().position(|&b| b == b'\n') else {
                        self.push_line(&data)?;
                        return Ok(());
                    };
                    self.push_line(&data[..pos])?;
                    data.advance(pos + 1);
                    let line = std::mem::take(&mut self.line);
                    let event = parse_header(&line)?;
                    if let StreamEvent::Header { id, size, .. } = event {
                        if size == 0 {
                            events.push(event);
                            events.push(StreamEvent::End);
                            self.state = State::BodyTrailer;
                            continue;
                        }
                        self.state = State::Body { id, remaining: size };
                    }
                    events.push(event);
                }
                State::Body { id, remaining } => {
                    let take = remaining.min(data.len() as u64) as usize;
                    let chunk = data.split_to(take);
                    let remaining = remaining - take as u64;
                    events.push(StreamEvent::Body(chunk));
                    if remaining == 0 {
                        events.push(StreamEvent::End);
                        self.state = State::BodyTrailer;
                    } else {
                        self.state = State::Body { id, remaining };
                    }
                }
                State::BodyTrailer => {
                    let byte = data.get_u8();
                    if byte != b'\n' {
                        return Err(StoreError::ProtocolDesync(format!(
                            "expected newline after object body, got {byte:#04x}"
                        )));
                    }
                    self.state = State::Header;
                }
            }
        }
        Ok(())
    }

    fn push_line(&mut self, part: &[u8]) -> StoreResult<()> {
        if self.line.len() + part.len() > MAX_HEADER_LEN {
            return Err(StoreError::ProtocolDesync(format!(
                "header line exceeds {MAX_HEADER_LEN} bytes"
            )));
        }
        self.line.extend_from_slice(part);
        Ok(())
    }
}

impl Default for ObjectStreamReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse one header line (without its terminating newline).
fn parse_header(line: &[u8]) -> StoreResult<StreamEvent> {
    let text = std::str::from_utf8(line).map_err(|_| {
        StoreError::ProtocolDesync(format!(
            "unexpected header {:?}",
            String::from_utf8_lossy(line)
        ))
    })?;

    if let Some((object, status)) = text.rsplit_once(' ') {
        match status {
            "missing" => {
                return Ok(StreamEvent::Missing {
                    object: object.to_string(),
                })
            }
            "ambiguous" => {
                return Ok(StreamEvent::Ambiguous {
                    object: object.to_string(),
                })
            }
            _ => {}
        }
    }

    let desync = || StoreError::ProtocolDesync(format!("unexpected header {text:?}"));
    let mut parts = text.split(' ');
    let (Some(id), Some(kind), Some(size), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(desync());
    };
    if !is_object_hex(id.as_bytes()) {
        return Err(desync());
    }
    let id = ObjectId::from_hex(id).map_err(|_| desync())?;
    let kind = kind.parse::<ObjectKind>().map_err(|_| desync())?;
    let size = size.parse::<u64>().map_err(|_| desync())?;
    Ok(StreamEvent::Header { id, kind, size })
}
