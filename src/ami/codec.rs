//! Frame codec for the manager wire format.
//!
//! Each field is a `Key: Value` line terminated by `\r\n`; a frame ends at a
//! blank line. The decoder is a two-state byte machine ([`State::Key`] and
//! [`State::Value`]) that consumes its input as it scans, so partial frames
//! may be fed in arbitrary chunks and the state carries over between calls.
//!
//! # Decoder rules
//!
//! - `\n` is always discarded.
//! - `:` is always discarded, so it never appears in a key or value.
//! - In `Key`, a space right after a colon finalizes the key; other spaces
//!   are dropped. `\r` emits the pending record if it holds at least one
//!   field. Anything else extends the key.
//! - In `Value`, `\r` stores the value under the pending key; anything else
//!   extends the value.
//!
//! # Limits
//!
//! A single key or value may not exceed [`MAX_FIELD_BYTES`], and one record
//! may not carry more than [`MAX_FIELDS`] fields. Crossing either returns
//! [`AppError::Protocol`], drops the partial frame, and skips input up to
//! the blank line that ends the offending frame, so nothing after the limit
//! is read back as fields of a new record.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::ami::record::{Record, ACTION};
use crate::{AppError, Result};

/// Maximum size of one key or value: 64 KiB.
pub const MAX_FIELD_BYTES: usize = 65_536;

/// Maximum number of fields in one record.
pub const MAX_FIELDS: usize = 1024;

/// Field line terminator on the wire.
const CRLF: &[u8] = b"\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Key,
    Value,
    /// Skipping the rest of an over-limit frame. `line_empty` is true when
    /// nothing but `\n` has been seen since the last `\r`.
    Discard { line_empty: bool },
}

/// Manager frame codec.
///
/// Decodes raw bytes into [`Record`]s and encodes outbound actions.
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use tokio_util::codec::Decoder;
/// use ami_link::ami::codec::FrameCodec;
///
/// let mut codec = FrameCodec::new();
/// let mut buf = BytesMut::from("Response: Success\r\nMessage: ok\r\n\r\n");
/// let record = codec.decode(&mut buf).unwrap().unwrap();
/// assert_eq!(record.get("Message"), Some("ok"));
/// ```
#[derive(Debug)]
pub struct FrameCodec {
    state: State,
    prev: u8,
    key: Vec<u8>,
    pending_key: String,
    value: Vec<u8>,
    record: Record,
}

impl FrameCodec {
    /// Create a codec in the initial `Key` state with nothing accumulated.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Key,
            prev: 0,
            key: Vec::new(),
            pending_key: String::new(),
            value: Vec::new(),
            record: Record::new(),
        }
    }

    /// Drop any partially accumulated frame and return to the `Key` state.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Whether a frame is partially accumulated.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.state != State::Key
            || !self.key.is_empty()
            || !self.record.is_empty()
    }

    /// Feed one byte; returns a record when this byte completes one.
    fn push(&mut self, byte: u8) -> Result<Option<Record>> {
        if let State::Discard { line_empty } = self.state {
            match byte {
                b'\r' if line_empty => *self = Self::new(),
                b'\r' => self.state = State::Discard { line_empty: true },
                b'\n' => {}
                _ => self.state = State::Discard { line_empty: false },
            }
            return Ok(None);
        }

        let prev = std::mem::replace(&mut self.prev, byte);

        if byte == b':' || byte == b'\n' {
            return Ok(None);
        }

        match self.state {
            State::Key => match byte {
                b' ' => {
                    if prev == b':' {
                        self.pending_key = lossy(std::mem::take(&mut self.key));
                        self.state = State::Value;
                    }
                }
                b'\r' => {
                    self.key.clear();
                    self.prev = 0;
                    if !self.record.is_empty() {
                        return Ok(Some(std::mem::take(&mut self.record)));
                    }
                }
                _ => {
                    if let Err(err) = push_bounded(&mut self.key, byte, "key") {
                        return Err(self.discard(false, err));
                    }
                }
            },
            State::Value => match byte {
                b'\r' => {
                    let value = lossy(std::mem::take(&mut self.value));
                    let key = std::mem::take(&mut self.pending_key);
                    self.record.insert(key, value);
                    self.state = State::Key;
                    if self.record.len() > MAX_FIELDS {
                        let err =
                            AppError::Protocol(format!("record exceeded {MAX_FIELDS} fields"));
                        return Err(self.discard(true, err));
                    }
                }
                _ => {
                    if let Err(err) = push_bounded(&mut self.value, byte, "value") {
                        return Err(self.discard(false, err));
                    }
                }
            },
            // Consumed before the colon filter.
            State::Discard { .. } => {}
        }

        Ok(None)
    }

    /// Drop the partial frame and skip to the end of it.
    fn discard(&mut self, line_empty: bool, err: AppError) -> AppError {
        *self = Self::new();
        self.state = State::Discard { line_empty };
        err
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Record;
    type Error = AppError;

    /// Scan `src` until a record completes or the buffer is exhausted.
    ///
    /// Every scanned byte is consumed, so `src` is empty whenever this
    /// returns `Ok(None)`.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Record>> {
        for index in 0..src.len() {
            match self.push(src[index]) {
                Ok(Some(record)) => {
                    src.advance(index + 1);
                    return Ok(Some(record));
                }
                Ok(None) => {}
                Err(err) => {
                    src.advance(index + 1);
                    return Err(err);
                }
            }
        }

        src.clear();
        Ok(None)
    }
}

impl Encoder<Record> for FrameCodec {
    type Error = AppError;

    fn encode(&mut self, item: Record, dst: &mut BytesMut) -> Result<()> {
        encode_record(&item, dst)
    }
}

/// Serialize `record` as `Key: Value\r\n` lines plus the blank terminator.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] if any key or value would break framing.
pub fn encode_record(record: &Record, dst: &mut BytesMut) -> Result<()> {
    validate_fields(record)?;

    for (key, value) in record.wire_fields() {
        dst.reserve(key.len() + value.len() + 4);
        dst.put_slice(key.as_bytes());
        dst.put_slice(b": ");
        dst.put_slice(value.as_bytes());
        dst.put_slice(CRLF);
    }
    dst.put_slice(CRLF);
    Ok(())
}

/// Check that `action` can be sent: it names a command and every field
/// survives the wire format.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] describing the first offending field.
pub fn validate_action(action: &Record) -> Result<()> {
    match action.action_name() {
        Some(name) if !name.trim().is_empty() => {}
        _ => {
            return Err(AppError::Protocol(format!(
                "outbound record is missing a non-empty `{ACTION}` field"
            )))
        }
    }
    validate_fields(action)
}

fn validate_fields(record: &Record) -> Result<()> {
    for (key, value) in record.iter() {
        if key.is_empty() || key.contains([':', ' ', '\r', '\n']) {
            return Err(AppError::Protocol(format!("invalid field name {key:?}")));
        }
        if value.contains(['\r', '\n']) {
            return Err(AppError::Protocol(format!(
                "value of {key} contains a line break"
            )));
        }
    }
    Ok(())
}

fn push_bounded(buf: &mut Vec<u8>, byte: u8, what: &str) -> Result<()> {
    if buf.len() >= MAX_FIELD_BYTES {
        return Err(AppError::Protocol(format!(
            "{what} too long: exceeded {MAX_FIELD_BYTES} bytes"
        )));
    }
    buf.push(byte);
    Ok(())
}

fn lossy(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes)
        .unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into_owned())
}
