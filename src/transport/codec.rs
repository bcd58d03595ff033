//! NDJSON decoder for agent process output.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] and adds a JSON accumulator:
//! lines are appended to a buffer until it parses as one complete JSON
//! value, so a frame split across lines or reads is reassembled.
//!
//! Items are `Result<Value>`: a malformed frame is yielded as an
//! `Err(SdkError::Decode)` *item* and the accumulator is reset, so the
//! stream keeps going and later frames decode normally. A buffer that
//! grows past the configured limit is a codec-level
//! [`SdkError::Overflow`], which ends the stream.
//!
//! Outbound frames do not go through the codec; the transport writes
//! them under its stdin lock.
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use agent_conduit::transport::JsonFrameCodec;
//!
//! let reader = FramedRead::new(child_stdout, JsonFrameCodec::new(1 << 20));
//! ```

use bytes::BytesMut;
use serde_json::Value;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::config::DEFAULT_MAX_BUFFER_SIZE;
use crate::{Result, SdkError};

/// NDJSON codec with a bounded JSON accumulator.
#[derive(Debug)]
pub struct JsonFrameCodec {
    lines: LinesCodec,
    buffer: String,
    max_buffer_size: usize,
}

impl JsonFrameCodec {
    /// Create a codec that rejects frames larger than `max_buffer_size`.
    #[must_use]
    pub fn new(max_buffer_size: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_buffer_size),
            buffer: String::new(),
            max_buffer_size,
        }
    }

    /// Feed one line into the accumulator.
    fn accept(&mut self, line: &str) -> Result<Option<Result<Value>>> {
        let line = line.trim_end_matches('\r');
        if self.buffer.is_empty() && line.trim().is_empty() {
            return Ok(None);
        }

        self.buffer.push_str(line);
        if self.buffer.len() > self.max_buffer_size {
            self.buffer.clear();
            return Err(SdkError::Overflow {
                limit: self.max_buffer_size,
            });
        }

        match serde_json::from_str::<Value>(&self.buffer) {
            Ok(value) => {
                self.buffer.clear();
                Ok(Some(Ok(value)))
            }
            // Incomplete value: wait for more lines.
            Err(e) if e.is_eof() => Ok(None),
            Err(e) => {
                let raw = std::mem::take(&mut self.buffer);
                Ok(Some(Err(SdkError::decode(
                    format!("malformed json: {e}"),
                    raw,
                ))))
            }
        }
    }

    fn map_codec_error(&mut self, e: LinesCodecError) -> SdkError {
        match e {
            LinesCodecError::MaxLineLengthExceeded => {
                self.buffer.clear();
                SdkError::Overflow {
                    limit: self.max_buffer_size,
                }
            }
            LinesCodecError::Io(io_err) => io_err.into(),
        }
    }
}

impl Default for JsonFrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFER_SIZE)
    }
}

impl Decoder for JsonFrameCodec {
    type Item = Result<Value>;
    type Error = SdkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.lines.decode(src) {
                Ok(Some(line)) => {
                    if let Some(item) = self.accept(&line)? {
                        return Ok(Some(item));
                    }
                }
                Ok(None) => return Ok(None),
                Err(e) => return Err(self.map_codec_error(e)),
            }
        }
    }

    /// At EOF an unterminated trailing line is still considered; a partial
    /// JSON value left in the accumulator is reported as a decode error.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.lines.decode_eof(src) {
                Ok(Some(line)) => {
                    if let Some(item) = self.accept(&line)? {
                        return Ok(Some(item));
                    }
                }
                Ok(None) => {
                    if self.buffer.is_empty() {
                        return Ok(None);
                    }
                    let raw = std::mem::take(&mut self.buffer);
                    return Ok(Some(Err(SdkError::decode(
                        "incomplete json frame at end of stream",
                        raw,
                    ))));
                }
                Err(e) => return Err(self.map_codec_error(e)),
            }
        }
    }
}
