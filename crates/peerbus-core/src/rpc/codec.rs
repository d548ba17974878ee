//! Framing for the message stream.
//!
//! Every message is a UTF-8 JSON object followed by a single NUL byte:
//!
//! ```text
//! {"id":["echo",1],"method":"echo","params":"hi"}\0{"id":...}\0
//! ```
//!
//! JSON text never contains a raw NUL (it is escaped inside strings), so the
//! delimiter is unambiguous. [`FrameDecoder`] buffers partial frames across
//! reads; once it reports an error it stays failed.

use super::message::Message;
use crate::config::CommsConfig;
use crate::error::{CommsError, Result};
use bytes::{Buf, BytesMut};

/// Serialize a message into one delimited frame.
pub fn encode(message: &Message) -> Result<Vec<u8>> {
    let mut frame = serde_json::to_vec(&message.to_value())?;
    frame.push(CommsConfig::FRAME_DELIMITER);
    Ok(frame)
}

/// Incremental, restartable frame parser.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    /// Bytes at the front of `buffer` already known not to hold a delimiter.
    scanned: usize,
    max_message_size: usize,
    failed: bool,
}

impl FrameDecoder {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            scanned: 0,
            max_message_size,
            failed: false,
        }
    }

    /// Append bytes delivered by the transport.
    pub fn feed(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_usable()?;
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    /// Pop the next complete message, if any.
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        self.ensure_usable()?;

        loop {
            let Some(offset) = self.buffer[self.scanned..]
                .iter()
                .position(|&b| b == CommsConfig::FRAME_DELIMITER)
            else {
                self.scanned = self.buffer.len();
                if self.buffer.len() > self.max_message_size {
                    return Err(self.fail(CommsError::MessageTooLarge {
                        size: self.buffer.len(),
                        max: self.max_message_size,
                    }));
                }
                return Ok(None);
            };

            let end = self.scanned + offset;
            self.scanned = 0;

            if end > self.max_message_size {
                return Err(self.fail(CommsError::MessageTooLarge {
                    size: end,
                    max: self.max_message_size,
                }));
            }

            let frame = self.buffer.split_to(end);
            self.buffer.advance(1);

            if frame.iter().all(u8::is_ascii_whitespace) {
                // Stray delimiters carry nothing.
                continue;
            }

            let value: serde_json::Value = match serde_json::from_slice(&frame) {
                Ok(value) => value,
                Err(e) => return Err(self.fail(e.into())),
            };

            return match Message::from_value(value) {
                Ok(message) => Ok(Some(message)),
                Err(e) => Err(self.fail(e)),
            };
        }
    }

    /// Bytes held for a frame that is not complete yet.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.failed {
            return Err(CommsError::protocol("parser already failed"));
        }
        Ok(())
    }

    fn fail(&mut self, err: CommsError) -> CommsError {
        self.failed = true;
        self.buffer.clear();
        self.scanned = 0;
        err
    }
}
