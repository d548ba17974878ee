//! Pluggable per-connection byte handling.
//!
//! The session loop never touches raw bytes itself. Before each read it asks
//! the connection's [`TransportEngine`] for a receive buffer, and after each
//! read it hands the outcome back to the engine, which forwards (possibly
//! transformed) bytes to the frame decoder. Outbound frames pass through
//! [`TransportEngine::on_send`] on their way to the socket.
//!
//! A [`TransportFactory`] lives in the peer configuration and produces a
//! fresh engine for every connection, so engines may keep per-stream state.

mod plaintext;

pub use plaintext::{PlaintextFactory, PlaintextTransport};

use crate::error::{CommsError, Result};
use crate::rpc::FrameDecoder;
use std::fmt;
use std::io;

/// Outcome of one read from the socket.
#[derive(Debug)]
pub enum ReadEvent<'a> {
    /// Bytes read from the socket.
    Data(&'a [u8]),
    /// The remote side closed its half of the stream.
    Eof,
    /// The read failed.
    Failed(io::Error),
}

impl<'a> ReadEvent<'a> {
    /// The bytes read, or the error ending the stream.
    pub fn into_bytes(self) -> Result<&'a [u8]> {
        match self {
            ReadEvent::Data(bytes) => Ok(bytes),
            ReadEvent::Eof => Err(CommsError::ConnectionClosed),
            ReadEvent::Failed(e) => Err(e.into()),
        }
    }
}

/// Per-connection I/O strategy.
pub trait TransportEngine: Send + 'static {
    fn name(&self) -> &'static str;

    /// Prepare `buffer` to receive up to `suggested` bytes.
    ///
    /// An allocation failure is fatal for the connection.
    fn alloc_buffer(&mut self, buffer: &mut Vec<u8>, suggested: usize) -> Result<()> {
        if buffer.len() >= suggested {
            return Ok(());
        }
        buffer
            .try_reserve_exact(suggested - buffer.len())
            .map_err(|e| CommsError::Transport {
                transport: self.name(),
                message: format!("cannot allocate {} byte receive buffer: {}", suggested, e),
            })?;
        buffer.resize(suggested, 0);
        Ok(())
    }

    /// Handle the result of a read.
    ///
    /// `Eof` and `Failed` must end in an error so the session tears the
    /// connection down.
    fn on_data(&mut self, event: ReadEvent<'_>, decoder: &mut FrameDecoder) -> Result<()>;

    /// Transform one outbound frame before it is written.
    fn on_send(&mut self, frame: Vec<u8>) -> Result<Vec<u8>> {
        Ok(frame)
    }
}

/// Produces transport engines.
pub trait TransportFactory: Send + Sync + fmt::Debug + 'static {
    fn name(&self) -> &'static str;

    fn create(&self) -> Box<dyn TransportEngine>;
}
