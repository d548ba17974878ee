use super::{ReadEvent, TransportEngine, TransportFactory};
use crate::error::Result;
use crate::rpc::FrameDecoder;

/// Forwards bytes to the decoder unchanged.
#[derive(Debug, Default)]
pub struct PlaintextTransport;

impl TransportEngine for PlaintextTransport {
    fn name(&self) -> &'static str {
        "plaintext"
    }

    fn on_data(&mut self, event: ReadEvent<'_>, decoder: &mut FrameDecoder) -> Result<()> {
        decoder.feed(event.into_bytes()?)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PlaintextFactory;

impl TransportFactory for PlaintextFactory {
    fn name(&self) -> &'static str {
        "plaintext"
    }

    fn create(&self) -> Box<dyn TransportEngine> {
        Box::new(PlaintextTransport)
    }
}
