//! Boundary to the hardware decoder, treated as an opaque producer

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::capture::frame::{DecodedPicture, StreamInfo};
use crate::error::{DecodeError, InitializationError};

/// Cooperative cancellation flag shared between the controller, the ingestion
/// loop and the decoder itself.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Produces decoded pictures in arrival order.
pub trait Decoder: Send {
    /// Reads stream parameters. Called once per initialization attempt.
    fn probe(&mut self) -> Result<StreamInfo, InitializationError>;

    /// Blocks until the next picture is decoded. `Ok(None)` is end of stream.
    ///
    /// Implementations that can interrupt their own wait should return early
    /// once `stop` fires; those that cannot are abandoned by the caller.
    fn pull(&mut self, stop: &StopToken) -> Result<Option<DecodedPicture>, DecodeError>;
}

/// Opens a stream and hands back a decoder bound to it. Dropping the decoder
/// releases everything the open acquired.
pub trait DecoderFactory: Send + Sync {
    fn open(&self, url: &str) -> Result<Box<dyn Decoder>, InitializationError>;
}

impl<F> DecoderFactory for F
where
    F: Fn(&str) -> Result<Box<dyn Decoder>, InitializationError> + Send + Sync,
{
    fn open(&self, url: &str) -> Result<Box<dyn Decoder>, InitializationError> {
        self(url)
    }
}
