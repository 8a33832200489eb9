//! Error taxonomy for the decode → buffer → post-process pipeline

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::pipeline::PipelineState;

pub type Result<T> = std::result::Result<T, Error>;

/// Bad caller input. Always surfaced synchronously, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("resize to {width}x{height} is invalid: width and height must both be zero or both non-zero")]
    PartialResize { width: u32, height: u32 },
    #[error("resize to {width}x{height} exceeds the {max}px limit")]
    DimensionTooLarge { width: u32, height: u32, max: u32 },
    #[error("unsupported {kind} code {code}")]
    UnsupportedFormat { kind: &'static str, code: u32 },
    #[error("consumer {consumer:?} requested delay {delay}, allowed range is [{min}, 0]")]
    DelayOutOfRange {
        consumer: String,
        delay: i32,
        min: i32,
    },
    #[error("frame {index} is outside the live window {window:?}")]
    IndexOutOfWindow {
        index: u64,
        window: Option<(u64, u64)>,
    },
    #[error("frame {index} is not newer than the head {head}")]
    NonIncreasingIndex { index: u64, head: u64 },
    #[error("buffer size {buffer_size} exceeds the decoder reorder depth {depth}")]
    BufferExceedsReorderDepth { buffer_size: usize, depth: usize },
    #[error("tensor layout {actual} does not match the requested parameters ({expected})")]
    LayoutMismatch { expected: String, actual: String },
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Stream open/probe failure.
#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("failed to open stream {url:?}: {reason}")]
    Open { url: String, reason: String },
    #[error("failed to probe stream {url:?}: {reason}")]
    Probe { url: String, reason: String },
    #[error("stream {url:?} reports invalid framerate {num}/{den}")]
    InvalidFramerate { url: String, num: u32, den: u32 },
    #[error("stream {url:?} framerate {fps:.2} exceeds the {max} fps limit")]
    FramerateTooHigh { url: String, fps: f64, max: u32 },
    #[error("could not initialize {url:?} after {attempts} attempt(s), last error: {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        last: String,
    },
}

/// Ingestion could not place a picture because consumers lag past the buffer.
#[derive(Debug, Clone, Error)]
pub enum OverflowError {
    #[error("ingestion stalled writing frame {index}: consumers {lagging:?} still need frame {evicted} after {waited:?}")]
    Stalled {
        index: u64,
        evicted: u64,
        lagging: Vec<String>,
        waited: Duration,
    },
}

/// Mid-stream decoder failure.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    #[error("decoder failed after frame {after:?}: {reason}")]
    Failed { after: Option<u64>, reason: String },
    #[error("picture {width}x{height} carries {actual} bytes, expected {expected}")]
    Malformed {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("decode worker exited without reporting end of stream")]
    WorkerLost,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Initialization(#[from] InitializationError),
    #[error(transparent)]
    Overflow(#[from] OverflowError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("{operation} is not allowed in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: PipelineState,
    },
    #[error("pipeline is stopped")]
    Stopped,
    #[error("no frame has been decoded yet")]
    NotReady,
    #[error("consumer {consumer:?} timed out after {waited:?} waiting for a fresh frame")]
    Timeout { consumer: String, waited: Duration },
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode {path:?}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to install log subscriber: {0}")]
    Logging(String),
    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// True for errors caused by the caller's request rather than the pipeline.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}
