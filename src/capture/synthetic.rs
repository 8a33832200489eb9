//! Deterministic test-pattern decoder

use std::thread;
use std::time::Duration;

use bytes::Bytes;

use crate::capture::decoder::{Decoder, DecoderFactory, StopToken};
use crate::capture::frame::{chroma_size, DecodedPicture, PixelFormat, StreamInfo};
use crate::error::{DecodeError, InitializationError};

/// Generates NV12 gradients whose luma encodes the frame number, so tests can
/// tell which picture they received from its pixels alone.
#[derive(Debug, Clone)]
pub struct SyntheticDecoder {
    info: StreamInfo,
    produced: u64,
    /// Stop after this many pictures, `None` runs forever
    limit: Option<u64>,
    /// Artificial decode latency per picture
    latency: Duration,
}

impl SyntheticDecoder {
    pub fn new(width: u32, height: u32, framerate_num: u32, framerate_den: u32) -> Self {
        Self {
            info: StreamInfo {
                framerate_num,
                framerate_den,
                width,
                height,
                reorder_depth: None,
            },
            produced: 0,
            limit: None,
            latency: Duration::ZERO,
        }
    }

    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_reorder_depth(mut self, depth: usize) -> Self {
        self.info.reorder_depth = Some(depth);
        self
    }

    /// Parses `synthetic://WIDTHxHEIGHT@FPS`, e.g. `synthetic://640x360@30`.
    pub fn from_url(url: &str) -> Option<Self> {
        let spec = url.strip_prefix("synthetic://")?;
        let (size, fps) = spec.split_once('@').unwrap_or((spec, "30"));
        let (w, h) = size.split_once('x')?;
        Some(Self::new(w.parse().ok()?, h.parse().ok()?, fps.parse().ok()?, 1))
    }

    /// Pixels of picture number `n`
    pub fn pattern(width: u32, height: u32, n: u64) -> Bytes {
        let mut data = Vec::with_capacity(PixelFormat::Nv12.frame_len(width, height));
        for y in 0..height {
            for x in 0..width {
                data.push(((x + y) as u64 + n) as u8);
            }
        }
        let (cw, ch) = chroma_size(width, height);
        for _ in 0..cw * ch {
            data.push(128);
            data.push(128);
        }
        Bytes::from(data)
    }
}

impl Decoder for SyntheticDecoder {
    fn probe(&mut self) -> Result<StreamInfo, InitializationError> {
        Ok(self.info)
    }

    fn pull(&mut self, stop: &StopToken) -> Result<Option<DecodedPicture>, DecodeError> {
        if self.limit.is_some_and(|limit| self.produced >= limit) || stop.is_stopped() {
            return Ok(None);
        }
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }

        let n = self.produced;
        self.produced += 1;
        Ok(Some(DecodedPicture {
            width: self.info.width,
            height: self.info.height,
            data: Self::pattern(self.info.width, self.info.height, n),
            pts: Some(self.info.pts_of(n)),
        }))
    }
}

/// Opens `synthetic://` URLs
#[derive(Debug, Default, Clone, Copy)]
pub struct SyntheticFactory;

impl DecoderFactory for SyntheticFactory {
    fn open(&self, url: &str) -> Result<Box<dyn Decoder>, InitializationError> {
        SyntheticDecoder::from_url(url)
            .map(|d| Box::new(d) as Box<dyn Decoder>)
            .ok_or_else(|| InitializationError::Open {
                url: url.to_string(),
                reason: "expected synthetic://WIDTHxHEIGHT@FPS".into(),
            })
    }
}
