use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::error::DecodeError;

/// Pixel format decoded pictures arrive in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Full-resolution luma plane followed by an interleaved CbCr plane at half resolution
    Nv12,
}

impl PixelFormat {
    /// Bytes needed to hold a `width`x`height` picture
    pub fn frame_len(self, width: u32, height: u32) -> usize {
        match self {
            PixelFormat::Nv12 => {
                let (cw, ch) = chroma_size(width, height);
                width as usize * height as usize + cw * ch * 2
            }
        }
    }
}

/// Size of the NV12 chroma plane in samples
pub fn chroma_size(width: u32, height: u32) -> (usize, usize) {
    (width.div_ceil(2) as usize, height.div_ceil(2) as usize)
}

/// Decoder output before the ingestion loop assigns it an index
#[derive(Clone)]
pub struct DecodedPicture {
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
    pub pts: Option<Duration>,
}

/// One decoded frame owned by the frame buffer
#[derive(Clone)]
pub struct Picture {
    /// Arrival order, strictly increasing
    pub index: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Immutable pixel data, shared with readers without copying
    pub data: Bytes,
    pub pts: Option<Duration>,
    /// Ingestion timestamp for latency tracking
    pub decoded_at: Instant,
}

impl Picture {
    pub fn from_decoded(index: u64, decoded: DecodedPicture) -> Result<Self, DecodeError> {
        let format = PixelFormat::Nv12;
        let expected = format.frame_len(decoded.width, decoded.height);
        if decoded.width == 0 || decoded.height == 0 || decoded.data.len() != expected {
            return Err(DecodeError::Malformed {
                width: decoded.width,
                height: decoded.height,
                expected,
                actual: decoded.data.len(),
            });
        }

        Ok(Self {
            index,
            width: decoded.width,
            height: decoded.height,
            format,
            data: decoded.data,
            pts: decoded.pts,
            decoded_at: Instant::now(),
        })
    }

    pub fn luma(&self) -> &[u8] {
        &self.data[..self.width as usize * self.height as usize]
    }

    pub fn chroma(&self) -> &[u8] {
        &self.data[self.width as usize * self.height as usize..]
    }
}

impl std::fmt::Debug for Picture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Picture")
            .field("index", &self.index)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .field("pts", &self.pts)
            .finish()
    }
}

/// Stream properties discovered by probing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub framerate_num: u32,
    pub framerate_den: u32,
    pub width: u32,
    pub height: u32,
    /// Depth of the decoder's own reference picture buffer, when known
    pub reorder_depth: Option<usize>,
}

impl StreamInfo {
    pub fn fps(&self) -> f64 {
        self.framerate_num as f64 / self.framerate_den as f64
    }

    pub fn frame_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Wall-clock time one frame covers
    pub fn frame_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 * self.framerate_den as u64 / self.framerate_num as u64)
    }

    /// Presentation time of frame number `n`, saturating instead of wrapping
    pub fn pts_of(&self, n: u64) -> Duration {
        let nanos = self.frame_interval().as_nanos() as u64;
        Duration::from_nanos(nanos.saturating_mul(n))
    }
}
