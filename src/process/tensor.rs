use std::fmt;

use crate::process::params::{FourCC, Planes};

/// Dense output samples
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    U8(Vec<u8>),
    /// Normalized to [0, 1]
    F32(Vec<f32>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::U8(v) => v.len(),
            TensorData::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_u8(&self) -> Option<&[u8]> {
        match self {
            TensorData::U8(v) => Some(v),
            TensorData::F32(_) => None,
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            TensorData::F32(v) => Some(v),
            TensorData::U8(_) => None,
        }
    }

    /// 8-bit samples, rescaling normalized data back to [0, 255]
    pub fn to_u8(&self) -> Vec<u8> {
        match self {
            TensorData::U8(v) => v.clone(),
            TensorData::F32(v) => v
                .iter()
                .map(|&x| (x * 255.0).round().clamp(0.0, 255.0) as u8)
                .collect(),
        }
    }
}

/// Shape and format of a [`Tensor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorLayout {
    pub width: u32,
    pub height: u32,
    pub format: FourCC,
    pub planes: Planes,
    pub normalized: bool,
}

impl TensorLayout {
    pub fn channels(&self) -> usize {
        self.format.channels()
    }

    /// `[height, width, channels]` when merged, `[channels, height, width]` when planar
    pub fn shape(&self) -> [usize; 3] {
        let (w, h, c) = (self.width as usize, self.height as usize, self.channels());
        match self.planes {
            Planes::Merged => [h, w, c],
            Planes::Planar => [c, h, w],
        }
    }

    pub fn element_count(&self) -> usize {
        self.shape().iter().product()
    }
}

impl fmt::Display for TensorLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} {:?} {:?}{}",
            self.width,
            self.height,
            self.format,
            self.planes,
            if self.normalized { " normalized" } else { "" }
        )
    }
}

/// Post-processed frame, ready to wrap in a numeric container
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub data: TensorData,
    pub layout: TensorLayout,
}

impl Tensor {
    pub fn shape(&self) -> [usize; 3] {
        self.layout.shape()
    }
}
