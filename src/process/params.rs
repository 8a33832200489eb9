//! Per-call post-processing options

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Largest destination edge accepted by a resize request
pub const MAX_DIMENSION: u32 = 16384;

/// Output color format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FourCC {
    /// Single-channel luma, 8 bits per pixel
    Y800,
    /// Three channels in R, G, B order
    #[default]
    Rgb24,
    /// Three channels in B, G, R order
    Bgr24,
}

impl FourCC {
    pub fn channels(self) -> usize {
        match self {
            FourCC::Y800 => 1,
            FourCC::Rgb24 | FourCC::Bgr24 => 3,
        }
    }
}

impl TryFrom<u32> for FourCC {
    type Error = ValidationError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(FourCC::Y800),
            1 => Ok(FourCC::Rgb24),
            2 => Ok(FourCC::Bgr24),
            code => Err(ValidationError::UnsupportedFormat { kind: "fourcc", code }),
        }
    }
}

/// Memory layout of multi-channel output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Planes {
    /// RRR…GGG…BBB…
    Planar,
    /// RGBRGB…
    #[default]
    Merged,
}

impl TryFrom<u32> for Planes {
    type Error = ValidationError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Planes::Planar),
            1 => Ok(Planes::Merged),
            code => Err(ValidationError::UnsupportedFormat { kind: "planes", code }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResizeType {
    /// Each destination pixel copies its nearest source pixel
    #[default]
    Nearest,
    /// Weighted average of the four surrounding source pixels
    Bilinear,
}

impl TryFrom<u32> for ResizeType {
    type Error = ValidationError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(ResizeType::Nearest),
            1 => Ok(ResizeType::Bilinear),
            code => Err(ValidationError::UnsupportedFormat { kind: "resize type", code }),
        }
    }
}

/// Zero width and height keep the source size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResizeOptions {
    pub width: u32,
    pub height: u32,
    pub resize_type: ResizeType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ColorOptions {
    /// Rescale to `f32` in [0, 1]
    pub normalization: bool,
    pub planes: Planes,
    pub format: FourCC,
}

/// Everything one read needs to turn a decoded picture into output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameParameters {
    pub resize: ResizeOptions,
    pub color: ColorOptions,
}

impl FrameParameters {
    pub fn new(resize: ResizeOptions, color: ColorOptions) -> Self {
        Self { resize, color }
    }

    /// Builds parameters from the numeric codes used across language bindings
    pub fn from_codes(
        width: u32,
        height: u32,
        resize_type: u32,
        format: u32,
        planes: u32,
        normalization: bool,
    ) -> Result<Self, ValidationError> {
        let params = Self {
            resize: ResizeOptions {
                width,
                height,
                resize_type: resize_type.try_into()?,
            },
            color: ColorOptions {
                normalization,
                planes: planes.try_into()?,
                format: format.try_into()?,
            },
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let ResizeOptions { width, height, .. } = self.resize;
        if (width == 0) != (height == 0) {
            return Err(ValidationError::PartialResize { width, height });
        }
        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(ValidationError::DimensionTooLarge {
                width,
                height,
                max: MAX_DIMENSION,
            });
        }
        Ok(())
    }

    /// Destination size for a `width`x`height` source
    pub fn output_size(&self, width: u32, height: u32) -> (u32, u32) {
        match (self.resize.width, self.resize.height) {
            (0, 0) => (width, height),
            size => size,
        }
    }
}
