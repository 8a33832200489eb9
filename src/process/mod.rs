//! Per-read post-processing: resize, then color conversion

pub mod color;
pub mod dump;
pub mod params;
pub mod resize;
pub mod tensor;

use std::borrow::Cow;
use std::time::Instant;

use tracing::instrument;

use crate::capture::frame::{chroma_size, Picture};
use crate::error::ValidationError;

pub use dump::DumpFormat;
pub use params::{ColorOptions, FourCC, FrameParameters, Planes, ResizeOptions, ResizeType};
pub use tensor::{Tensor, TensorData, TensorLayout};

/// Stateless transform from a decoded picture to an output tensor
#[derive(Debug, Default, Clone, Copy)]
pub struct PostProcessor;

impl PostProcessor {
    /// Validates `params` before touching any pixels, so a bad request yields no output at all.
    #[instrument(skip_all, fields(index = picture.index))]
    pub fn process(picture: &Picture, params: &FrameParameters) -> Result<Tensor, ValidationError> {
        params.validate()?;
        let started = Instant::now();

        let (width, height) = params.output_size(picture.width, picture.height);
        let (luma, chroma) = if (width, height) == (picture.width, picture.height) {
            (Cow::Borrowed(picture.luma()), Cow::Borrowed(picture.chroma()))
        } else {
            let kind = params.resize.resize_type;
            let src = (picture.width as usize, picture.height as usize);
            let dst = (width as usize, height as usize);
            (
                Cow::Owned(resize::resize_plane(picture.luma(), src, 1, dst, kind)),
                Cow::Owned(resize::resize_plane(
                    picture.chroma(),
                    chroma_size(picture.width, picture.height),
                    2,
                    chroma_size(width, height),
                    kind,
                )),
            )
        };

        let data = color::convert(&luma, &chroma, width as usize, height as usize, &params.color);
        metrics::histogram!("process_time_us").record(started.elapsed().as_micros() as f64);

        Ok(Tensor {
            data,
            layout: TensorLayout {
                width,
                height,
                format: params.color.format,
                planes: params.color.planes,
                normalized: params.color.normalization,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{DecodedPicture, SyntheticDecoder};

    fn picture(width: u32, height: u32) -> Picture {
        Picture::from_decoded(
            3,
            DecodedPicture {
                width,
                height,
                data: SyntheticDecoder::pattern(width, height, 3),
                pts: None,
            },
        )
        .unwrap()
    }

    fn params(width: u32, height: u32, resize_type: ResizeType, format: FourCC, planes: Planes) -> FrameParameters {
        FrameParameters::new(
            ResizeOptions {
                width,
                height,
                resize_type,
            },
            ColorOptions {
                normalization: false,
                planes,
                format,
            },
        )
    }

    #[test]
    fn bilinear_rgb_merged_downscale() {
        let source = picture(200, 100);
        let out = PostProcessor::process(
            &source,
            &params(100, 50, ResizeType::Bilinear, FourCC::Rgb24, Planes::Merged),
        )
        .unwrap();
        assert_eq!(out.shape(), [50, 100, 3]);
        assert_eq!(out.data.len(), 100 * 50 * 3);
        // neutral chroma: channels of each pixel are equal
        let bytes = out.data.as_u8().unwrap();
        assert!(bytes.chunks(3).all(|px| px[0] == px[1] && px[1] == px[2]));
    }

    #[test]
    fn same_size_luma_is_identical() {
        let source = picture(64, 36);
        let same = params(64, 36, ResizeType::Bilinear, FourCC::Y800, Planes::Merged);
        let keep = params(0, 0, ResizeType::Nearest, FourCC::Y800, Planes::Merged);
        for p in [same, keep] {
            let out = PostProcessor::process(&source, &p).unwrap();
            assert_eq!(out.data.as_u8().unwrap(), source.luma());
            assert_eq!(out.shape(), [36, 64, 1]);
        }
    }

    #[test]
    fn invalid_params_fail_before_processing() {
        let source = picture(8, 8);
        let err = PostProcessor::process(
            &source,
            &params(0, 4, ResizeType::Nearest, FourCC::Rgb24, Planes::Merged),
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::PartialResize { width: 0, height: 4 });
    }

    #[test]
    fn planar_output_and_upscale() {
        let source = picture(5, 3);
        let out = PostProcessor::process(
            &source,
            &params(11, 7, ResizeType::Nearest, FourCC::Bgr24, Planes::Planar),
        )
        .unwrap();
        assert_eq!(out.shape(), [3, 7, 11]);
        assert_eq!(out.data.len(), 3 * 7 * 11);
    }

    #[test]
    fn normalized_output_is_float() {
        let source = picture(4, 4);
        let mut p = params(0, 0, ResizeType::Nearest, FourCC::Rgb24, Planes::Merged);
        p.color.normalization = true;
        let out = PostProcessor::process(&source, &p).unwrap();
        let values = out.data.as_f32().unwrap();
        assert_eq!(values.len(), 48);
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(out.layout.normalized);
    }
}
