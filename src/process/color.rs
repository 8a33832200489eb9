//! NV12 to output color conversion

use crate::process::params::{ColorOptions, FourCC, Planes};
use crate::process::tensor::TensorData;

/// BT.601 limited range, 8-bit fixed point
#[inline]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = 298 * (y as i32 - 16);
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clip = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [clip(c + 409 * e), clip(c - 100 * d - 208 * e), clip(c + 516 * d)]
}

/// Converts NV12 planes of a `width`x`height` picture into the requested format and layout
pub fn convert(luma: &[u8], chroma: &[u8], width: usize, height: usize, options: &ColorOptions) -> TensorData {
    let bytes = match options.format {
        // one channel: planar and merged are the same bytes
        FourCC::Y800 => luma.to_vec(),
        FourCC::Rgb24 => to_rgb(luma, chroma, width, height, [0, 1, 2], options.planes),
        FourCC::Bgr24 => to_rgb(luma, chroma, width, height, [2, 1, 0], options.planes),
    };

    if options.normalization {
        TensorData::F32(bytes.into_iter().map(|v| v as f32 / 255.0).collect())
    } else {
        TensorData::U8(bytes)
    }
}

/// `order[i]` is the output channel position of R, G and B respectively
fn to_rgb(luma: &[u8], chroma: &[u8], width: usize, height: usize, order: [usize; 3], planes: Planes) -> Vec<u8> {
    let plane = width * height;
    let chroma_width = width.div_ceil(2);
    let mut out = vec![0u8; plane * 3];

    for y in 0..height {
        let uv_row = &chroma[(y / 2) * chroma_width * 2..];
        for x in 0..width {
            let uv = (x / 2) * 2;
            let rgb = yuv_to_rgb(luma[y * width + x], uv_row[uv], uv_row[uv + 1]);
            let pixel = y * width + x;
            for (component, &position) in rgb.iter().zip(&order) {
                let offset = match planes {
                    Planes::Merged => pixel * 3 + position,
                    Planes::Planar => position * plane + pixel,
                };
                out[offset] = *component;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(format: FourCC, planes: Planes, normalization: bool) -> ColorOptions {
        ColorOptions {
            normalization,
            planes,
            format,
        }
    }

    #[test]
    fn limited_range_endpoints() {
        assert_eq!(yuv_to_rgb(16, 128, 128), [0, 0, 0]);
        assert_eq!(yuv_to_rgb(235, 128, 128), [255, 255, 255]);
        assert_eq!(yuv_to_rgb(128, 128, 128), [130, 130, 130]);
        // saturated red
        let [r, g, b] = yuv_to_rgb(81, 90, 240);
        assert!(r > 250 && g < 5 && b < 5, "{r} {g} {b}");
    }

    #[test]
    fn y800_is_the_luma_plane() {
        let luma = [1, 2, 3, 4];
        let chroma = [128, 128];
        let out = convert(&luma, &chroma, 2, 2, &options(FourCC::Y800, Planes::Planar, false));
        assert_eq!(out, TensorData::U8(vec![1, 2, 3, 4]));
    }

    #[test]
    fn merged_and_planar_layouts() {
        // 2x1 picture: one gray pixel, one white pixel, neutral chroma
        let luma = [128, 235];
        let chroma = [128, 128];
        let merged = convert(&luma, &chroma, 2, 1, &options(FourCC::Rgb24, Planes::Merged, false));
        assert_eq!(merged, TensorData::U8(vec![130, 130, 130, 255, 255, 255]));
        let planar = convert(&luma, &chroma, 2, 1, &options(FourCC::Rgb24, Planes::Planar, false));
        assert_eq!(planar, TensorData::U8(vec![130, 255, 130, 255, 130, 255]));
    }

    #[test]
    fn bgr_swaps_channel_order() {
        let luma = [81];
        let chroma = [90, 240];
        let rgb = convert(&luma, &chroma, 1, 1, &options(FourCC::Rgb24, Planes::Merged, false)).to_u8();
        let bgr = convert(&luma, &chroma, 1, 1, &options(FourCC::Bgr24, Planes::Merged, false)).to_u8();
        assert_eq!(bgr, vec![rgb[2], rgb[1], rgb[0]]);
    }

    #[test]
    fn odd_sizes_share_edge_chroma() {
        // 3x3 luma uses a 2x2 chroma plane
        let luma = [16u8; 9];
        let chroma = [128u8; 8];
        let out = convert(&luma, &chroma, 3, 3, &options(FourCC::Rgb24, Planes::Merged, false));
        assert_eq!(out.len(), 27);
        assert!(out.to_u8().iter().all(|&v| v == 0));
    }

    #[test]
    fn normalization_scales_to_unit_range() {
        let out = convert(&[235, 16], &[128, 128], 2, 1, &options(FourCC::Y800, Planes::Merged, true));
        let values = out.as_f32().unwrap();
        assert!((values[0] - 235.0 / 255.0).abs() < 1e-6);
        assert!((values[1] - 16.0 / 255.0).abs() < 1e-6);
    }
}
