//! Plane resampling
//!
//! Planes are tightly packed, `channels` interleaved samples per pixel. Both
//! algorithms map destination pixel centres onto the source grid.

use crate::process::params::ResizeType;

pub fn resize_plane(
    src: &[u8],
    (sw, sh): (usize, usize),
    channels: usize,
    (dw, dh): (usize, usize),
    kind: ResizeType,
) -> Vec<u8> {
    debug_assert_eq!(src.len(), sw * sh * channels);
    if (sw, sh) == (dw, dh) {
        return src.to_vec();
    }
    match kind {
        ResizeType::Nearest => nearest(src, (sw, sh), channels, (dw, dh)),
        ResizeType::Bilinear => bilinear(src, (sw, sh), channels, (dw, dh)),
    }
}

fn nearest_map(src: usize, dst: usize) -> Vec<usize> {
    (0..dst)
        .map(|d| ((2 * d + 1) * src / (2 * dst)).min(src - 1))
        .collect()
}

fn nearest(src: &[u8], (sw, sh): (usize, usize), channels: usize, (dw, dh): (usize, usize)) -> Vec<u8> {
    let xs = nearest_map(sw, dw);
    let ys = nearest_map(sh, dh);
    let mut out = Vec::with_capacity(dw * dh * channels);
    for &sy in &ys {
        let row = &src[sy * sw * channels..(sy + 1) * sw * channels];
        for &sx in &xs {
            out.extend_from_slice(&row[sx * channels..(sx + 1) * channels]);
        }
    }
    out
}

/// Left neighbour, right neighbour and right weight per destination coordinate
fn bilinear_map(src: usize, dst: usize) -> Vec<(usize, usize, f32)> {
    let scale = src as f32 / dst as f32;
    (0..dst)
        .map(|d| {
            let f = ((d as f32 + 0.5) * scale - 0.5).max(0.0);
            let lo = (f.floor() as usize).min(src - 1);
            let hi = (lo + 1).min(src - 1);
            (lo, hi, f - lo as f32)
        })
        .collect()
}

fn bilinear(src: &[u8], (sw, sh): (usize, usize), channels: usize, (dw, dh): (usize, usize)) -> Vec<u8> {
    let xs = bilinear_map(sw, dw);
    let ys = bilinear_map(sh, dh);
    let at = |x: usize, y: usize, c: usize| src[(y * sw + x) * channels + c] as f32;

    let mut out = Vec::with_capacity(dw * dh * channels);
    for &(y0, y1, wy) in &ys {
        for &(x0, x1, wx) in &xs {
            for c in 0..channels {
                let top = at(x0, y0, c) * (1.0 - wx) + at(x1, y0, c) * wx;
                let bottom = at(x0, y1, c) * (1.0 - wx) + at(x1, y1, c) * wx;
                let value = top * (1.0 - wy) + bottom * wy;
                out.push((value + 0.5) as u8);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_size_is_a_copy() {
        let src: Vec<u8> = (0..24).collect();
        for kind in [ResizeType::Nearest, ResizeType::Bilinear] {
            assert_eq!(resize_plane(&src, (4, 3), 2, (4, 3), kind), src);
        }
    }

    #[test]
    fn nearest_picks_centre_samples() {
        let src = [10, 20, 30, 40];
        assert_eq!(resize_plane(&src, (4, 1), 1, (2, 1), ResizeType::Nearest), [20, 40]);
        assert_eq!(
            resize_plane(&src[..2], (2, 1), 1, (4, 1), ResizeType::Nearest),
            [10, 10, 20, 20]
        );
    }

    #[test]
    fn nearest_keeps_channels_together() {
        let src = [1, 2, 3, 4, 5, 6, 7, 8];
        assert_eq!(
            resize_plane(&src, (4, 1), 2, (2, 1), ResizeType::Nearest),
            [3, 4, 7, 8]
        );
    }

    #[test]
    fn bilinear_interpolates_between_neighbours() {
        assert_eq!(
            resize_plane(&[0, 100], (2, 1), 1, (4, 1), ResizeType::Bilinear),
            [0, 25, 75, 100]
        );
        assert_eq!(
            resize_plane(&[10, 20, 30, 40], (4, 1), 1, (2, 1), ResizeType::Bilinear),
            [15, 35]
        );
    }

    #[test]
    fn bilinear_averages_four_pixels() {
        // 2x2 down to 1x1 lands exactly between all four samples
        assert_eq!(
            resize_plane(&[0, 100, 100, 200], (2, 2), 1, (1, 1), ResizeType::Bilinear),
            [100]
        );
    }

    #[test]
    fn output_has_requested_size() {
        let src = vec![7u8; 200 * 100];
        for kind in [ResizeType::Nearest, ResizeType::Bilinear] {
            let out = resize_plane(&src, (200, 100), 1, (33, 17), kind);
            assert_eq!(out.len(), 33 * 17);
            assert!(out.iter().all(|&v| v == 7));
        }
    }
}
