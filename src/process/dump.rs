//! Persisting post-processed frames for inspection

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{Error, Result, ValidationError};
use crate::process::params::{FourCC, FrameParameters, Planes};
use crate::process::tensor::Tensor;
use crate::DumpConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpFormat {
    /// Append raw 8-bit samples to `<name>.raw`, one frame after another
    #[default]
    Raw,
    /// Overwrite `<name>.png` with the latest frame
    Png,
}

/// File names keep to `[A-Za-z0-9_-]`
fn file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() {
        "default".into()
    } else {
        stem
    }
}

/// Checks `tensor` is what `params` would have produced
fn check_layout(tensor: &Tensor, params: &FrameParameters) -> Result<()> {
    let layout = &tensor.layout;
    let resize = &params.resize;
    let size_matches = (resize.width, resize.height) == (0, 0)
        || (resize.width, resize.height) == (layout.width, layout.height);
    let matches = size_matches
        && layout.format == params.color.format
        && layout.planes == params.color.planes
        && layout.normalized == params.color.normalization
        && tensor.data.len() == layout.element_count();
    if matches {
        Ok(())
    } else {
        Err(ValidationError::LayoutMismatch {
            expected: format!("{:?} {:?}", params.resize, params.color),
            actual: layout.to_string(),
        }
        .into())
    }
}

/// Writes `tensor` under a path derived from `name` and returns that path
#[instrument(skip(tensor, params, config), fields(layout = %tensor.layout))]
pub fn dump(tensor: &Tensor, name: &str, params: &FrameParameters, config: &DumpConfig) -> Result<PathBuf> {
    params.validate()?;
    check_layout(tensor, params)?;
    fs::create_dir_all(&config.dir).map_err(|source| Error::Io {
        path: config.dir.clone(),
        source,
    })?;

    let bytes = tensor.data.to_u8();
    let path = match config.format {
        DumpFormat::Raw => {
            let path = config.dir.join(format!("{}.raw", file_stem(name)));
            append(&path, &bytes)?;
            path
        }
        DumpFormat::Png => {
            let path = config.dir.join(format!("{}.png", file_stem(name)));
            write_png(&path, tensor, bytes)?;
            path
        }
    };
    debug!("Dumped frame to {}", path.display());
    Ok(path)
}

fn append(path: &Path, bytes: &[u8]) -> Result<()> {
    let io_err = |source| Error::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_err)?;
    file.write_all(bytes).map_err(io_err)
}

fn write_png(path: &Path, tensor: &Tensor, bytes: Vec<u8>) -> Result<()> {
    let layout = &tensor.layout;
    let (w, h) = (layout.width, layout.height);
    let plane = w as usize * h as usize;

    // PNG wants interleaved RGB
    let interleave = |bytes: Vec<u8>, order: [usize; 3]| -> Vec<u8> {
        let mut rgb = vec![0u8; plane * 3];
        for pixel in 0..plane {
            for (dst, &src) in order.iter().enumerate() {
                rgb[pixel * 3 + dst] = match layout.planes {
                    Planes::Merged => bytes[pixel * 3 + src],
                    Planes::Planar => bytes[src * plane + pixel],
                };
            }
        }
        rgb
    };

    let (buffer, color) = match layout.format {
        FourCC::Y800 => (bytes, image::ColorType::L8),
        FourCC::Rgb24 => (interleave(bytes, [0, 1, 2]), image::ColorType::Rgb8),
        FourCC::Bgr24 => (interleave(bytes, [2, 1, 0]), image::ColorType::Rgb8),
    };
    image::save_buffer(path, &buffer, w, h, color).map_err(|source| Error::Image {
        path: path.to_path_buf(),
        source,
    })
}
