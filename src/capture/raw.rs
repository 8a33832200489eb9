//! Raw NV12 file source

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::PathBuf;

use bytes::BytesMut;
use tracing::{debug, info};

use crate::capture::decoder::{Decoder, DecoderFactory, StopToken};
use crate::capture::frame::{DecodedPicture, PixelFormat, StreamInfo};
use crate::error::{DecodeError, InitializationError};
use crate::RawStreamConfig;

/// Reads back-to-back NV12 pictures of a fixed size from a file
pub struct RawFileDecoder {
    path: PathBuf,
    reader: BufReader<File>,
    info: StreamInfo,
    frames: u64,
}

impl RawFileDecoder {
    pub fn open(path: impl Into<PathBuf>, raw: &RawStreamConfig) -> Result<Self, InitializationError> {
        let path = path.into();
        let file = File::open(&path).map_err(|e| InitializationError::Open {
            url: path.display().to_string(),
            reason: e.to_string(),
        })?;
        info!("Opened raw NV12 source {}", path.display());

        Ok(Self {
            path,
            reader: BufReader::new(file),
            info: StreamInfo {
                framerate_num: raw.framerate_num,
                framerate_den: raw.framerate_den,
                width: raw.width,
                height: raw.height,
                reorder_depth: None,
            },
            frames: 0,
        })
    }
}

impl Decoder for RawFileDecoder {
    fn probe(&mut self) -> Result<StreamInfo, InitializationError> {
        let len = self
            .reader
            .get_ref()
            .metadata()
            .map_err(|e| InitializationError::Probe {
                url: self.path.display().to_string(),
                reason: e.to_string(),
            })?
            .len();
        let frame_len = PixelFormat::Nv12.frame_len(self.info.width, self.info.height) as u64;
        if frame_len == 0 || len < frame_len {
            return Err(InitializationError::Probe {
                url: self.path.display().to_string(),
                reason: format!("{len} bytes cannot hold one {frame_len}-byte picture"),
            });
        }
        debug!("Raw source holds {} pictures", len / frame_len);
        Ok(self.info)
    }

    fn pull(&mut self, _stop: &StopToken) -> Result<Option<DecodedPicture>, DecodeError> {
        let len = PixelFormat::Nv12.frame_len(self.info.width, self.info.height);
        let mut buf = BytesMut::zeroed(len);
        match self.reader.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => {
                return Err(DecodeError::Failed {
                    after: self.frames.checked_sub(1),
                    reason: e.to_string(),
                })
            }
        }

        let pts = self.info.pts_of(self.frames);
        self.frames += 1;
        Ok(Some(DecodedPicture {
            width: self.info.width,
            height: self.info.height,
            data: buf.freeze(),
            pts: Some(pts),
        }))
    }
}

/// Opens file paths as raw NV12 streams of the configured geometry
#[derive(Debug, Clone)]
pub struct RawFileFactory {
    pub raw: RawStreamConfig,
}

impl DecoderFactory for RawFileFactory {
    fn open(&self, url: &str) -> Result<Box<dyn Decoder>, InitializationError> {
        let path = url.strip_prefix("file://").unwrap_or(url);
        Ok(Box::new(RawFileDecoder::open(path, &self.raw)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn raw_config() -> RawStreamConfig {
        RawStreamConfig {
            width: 4,
            height: 2,
            framerate_num: 30,
            framerate_den: 1,
        }
    }

    #[test]
    fn reads_whole_pictures_then_ends() {
        let path = std::env::temp_dir().join(format!("raw_decoder_{}.nv12", std::process::id()));
        {
            let mut file = File::create(&path).unwrap();
            // two pictures of 12 bytes plus a truncated tail
            file.write_all(&[7u8; 12]).unwrap();
            file.write_all(&[9u8; 12]).unwrap();
            file.write_all(&[1u8; 5]).unwrap();
        }

        let mut decoder = RawFileFactory { raw: raw_config() }
            .open(path.to_str().unwrap())
            .unwrap();
        let stop = StopToken::new();
        assert_eq!(decoder.probe().unwrap().frame_size(), (4, 2));
        assert_eq!(decoder.pull(&stop).unwrap().unwrap().data[0], 7);
        assert_eq!(decoder.pull(&stop).unwrap().unwrap().data[0], 9);
        assert!(decoder.pull(&stop).unwrap().is_none());

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_file_fails_open() {
        let err = RawFileFactory { raw: raw_config() }
            .open("/nonexistent/stream.nv12")
            .err()
            .unwrap();
        assert!(matches!(err, InitializationError::Open { .. }));
    }
}
