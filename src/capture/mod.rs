pub mod decoder;
pub mod frame;
pub mod raw;
pub mod synthetic;

pub use decoder::{Decoder, DecoderFactory, StopToken};
pub use frame::{DecodedPicture, Picture, PixelFormat, StreamInfo};
pub use raw::{RawFileDecoder, RawFileFactory};
pub use synthetic::{SyntheticDecoder, SyntheticFactory};
