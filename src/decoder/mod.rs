pub mod codec;
pub mod config;
pub mod error;
pub mod header;
pub mod input;
pub mod progress;
pub mod worker;


use std::fmt;
use std::path::PathBuf;

pub use codec::{Progress, QoiStreamDecoder, StreamCodec};
pub use config::{DecoderConfig, DrainOrder, Limits};
pub use error::{CodecError, Error, HeaderError, Result};
pub use worker::{AsyncDecoder, DecodeState, Paused, Preparation, Work};

/// Pixel layout of a decoded image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channels {
    Rgb,
    Rgba,
}

impl Channels {
    /// Bytes per pixel
    pub const fn count(self) -> usize {
        match self {
            Channels::Rgb => 3,
            Channels::Rgba => 4,
        }
    }

    pub const fn from_count(count: u8) -> Option<Self> {
        match count {
            3 => Some(Channels::Rgb),
            4 => Some(Channels::Rgba),
            _ => None,
        }
    }
}

impl fmt::Display for Channels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channels::Rgb => write!(f, "RGB"),
            Channels::Rgba => write!(f, "RGBA"),
        }
    }
}

/// Colorspace tag stored in the header. Carried through, never applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Colorspace {
    #[default]
    Srgb,
    Linear,
}

/// Validated image description, produced once per prepared file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub width: u32,
    pub height: u32,
    pub channels: Channels,
    pub colorspace: Colorspace,
}

impl Descriptor {
    /// Width of one scanline in bytes
    pub fn row_width(&self) -> usize {
        self.width as usize * self.channels.count()
    }

    /// Size of the fully decoded pixel buffer in bytes
    pub fn buffer_size(&self) -> usize {
        self.row_width() * self.height as usize
    }
}

/// The file currently targeted by the decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub path: PathBuf,
    pub desc: Descriptor,
}
