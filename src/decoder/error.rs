use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced to the consumer by [`AsyncDecoder::prepare`](super::AsyncDecoder::prepare)
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid header: {0}")]
    InvalidHeader(#[from] HeaderError),

    #[error("decode error: {0}")]
    Codec(#[from] CodecError),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

/// Reasons a 14 byte header is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("wrong magic bytes {0:02x?}, expected `qoif`")]
    WrongMagic([u8; 4]),

    #[error("zero sized image {width}x{height}")]
    ZeroDimensions { width: u32, height: u32 },

    #[error("image {width}x{height} exceeds the configured limits")]
    TooLarge { width: u32, height: u32 },

    #[error("unknown channel count {0}, expected 3 or 4")]
    UnknownChannels(u8),
}

/// Failures raised by a [`StreamCodec`](super::StreamCodec) while decoding
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("codec used before a header was initialized")]
    Uninitialized,

    /// Not raised by `QoiStreamDecoder`, every byte sequence is a valid QOI
    /// stream. Other codecs report rejected input with it.
    #[error("malformed stream at byte {offset}: {reason}")]
    Malformed { offset: usize, reason: &'static str },

    #[error(transparent)]
    Header(#[from] HeaderError),
}

pub type Result<T> = std::result::Result<T, Error>;
