//! qoiview - progressive QOI image viewer core
//!
//! The [`decoder`] module streams a QOI file on a background worker and hands
//! finished scanlines to the caller in batches, so a renderer can show the
//! image while it is still being decoded.

pub mod decoder;
pub mod util;

pub use decoder::{AsyncDecoder, DecodeState, DecoderConfig, Descriptor, Task};
