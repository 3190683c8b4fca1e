use std::env;
use std::str::FromStr;

use super::codec::MAX_OPCODE_LEN;
use super::Channels;

/// Default number of bytes read from disk per worker iteration
pub const DEFAULT_CHUNK_SIZE: usize = 48 * 1024;

/// Smallest accepted chunk. A torn opcode plus its missing tail must fit.
pub const MIN_CHUNK_SIZE: usize = MAX_OPCODE_LEN;

/// Ceilings applied to headers before any buffer is allocated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_width: u32,
    pub max_height: u32,
    pub max_pixels: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_width: 1 << 14,
            max_height: 1 << 14,
            max_pixels: 400_000_000,
        }
    }
}

/// When the codec's pending run is flushed relative to a cancel request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainOrder {
    /// Flush the run into the buffer, then honor the cancel
    #[default]
    BeforeCancel,
    /// Honor the cancel immediately and discard the run
    AfterCancel,
}

/// Tuning knobs for [`AsyncDecoder`](super::AsyncDecoder)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    chunk_size: usize,
    pub limits: Limits,
    pub requested_channels: Option<Channels>,
    pub drain_order: DrainOrder,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            limits: Limits::default(),
            requested_channels: None,
            drain_order: DrainOrder::default(),
        }
    }
}

impl DecoderConfig {
    /// Default configuration overlaid with `QOIVIEW_*` environment variables
    ///
    /// Recognized variables:
    /// * `QOIVIEW_CHUNK_SIZE` - bytes read per worker iteration
    /// * `QOIVIEW_MAX_WIDTH` / `QOIVIEW_MAX_HEIGHT` - header ceilings
    /// * `QOIVIEW_CHANNELS` - `3` or `4`, forces the output layout
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(size) = env_value::<usize>("QOIVIEW_CHUNK_SIZE") {
            config = config.set_chunk_size(size);
        }
        if let Some(width) = env_value::<u32>("QOIVIEW_MAX_WIDTH") {
            config.limits.max_width = width;
        }
        if let Some(height) = env_value::<u32>("QOIVIEW_MAX_HEIGHT") {
            config.limits.max_height = height;
        }
        if let Some(count) = env_value::<u8>("QOIVIEW_CHANNELS") {
            match Channels::from_count(count) {
                Some(channels) => config.requested_channels = Some(channels),
                None => log::warn!("Ignoring QOIVIEW_CHANNELS={}, expected 3 or 4", count),
            }
        }

        config
    }

    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Set the read chunk size, clamped to [`MIN_CHUNK_SIZE`]
    pub fn set_chunk_size(mut self, size: usize) -> Self {
        if size < MIN_CHUNK_SIZE {
            log::warn!("Chunk size {} too small, using {}", size, MIN_CHUNK_SIZE);
        }
        self.chunk_size = size.max(MIN_CHUNK_SIZE);
        self
    }

    pub fn set_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn set_requested_channels(mut self, channels: Option<Channels>) -> Self {
        self.requested_channels = channels;
        self
    }

    pub fn set_drain_order(mut self, order: DrainOrder) -> Self {
        self.drain_order = order;
        self
    }
}

fn env_value<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring unparsable {}={:?}", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_size_is_clamped() {
        let config = DecoderConfig::default().set_chunk_size(2);
        assert_eq!(config.chunk_size(), MIN_CHUNK_SIZE);

        let config = DecoderConfig::default().set_chunk_size(64 * 1024);
        assert_eq!(config.chunk_size(), 64 * 1024);
    }

    #[test]
    fn test_defaults() {
        let config = DecoderConfig::default();
        assert_eq!(config.chunk_size(), DEFAULT_CHUNK_SIZE);
        assert_eq!(config.drain_order, DrainOrder::BeforeCancel);
        assert_eq!(config.requested_channels, None);
        assert_eq!(config.limits.max_width, 1 << 14);
    }
}
