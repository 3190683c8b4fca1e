use super::config::Limits;
use super::error::HeaderError;
use super::{Channels, Colorspace, Descriptor};

pub const MAGIC: [u8; 4] = *b"qoif";

/// 4 magic + 4 width + 4 height + 1 channels + 1 colorspace
pub const HEADER_SIZE: usize = 14;

pub const END_MARKER: [u8; 8] = [0, 0, 0, 0, 0, 0, 0, 1];
pub const END_MARKER_SIZE: usize = END_MARKER.len();

/// Parse and validate the fixed size QOI header
pub fn parse_header(bytes: &[u8; HEADER_SIZE], limits: &Limits) -> Result<Descriptor, HeaderError> {
    let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
    if magic != MAGIC {
        return Err(HeaderError::WrongMagic(magic));
    }

    let width = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let height = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);

    if width == 0 || height == 0 {
        return Err(HeaderError::ZeroDimensions { width, height });
    }

    let pixels = u64::from(width) * u64::from(height);
    if width > limits.max_width || height > limits.max_height || pixels > limits.max_pixels {
        return Err(HeaderError::TooLarge { width, height });
    }

    let channels = Channels::from_count(bytes[12]).ok_or(HeaderError::UnknownChannels(bytes[12]))?;

    let colorspace = match bytes[13] {
        0 => Colorspace::Srgb,
        1 => Colorspace::Linear,
        other => {
            log::warn!("Unknown colorspace value {}, expected 0 or 1, assuming sRGB", other);
            Colorspace::Srgb
        }
    };

    Ok(Descriptor {
        width,
        height,
        channels,
        colorspace,
    })
}

#[cfg(test)]
pub(crate) fn encode_header(width: u32, height: u32, channels: u8, colorspace: u8) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[..4].copy_from_slice(&MAGIC);
    header[4..8].copy_from_slice(&width.to_be_bytes());
    header[8..12].copy_from_slice(&height.to_be_bytes());
    header[12] = channels;
    header[13] = colorspace;
    header
}
