use super::config::Limits;
use super::error::CodecError;
use super::header::{parse_header, HEADER_SIZE};
use super::{Channels, Descriptor};

const QOI_OP_INDEX: u8 = 0x00;
const QOI_OP_DIFF: u8 = 0x40;
const QOI_OP_LUMA: u8 = 0x80;
const QOI_OP_RUN: u8 = 0xc0;
const QOI_OP_RGB: u8 = 0xfe;
const QOI_OP_RGBA: u8 = 0xff;
const QOI_MASK_2: u8 = 0xc0;

/// Longest opcode in bytes (`QOI_OP_RGBA` plus its payload)
pub const MAX_OPCODE_LEN: usize = 5;

/// Result of one [`StreamCodec::decode`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    /// Bytes written into the output window
    pub written: usize,
    /// Bytes consumed from the input window
    pub processed: usize,
}

/// A resumable byte-stream decoder driven by the worker
///
/// Implementations consume whole opcodes only. When the input window ends in
/// the middle of an opcode the call stops before it and reports the bytes it
/// did consume, so the caller can carry the remainder into the next call.
/// A run that does not fit the output window stays pending until
/// [`drain_run`](StreamCodec::drain_run) or the next `decode` flushes it.
pub trait StreamCodec {
    /// Forget all state from a previous image
    fn reset(&mut self);

    /// Read the header and prepare for a new pixel stream
    fn initialize(
        &mut self,
        header: &[u8; HEADER_SIZE],
        requested_channels: Option<Channels>,
        limits: &Limits,
    ) -> Result<Descriptor, CodecError>;

    /// Decode as much of `input` as fits into `output`
    fn decode(&mut self, output: &mut [u8], input: &[u8]) -> Result<Progress, CodecError>;

    /// Whether a run is still waiting to be written out
    fn has_run_count(&self) -> bool;

    /// Write as much of the pending run as fits, returning bytes written
    fn drain_run(&mut self, output: &mut [u8]) -> usize;
}

/// Streaming QOI opcode decoder
///
/// Keeps the previous pixel, the 64 entry color index and the remaining run
/// length across calls so the stream may be fed in arbitrary slices.
pub struct QoiStreamDecoder {
    desc: Option<Descriptor>,
    index: [[u8; 4]; 64],
    px: [u8; 4],
    run: usize,
}

impl Default for QoiStreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl QoiStreamDecoder {
    pub const fn new() -> Self {
        Self {
            desc: None,
            index: [[0; 4]; 64],
            px: [0, 0, 0, 255],
            run: 0,
        }
    }

    fn output_channels(&self) -> Result<usize, CodecError> {
        self.desc
            .map(|desc| desc.channels.count())
            .ok_or(CodecError::Uninitialized)
    }

    #[inline]
    fn color_hash(px: [u8; 4]) -> usize {
        let [r, g, b, a] = px.map(usize::from);
        (r * 3 + g * 5 + b * 7 + a * 11) % 64
    }

    /// Apply one complete opcode to the decoder state
    #[allow(clippy::identity_op)]
    fn apply(&mut self, op: &[u8]) {
        let chunk = op[0];
        let px = &mut self.px;

        if chunk == QOI_OP_RGB {
            px[..3].copy_from_slice(&op[1..4]);
        } else if chunk == QOI_OP_RGBA {
            px.copy_from_slice(&op[1..5]);
        } else {
            match chunk & QOI_MASK_2 {
                QOI_OP_INDEX => *px = self.index[usize::from(chunk & 63)],
                QOI_OP_DIFF => {
                    px[0] = px[0].wrapping_add(((chunk >> 4) & 0x03).wrapping_sub(2));
                    px[1] = px[1].wrapping_add(((chunk >> 2) & 0x03).wrapping_sub(2));
                    px[2] = px[2].wrapping_add(((chunk >> 0) & 0x03).wrapping_sub(2));
                }
                QOI_OP_LUMA => {
                    let b2 = op[1];
                    let vg = (chunk & 0x3f).wrapping_sub(32);

                    px[0] = px[0].wrapping_add(vg.wrapping_sub(8).wrapping_add((b2 >> 4) & 0x0f));
                    px[1] = px[1].wrapping_add(vg);
                    px[2] = px[2].wrapping_add(vg.wrapping_sub(8).wrapping_add((b2 >> 0) & 0x0f));
                }
                // QOI_OP_RUN, the pixel itself is written by the caller
                _ => self.run = usize::from(chunk & 0x3f),
            }
        }

        self.index[Self::color_hash(self.px)] = self.px;
    }
}

const fn opcode_len(chunk: u8) -> usize {
    match chunk {
        QOI_OP_RGB => 4,
        QOI_OP_RGBA => 5,
        _ if chunk & QOI_MASK_2 == QOI_OP_LUMA => 2,
        _ => 1,
    }
}

impl StreamCodec for QoiStreamDecoder {
    fn reset(&mut self) {
        *self = Self::new();
    }

    fn initialize(
        &mut self,
        header: &[u8; HEADER_SIZE],
        requested_channels: Option<Channels>,
        limits: &Limits,
    ) -> Result<Descriptor, CodecError> {
        self.reset();

        let mut desc = parse_header(header, limits)?;
        if let Some(channels) = requested_channels {
            desc.channels = channels;
        }
        self.desc = Some(desc);

        Ok(desc)
    }

    fn decode(&mut self, output: &mut [u8], input: &[u8]) -> Result<Progress, CodecError> {
        let channels = self.output_channels()?;

        let mut written = self.drain_run(output);
        let mut processed = 0;

        while output.len() - written >= channels {
            let Some(&chunk) = input.get(processed) else {
                break;
            };
            let Some(op) = input.get(processed..processed + opcode_len(chunk)) else {
                // torn opcode, leave it for the next call
                break;
            };

            self.apply(op);
            processed += op.len();

            output[written..written + channels].copy_from_slice(&self.px[..channels]);
            written += channels;

            if self.run > 0 {
                written += self.drain_run(&mut output[written..]);
            }
        }

        Ok(Progress { written, processed })
    }

    fn has_run_count(&self) -> bool {
        self.run > 0
    }

    fn drain_run(&mut self, output: &mut [u8]) -> usize {
        let Ok(channels) = self.output_channels() else {
            return 0;
        };

        let count = self.run.min(output.len() / channels);
        for pixel in output.chunks_exact_mut(channels).take(count) {
            pixel.copy_from_slice(&self.px[..channels]);
        }
        self.run -= count;

        count * channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::header::encode_header;

    fn initialized(width: u32, height: u32, channels: u8) -> QoiStreamDecoder {
        let mut codec = QoiStreamDecoder::new();
        codec
            .initialize(&encode_header(width, height, channels, 0), None, &Limits::default())
            .unwrap();
        codec
    }

    #[test]
    fn test_decode_before_initialize() {
        let mut codec = QoiStreamDecoder::new();
        let mut out = [0u8; 8];
        assert_eq!(codec.decode(&mut out, &[QOI_OP_RUN]), Err(CodecError::Uninitialized));
        assert_eq!(codec.drain_run(&mut out), 0);
    }

    #[test]
    fn test_uniform_run_fills_output() {
        let mut codec = initialized(4, 4, 4);
        // one explicit pixel, then 15 repeats (bias of one)
        let stream = [QOI_OP_RGBA, 10, 20, 30, 40, QOI_OP_RUN | 14];
        let mut out = vec![0u8; 64];

        let progress = codec.decode(&mut out, &stream).unwrap();

        assert_eq!(progress, Progress { written: 64, processed: 6 });
        assert!(!codec.has_run_count());
        assert!(out.chunks_exact(4).all(|px| px == [10, 20, 30, 40]));
    }

    #[test]
    fn test_run_larger_than_window_stays_pending() {
        let mut codec = initialized(8, 1, 3);
        let stream = [QOI_OP_RGB, 1, 2, 3, QOI_OP_RUN | 6];
        let mut out = vec![0u8; 8 * 3];

        let first = codec.decode(&mut out[..9], &stream).unwrap();
        assert_eq!(first, Progress { written: 9, processed: 5 });
        assert!(codec.has_run_count());

        let drained = codec.drain_run(&mut out[9..]);
        assert_eq!(drained, 15);
        assert!(!codec.has_run_count());
        assert!(out.chunks_exact(3).all(|px| px == [1, 2, 3]));
    }

    #[test]
    fn test_torn_opcode_is_not_consumed() {
        let mut codec = initialized(2, 1, 4);
        let mut out = vec![0u8; 8];

        let progress = codec.decode(&mut out, &[QOI_OP_RGBA, 9, 9]).unwrap();
        assert_eq!(progress, Progress::default());

        let progress = codec.decode(&mut out, &[QOI_OP_RGBA, 9, 9, 9, 9]).unwrap();
        assert_eq!(progress, Progress { written: 4, processed: 5 });
    }

    #[test]
    fn test_byte_at_a_time_matches_single_call() {
        // exercise every opcode kind: rgb, diff, luma, index, rgba, run
        let stream = [
            QOI_OP_RGB, 100, 150, 200, // (100,150,200,255)
            QOI_OP_DIFF | 0b11_10_01,  // r+1 g+0 b-1
            QOI_OP_LUMA | 40, 0x9a,    // vg = 8
            QOI_OP_RGBA, 1, 2, 3, 4,
            QOI_OP_RUN | 1,
            QOI_OP_INDEX | ((100 * 3 + 150 * 5 + 200 * 7 + 255 * 11) % 64) as u8,
        ];
        let pixels = 7;

        let mut whole = initialized(pixels, 1, 4);
        let mut expected = vec![0u8; pixels as usize * 4];
        let progress = whole.decode(&mut expected, &stream).unwrap();
        assert_eq!(progress.processed, stream.len());
        assert_eq!(progress.written, expected.len());

        let mut split = initialized(pixels, 1, 4);
        let mut actual = vec![0u8; pixels as usize * 4];
        let mut offset_out = 0;
        let mut pending: Vec<u8> = Vec::new();
        for byte in stream {
            pending.push(byte);
            let progress = split.decode(&mut actual[offset_out..], &pending).unwrap();
            offset_out += progress.written;
            pending.drain(..progress.processed);
        }

        assert!(pending.is_empty());
        assert_eq!(actual, expected);
        assert_eq!(&expected[..4], &[100, 150, 200, 255]);
        assert_eq!(&expected[4..8], &[101, 150, 199, 255]);
        assert_eq!(&expected[8..12], &[101 + 8 + 1, 150 + 8, 199 + 8 + 2, 255]);
        assert_eq!(&expected[12..16], &[1, 2, 3, 4]);
        assert_eq!(&expected[16..24], &[1, 2, 3, 4, 1, 2, 3, 4]);
        assert_eq!(&expected[24..28], &[100, 150, 200, 255]);
    }

    #[test]
    fn test_requested_channels() {
        let mut codec = QoiStreamDecoder::new();
        let desc = codec
            .initialize(&encode_header(2, 1, 3, 0), Some(Channels::Rgba), &Limits::default())
            .unwrap();
        assert_eq!(desc.channels, Channels::Rgba);

        let mut out = vec![0u8; 8];
        codec.decode(&mut out, &[QOI_OP_RGB, 7, 8, 9, QOI_OP_RUN]).unwrap();
        assert_eq!(out, [7, 8, 9, 255, 7, 8, 9, 255]);

        let mut codec = QoiStreamDecoder::new();
        codec
            .initialize(&encode_header(1, 1, 4, 0), Some(Channels::Rgb), &Limits::default())
            .unwrap();
        let mut out = vec![0u8; 3];
        codec.decode(&mut out, &[QOI_OP_RGBA, 7, 8, 9, 10]).unwrap();
        assert_eq!(out, [7, 8, 9]);
    }

    #[test]
    fn test_initialize_rejects_bad_header() {
        let mut codec = QoiStreamDecoder::new();
        let mut header = encode_header(1, 1, 4, 0);
        header[0] = b'x';
        assert!(matches!(
            codec.initialize(&header, None, &Limits::default()),
            Err(CodecError::Header(_))
        ));
        assert_eq!(
            codec.decode(&mut [0u8; 4], &[QOI_OP_RUN]),
            Err(CodecError::Uninitialized)
        );
    }
}
