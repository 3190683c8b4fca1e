use crate::decoder::Channels;

/// Write RGB pixels into an RGBA8 destination of matching pixel count
///
/// Every pixel gets an opaque alpha channel.
pub fn expand_rgb_into(rgb: &[u8], rgba: &mut [u8]) {
    debug_assert_eq!(rgb.len() / 3, rgba.len() / 4);

    for (src, dst) in rgb.chunks_exact(3).zip(rgba.chunks_exact_mut(4)) {
        dst[..3].copy_from_slice(src);
        dst[3] = 255; // A (opaque)
    }
}

/// Copy a batch of decoded rows into an RGBA8 canvas
///
/// This is what a renderer does with each `Work` when its texture is RGBA.
///
/// # Arguments
/// * `canvas` - Full image in RGBA8, `width * height * 4` bytes
/// * `rows` - Decoded rows in `channels` layout
/// * `start_row` - Row index of the first row in `rows`
/// * `width` - Image width in pixels
pub fn blit_rows_rgba8(canvas: &mut [u8], rows: &[u8], channels: Channels, start_row: usize, width: usize) {
    let offset = start_row * width * 4;
    let pixel_count = rows.len() / channels.count();
    let Some(dst) = canvas.get_mut(offset..offset + pixel_count * 4) else {
        log::warn!(
            "Rows starting at {} do not fit a canvas of {} bytes",
            start_row,
            canvas.len()
        );
        return;
    };

    match channels {
        Channels::Rgba => dst.copy_from_slice(rows),
        Channels::Rgb => expand_rgb_into(rows, dst),
    }
}
