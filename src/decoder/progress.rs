use std::ops::Range;

use super::Descriptor;

/// Turns the worker's byte offset into ranges of fully decoded rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    row_width: usize,
    height: usize,
    line_start: usize,
}

impl Cursor {
    pub fn new(desc: &Descriptor) -> Self {
        Self {
            row_width: desc.row_width(),
            height: desc.height as usize,
            line_start: 0,
        }
    }

    /// Next row not yet reported
    pub const fn line_start(&self) -> usize {
        self.line_start
    }

    pub const fn row_width(&self) -> usize {
        self.row_width
    }

    /// All rows have been handed out
    pub const fn is_done(&self) -> bool {
        self.line_start >= self.height
    }

    /// Number of rows fully covered by `offset_out` bytes
    pub fn completed_rows(&self, offset_out: usize) -> usize {
        (offset_out / self.row_width).min(self.height)
    }

    /// Report the rows completed since the last call and move past them
    ///
    /// Returns `None` when no new row is complete.
    pub fn advance(&mut self, offset_out: usize) -> Option<Range<usize>> {
        let stop = self.completed_rows(offset_out);
        if stop <= self.line_start {
            return None;
        }

        let rows = self.line_start..stop;
        self.line_start = stop;
        Some(rows)
    }

    /// Byte range of `rows` inside the pixel buffer
    pub fn byte_range(&self, rows: &Range<usize>) -> Range<usize> {
        rows.start * self.row_width..rows.end * self.row_width
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{Channels, Colorspace};

    fn desc(width: u32, height: u32) -> Descriptor {
        Descriptor {
            width,
            height,
            channels: Channels::Rgba,
            colorspace: Colorspace::Srgb,
        }
    }

    #[test]
    fn test_partial_rows_are_not_reported() {
        let mut cursor = Cursor::new(&desc(4, 4));
        assert_eq!(cursor.row_width(), 16);

        assert_eq!(cursor.advance(0), None);
        assert_eq!(cursor.advance(15), None);
        assert_eq!(cursor.advance(16), Some(0..1));
        assert_eq!(cursor.advance(16), None);
        assert_eq!(cursor.advance(47), Some(1..2));
    }

    #[test]
    fn test_row_boundary_keeps_coverage_contiguous() {
        let mut cursor = Cursor::new(&desc(4, 4));

        assert_eq!(cursor.advance(32), Some(0..2));
        assert_eq!(cursor.line_start(), 2);
        assert_eq!(cursor.advance(48), Some(2..3));
        assert!(!cursor.is_done());
        assert_eq!(cursor.advance(64), Some(3..4));
        assert!(cursor.is_done());
        assert_eq!(cursor.advance(64), None);
    }

    #[test]
    fn test_byte_range_and_clamp() {
        let mut cursor = Cursor::new(&desc(2, 3));
        assert_eq!(cursor.completed_rows(1000), 3);

        let rows = cursor.advance(1000).unwrap();
        assert_eq!(rows, 0..3);
        assert_eq!(cursor.byte_range(&rows), 0..24);
    }
}
