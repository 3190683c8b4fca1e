use std::io::{self, Read};

/// Sliding staging buffer between the file and the codec
///
/// Bytes the codec could not consume (a torn opcode at the end of a chunk)
/// stay pending and are moved to the front before the next read, so the
/// codec always sees them contiguous with the bytes that follow.
pub struct InputBuffer {
    buf: Vec<u8>,
    start: usize,
    end: usize,
}

impl InputBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity],
            start: 0,
            end: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Drop all pending bytes
    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    /// Bytes staged but not yet consumed
    pub fn pending(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Mark `count` pending bytes as consumed
    pub fn consume(&mut self, count: usize) {
        debug_assert!(count <= self.end - self.start);
        self.start = (self.start + count).min(self.end);
        if self.start == self.end {
            self.clear();
        }
    }

    /// Move leftovers to the front and read at most `limit` new bytes after them
    ///
    /// Returns the number of bytes read, `0` meaning end of file or no room.
    pub fn fill_from<R: Read>(&mut self, reader: &mut R, limit: usize) -> io::Result<usize> {
        if self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }

        let room = (self.buf.len() - self.end).min(limit);
        if room == 0 {
            return Ok(0);
        }

        loop {
            match reader.read(&mut self.buf[self.end..self.end + room]) {
                Ok(read) => {
                    self.end += read;
                    return Ok(read);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_leftover_moves_to_front() {
        let mut reader = Cursor::new((0u8..20).collect::<Vec<_>>());
        let mut input = InputBuffer::with_capacity(8);

        assert_eq!(input.fill_from(&mut reader, usize::MAX).unwrap(), 8);
        assert_eq!(input.pending(), &[0, 1, 2, 3, 4, 5, 6, 7]);

        input.consume(5);
        assert_eq!(input.pending(), &[5, 6, 7]);

        // only the free tail after the leftover is filled
        assert_eq!(input.fill_from(&mut reader, usize::MAX).unwrap(), 5);
        assert_eq!(input.pending(), &[5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn test_limit_and_eof() {
        let mut reader = Cursor::new(vec![1u8, 2, 3]);
        let mut input = InputBuffer::with_capacity(16);

        assert_eq!(input.fill_from(&mut reader, 2).unwrap(), 2);
        assert_eq!(input.pending(), &[1, 2]);
        assert_eq!(input.fill_from(&mut reader, 10).unwrap(), 1);
        assert_eq!(input.fill_from(&mut reader, 10).unwrap(), 0);
        assert_eq!(input.pending(), &[1, 2, 3]);

        input.consume(3);
        assert!(input.is_empty());
    }

    #[test]
    fn test_full_buffer_reads_nothing() {
        let mut reader = Cursor::new(vec![7u8; 32]);
        let mut input = InputBuffer::with_capacity(4);

        assert_eq!(input.fill_from(&mut reader, usize::MAX).unwrap(), 4);
        assert_eq!(input.fill_from(&mut reader, usize::MAX).unwrap(), 0);
        assert_eq!(input.capacity(), 4);

        input.clear();
        assert!(input.pending().is_empty());
    }
}
