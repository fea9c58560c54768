//! Packed-Data Cursor
//!
//! Sequential reader over a PI-data instruction stream, including the
//! variable-length count encoding used by the instruction operands.

use crate::error::UnpackError;

/// Maximum number of bytes in a variable-length count
pub const MAX_COUNT_BYTES: usize = 5;

/// High bit set on every count byte except the last
pub const COUNT_CONTINUE: u8 = 0x80;

/// Payload bits carried by each count byte
pub const COUNT_PAYLOAD: u8 = 0x7F;

/// Bounds-checked cursor over packed bytes
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    /// Create cursor at the start of `bytes`
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Current offset
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Whether the stream is exhausted
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Move to an absolute offset within the stream
    pub fn seek(&mut self, pos: usize) -> Result<(), UnpackError> {
        if pos > self.bytes.len() {
            return Err(UnpackError::Truncated);
        }
        self.pos = pos;
        Ok(())
    }

    /// Read one byte
    pub fn next_byte(&mut self) -> Result<u8, UnpackError> {
        let byte = *self.bytes.get(self.pos).ok_or(UnpackError::Truncated)?;
        self.pos += 1;
        Ok(byte)
    }

    /// Read `len` bytes
    pub fn take(&mut self, len: usize) -> Result<&'a [u8], UnpackError> {
        let end = self.pos.checked_add(len).ok_or(UnpackError::Truncated)?;
        let slice = self.bytes.get(self.pos..end).ok_or(UnpackError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    /// Read a variable-length count.
    ///
    /// Bytes are consumed until one has the continuation bit clear. The fifth
    /// byte always terminates the count, whatever its high bit says.
    pub fn read_count(&mut self) -> Result<u32, UnpackError> {
        let mut value = 0u32;

        for _ in 0..MAX_COUNT_BYTES {
            let byte = self.next_byte()?;
            value = (value << 7) | u32::from(byte & COUNT_PAYLOAD);
            if byte & COUNT_CONTINUE == 0 {
                break;
            }
        }

        Ok(value)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_byte_count() {
        let mut cursor = ByteCursor::new(&[0x05, 0xFF]);
        assert_eq!(cursor.read_count(), Ok(5));
        assert_eq!(cursor.position(), 1);
    }

    #[test]
    fn test_two_byte_count() {
        let mut cursor = ByteCursor::new(&[0x81, 0x02]);
        assert_eq!(cursor.read_count(), Ok(130));
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_fifth_byte_terminates() {
        // Every byte claims a continuation; the sixth byte must stay unread.
        let bytes = [0x81, 0x80, 0x80, 0x80, 0x81, 0x07];
        let mut cursor = ByteCursor::new(&bytes);
        assert_eq!(cursor.read_count(), Ok((1 << 28) | 1));
        assert_eq!(cursor.position(), 5);
        assert_eq!(cursor.next_byte(), Ok(0x07));
    }

    #[test]
    fn test_count_truncated() {
        let mut cursor = ByteCursor::new(&[0x81]);
        assert_eq!(cursor.read_count(), Err(UnpackError::Truncated));
    }

    #[test]
    fn test_take_and_seek() {
        let mut cursor = ByteCursor::new(&[1, 2, 3, 4]);
        assert_eq!(cursor.take(3), Ok(&[1u8, 2, 3][..]));
        assert_eq!(cursor.take(2), Err(UnpackError::Truncated));
        assert_eq!(cursor.position(), 3);
        cursor.seek(1).unwrap();
        assert_eq!(cursor.next_byte(), Ok(2));
        assert_eq!(cursor.seek(5), Err(UnpackError::Truncated));
    }

    #[test]
    fn test_next_byte_past_end() {
        let mut cursor = ByteCursor::new(&[]);
        assert_eq!(cursor.next_byte(), Err(UnpackError::Truncated));
    }
}
