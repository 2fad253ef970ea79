//! Bounds-checked binary cell primitives.
//!
//! All values are fixed-width little-endian. Every writer checks the supplied
//! `offset_limit` before touching the buffer and reports `false` without advancing
//! the offset when the value would not fit; that outcome is backpressure, not an
//! error, and the caller retries after enlarging the buffer.

use byteorder::{ByteOrder, LittleEndian};

use crate::{MISSING_F32_BITS, MISSING_I32, VECTOR_END_F32_BITS, VECTOR_END_I32};

/// A fixed-width value that can appear in a binary cell.
pub trait CellValue: Copy {
    const SIZE: usize;

    /// Sentinel encoding a missing value.
    fn missing() -> Self;
    /// Sentinel terminating a vector shorter than its declared arity.
    fn vector_end() -> Self;
    fn write_le(self, dst: &mut [u8]);
    fn read_le(src: &[u8]) -> Self;
    fn is_missing(self) -> bool;
    fn is_vector_end(self) -> bool;
}

impl CellValue for i32 {
    const SIZE: usize = 4;

    fn missing() -> Self {
        MISSING_I32
    }

    fn vector_end() -> Self {
        VECTOR_END_I32
    }

    fn write_le(self, dst: &mut [u8]) {
        LittleEndian::write_i32(dst, self);
    }

    fn read_le(src: &[u8]) -> Self {
        LittleEndian::read_i32(src)
    }

    fn is_missing(self) -> bool {
        self == MISSING_I32
    }

    fn is_vector_end(self) -> bool {
        self == VECTOR_END_I32
    }
}

impl CellValue for i64 {
    const SIZE: usize = 8;

    fn missing() -> Self {
        i64::from(MISSING_I32)
    }

    fn vector_end() -> Self {
        i64::from(VECTOR_END_I32)
    }

    fn write_le(self, dst: &mut [u8]) {
        LittleEndian::write_i64(dst, self);
    }

    fn read_le(src: &[u8]) -> Self {
        LittleEndian::read_i64(src)
    }

    fn is_missing(self) -> bool {
        self == i64::from(MISSING_I32)
    }

    fn is_vector_end(self) -> bool {
        self == i64::from(VECTOR_END_I32)
    }
}

impl CellValue for f32 {
    const SIZE: usize = 4;

    fn missing() -> Self {
        f32::from_bits(MISSING_F32_BITS)
    }

    fn vector_end() -> Self {
        f32::from_bits(VECTOR_END_F32_BITS)
    }

    fn write_le(self, dst: &mut [u8]) {
        LittleEndian::write_u32(dst, self.to_bits());
    }

    fn read_le(src: &[u8]) -> Self {
        f32::from_bits(LittleEndian::read_u32(src))
    }

    // bit comparisons: the sentinels are NaN payloads and never compare equal
    fn is_missing(self) -> bool {
        self.to_bits() == MISSING_F32_BITS
    }

    fn is_vector_end(self) -> bool {
        self.to_bits() == VECTOR_END_F32_BITS
    }
}

/// Write one typed value at `*offset`, advancing it only on success.
///
/// Returns `false` when writing would exceed `offset_limit`; the offset is left
/// untouched so the caller can retry with a larger buffer.
pub fn write_value<T: CellValue>(
    buffer: &mut [u8],
    offset: &mut i64,
    offset_limit: i64,
    value: T,
) -> bool {
    let start = *offset as usize;
    let end = start + T::SIZE;
    if end as i64 > offset_limit || end > buffer.len() {
        return false;
    }
    value.write_le(&mut buffer[start..end]);
    *offset = end as i64;
    true
}

/// Write the missing sentinel for `T` at `*offset`.
pub fn write_null<T: CellValue>(buffer: &mut [u8], offset: &mut i64, offset_limit: i64) -> bool {
    write_value(buffer, offset, offset_limit, T::missing())
}

/// Write a length-prefixed byte run at `*offset`, advancing it only on success.
pub fn write_string(buffer: &mut [u8], offset: &mut i64, offset_limit: i64, bytes: &[u8]) -> bool {
    let start = *offset as usize;
    let end = start + i32::SIZE + bytes.len();
    if end as i64 > offset_limit || end > buffer.len() {
        return false;
    }
    LittleEndian::write_i32(&mut buffer[start..start + i32::SIZE], bytes.len() as i32);
    buffer[start + i32::SIZE..end].copy_from_slice(bytes);
    *offset = end as i64;
    true
}

/// Read one typed value at `*offset`, advancing past it.
#[must_use]
pub fn read_value<T: CellValue>(buffer: &[u8], offset: &mut i64) -> T {
    let start = *offset as usize;
    let value = T::read_le(&buffer[start..start + T::SIZE]);
    *offset += T::SIZE as i64;
    value
}

/// Read a length-prefixed byte run at `*offset`, advancing past it.
#[must_use]
pub fn read_string<'a>(buffer: &'a [u8], offset: &mut i64) -> &'a [u8] {
    let len = read_value::<i32>(buffer, offset) as usize;
    let start = *offset as usize;
    *offset += len as i64;
    &buffer[start..start + len]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_round_trip() {
        let mut buf = vec![0u8; 64];
        let mut offset = 0;
        assert!(write_value(&mut buf, &mut offset, 64, 42i32));
        assert!(write_value(&mut buf, &mut offset, 64, -7i64));
        assert!(write_value(&mut buf, &mut offset, 64, 1.5f32));
        assert_eq!(offset, 16);

        let mut cursor = 0;
        assert_eq!(read_value::<i32>(&buf, &mut cursor), 42);
        assert_eq!(read_value::<i64>(&buf, &mut cursor), -7);
        assert!((read_value::<f32>(&buf, &mut cursor) - 1.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_limit_blocks_without_advancing() {
        let mut buf = vec![0u8; 64];
        let mut offset = 6;
        assert!(!write_value(&mut buf, &mut offset, 8, 1i32));
        assert_eq!(offset, 6);
        assert!(!write_string(&mut buf, &mut offset, 12, b"ACGT"));
        assert_eq!(offset, 6);
    }

    #[test]
    fn test_short_buffer_blocks_without_advancing() {
        let mut buf = vec![0u8; 2];
        let mut offset = 0;
        assert!(!write_value(&mut buf, &mut offset, 1024, 1i32));
        assert_eq!(offset, 0);
    }

    #[test]
    fn test_null_sentinels_round_trip() {
        let mut buf = vec![0u8; 16];
        let mut offset = 0;
        assert!(write_null::<i32>(&mut buf, &mut offset, 16));
        assert!(write_null::<f32>(&mut buf, &mut offset, 16));

        let mut cursor = 0;
        assert!(read_value::<i32>(&buf, &mut cursor).is_missing());
        assert!(read_value::<f32>(&buf, &mut cursor).is_missing());
    }

    #[test]
    fn test_float_sentinels_are_distinct_nans() {
        assert!(f32::missing().is_nan());
        assert!(f32::vector_end().is_nan());
        assert!(!f32::missing().is_vector_end());
        assert!(!f32::vector_end().is_missing());
        assert!(!1.0f32.is_missing());
    }

    #[test]
    fn test_string_round_trip() {
        let mut buf = vec![0u8; 32];
        let mut offset = 0;
        assert!(write_string(&mut buf, &mut offset, 32, b"A|TTT"));
        let mut cursor = 0;
        assert_eq!(read_string(&buf, &mut cursor), b"A|TTT");
        assert_eq!(cursor, offset);
    }
}
