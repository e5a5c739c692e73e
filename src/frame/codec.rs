//! Safe byte parsing helpers with bounds checking.
//!
//! Frame layouts are decoded field by field in little-endian byte order.
//! Every accessor verifies the slice is long enough before touching it, so a
//! truncated or corrupted frame surfaces as a parse error instead of a panic.

use crate::{AcquisitionError, Result};

pub(crate) fn read_u16_le(data: &[u8], offset: usize) -> Result<u16> {
    let bytes = field(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn read_i16_le(data: &[u8], offset: usize) -> Result<i16> {
    let bytes = field(data, offset, 2)?;
    Ok(i16::from_le_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn read_u32_le(data: &[u8], offset: usize) -> Result<u32> {
    let bytes = field(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn field(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    data.get(offset..offset + len).ok_or_else(|| {
        AcquisitionError::parse(
            "frame field",
            format!(
                "insufficient data at offset {} (need {} bytes, have {})",
                offset,
                len,
                data.len().saturating_sub(offset)
            ),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_fields() {
        let data = [0x34, 0x12, 0xFF, 0xFF, 0x78, 0x56, 0x34, 0x12];
        assert_eq!(read_u16_le(&data, 0).unwrap(), 0x1234);
        assert_eq!(read_i16_le(&data, 2).unwrap(), -1);
        assert_eq!(read_u32_le(&data, 4).unwrap(), 0x1234_5678);
    }

    #[test]
    fn out_of_bounds_reads_are_parse_errors() {
        let data = [0u8; 3];
        assert!(read_u16_le(&data, 2).is_err());
        assert!(read_u32_le(&data, 0).is_err());
        assert!(matches!(
            read_u32_le(&data, 0).unwrap_err(),
            AcquisitionError::Parse { .. }
        ));
    }
}
