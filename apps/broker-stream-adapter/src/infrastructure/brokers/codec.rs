//! Shared decoding helpers for broker frames.
//!
//! Binary decoders read fixed offsets out of broker packets. Every read is
//! bounds-checked so a truncated packet becomes a [`CodecError`] instead of a
//! panic.

/// Frame decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Packet shorter than its layout requires.
    #[error("truncated packet: need {needed} bytes, got {got}")]
    Truncated {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        got: usize,
    },

    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protobuf decoding failed.
    #[error("protobuf decode error: {0}")]
    Protobuf(#[from] prost::DecodeError),

    /// Packet type the decoder does not know.
    #[error("unknown packet type: {0}")]
    UnknownPacket(String),

    /// Structurally invalid frame.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// Fail unless `buf` holds at least `needed` bytes.
pub(crate) const fn ensure_len(buf: &[u8], needed: usize) -> Result<(), CodecError> {
    if buf.len() < needed {
        Err(CodecError::Truncated {
            needed,
            got: buf.len(),
        })
    } else {
        Ok(())
    }
}

fn bytes<const N: usize>(buf: &[u8], offset: usize) -> Result<[u8; N], CodecError> {
    buf.get(offset..offset + N)
        .and_then(|slice| <[u8; N]>::try_from(slice).ok())
        .ok_or(CodecError::Truncated {
            needed: offset + N,
            got: buf.len(),
        })
}

pub(crate) fn u8_at(buf: &[u8], offset: usize) -> Result<u8, CodecError> {
    Ok(bytes::<1>(buf, offset)?[0])
}

pub(crate) fn be_i16(buf: &[u8], offset: usize) -> Result<i16, CodecError> {
    Ok(i16::from_be_bytes(bytes(buf, offset)?))
}

pub(crate) fn be_i32(buf: &[u8], offset: usize) -> Result<i32, CodecError> {
    Ok(i32::from_be_bytes(bytes(buf, offset)?))
}

pub(crate) fn be_u32(buf: &[u8], offset: usize) -> Result<u32, CodecError> {
    Ok(u32::from_be_bytes(bytes(buf, offset)?))
}

pub(crate) fn le_i16(buf: &[u8], offset: usize) -> Result<i16, CodecError> {
    Ok(i16::from_le_bytes(bytes(buf, offset)?))
}

pub(crate) fn le_i32(buf: &[u8], offset: usize) -> Result<i32, CodecError> {
    Ok(i32::from_le_bytes(bytes(buf, offset)?))
}

pub(crate) fn le_i64(buf: &[u8], offset: usize) -> Result<i64, CodecError> {
    Ok(i64::from_le_bytes(bytes(buf, offset)?))
}

pub(crate) fn le_f32(buf: &[u8], offset: usize) -> Result<f32, CodecError> {
    Ok(f32::from_le_bytes(bytes(buf, offset)?))
}

pub(crate) fn le_f64(buf: &[u8], offset: usize) -> Result<f64, CodecError> {
    Ok(f64::from_le_bytes(bytes(buf, offset)?))
}

/// Quantity sent as a float, rounded to a whole number.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn float_qty(value: f64) -> i64 {
    if value.is_finite() {
        value.round() as i64
    } else {
        0
    }
}

/// Receive time in epoch milliseconds, for packets without an exchange time.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_bounds_checked() {
        let buf = [0x00, 0x00, 0x01, 0x2c];
        assert_eq!(be_i32(&buf, 0).unwrap(), 300);
        assert!(matches!(
            be_i32(&buf, 2),
            Err(CodecError::Truncated { needed: 6, got: 4 })
        ));
    }

    #[test]
    fn little_endian_reads() {
        let buf = 150_050_i64.to_le_bytes();
        assert_eq!(le_i64(&buf, 0).unwrap(), 150_050);
        assert_eq!(le_i16(&[0x01, 0x02], 0).unwrap(), 0x0201);
    }

    #[test]
    fn ensure_len_reports_sizes() {
        assert!(ensure_len(&[0; 8], 8).is_ok());
        assert!(matches!(
            ensure_len(&[0; 7], 8),
            Err(CodecError::Truncated { needed: 8, got: 7 })
        ));
    }
}
