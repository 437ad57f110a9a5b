//! Little-endian wire encoding for fixed-width scalars.
//!
//! | type | width |
//! |------|-------|
//! | `i8`, `u8`, `bool` | 1 |
//! | `i16`, `u16` | 2 |
//! | `i32`, `u32`, `f32` | 4 |
//! | `i64`, `u64`, `f64` | 8 |
//!
//! The encoding is little-endian on every host: conversions go through
//! `to_le_bytes`/`from_le_bytes`, so big-endian targets swap on the way in and
//! out and the stored bytes never depend on the machine that wrote them.
//! Strings are framed by [`STRING_LENGTH_WIDTH`] bytes of `i32` length and
//! carry no terminator.

/// Width of the `i32` length prefix in front of string payloads.
pub const STRING_LENGTH_WIDTH: usize = 4;

/// Largest payload a length prefix can describe.
pub const MAX_PREFIXED_LEN: usize = i32::MAX as usize;

/// A scalar with a fixed little-endian encoding.
pub trait WireScalar: Copy + Sized {
    /// Encoded width in bytes.
    const WIDTH: usize;

    /// Write exactly `WIDTH` bytes into the front of `out`.
    ///
    /// Panics if `out` is shorter than `WIDTH`.
    fn encode_le(self, out: &mut [u8]);

    /// Read a value from the first `WIDTH` bytes of `bytes`.
    ///
    /// Panics if `bytes` is shorter than `WIDTH`.
    fn decode_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_wire_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl WireScalar for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn encode_le(self, out: &mut [u8]) {
                    out[..Self::WIDTH].copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn decode_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..Self::WIDTH]);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_wire_scalar!(i8, u8, i16, u16, i32, u32, i64, u64, f32, f64);

impl WireScalar for bool {
    const WIDTH: usize = 1;

    #[inline]
    fn encode_le(self, out: &mut [u8]) {
        out[0] = u8::from(self);
    }

    /// Any non-zero byte decodes as `true`.
    #[inline]
    fn decode_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

/// Encode `value` into a fresh vector of `T::WIDTH` bytes.
#[must_use]
pub fn encode<T: WireScalar>(value: T) -> Vec<u8> {
    let mut out = vec![0u8; T::WIDTH];
    value.encode_le(&mut out);
    out
}

/// Decode a `T` from `bytes`, or `None` if fewer than `T::WIDTH` bytes are given.
#[must_use]
pub fn decode<T: WireScalar>(bytes: &[u8]) -> Option<T> {
    (bytes.len() >= T::WIDTH).then(|| T::decode_le(bytes))
}

/// Frame `payload` as a length-prefixed string, or `None` if its length does
/// not fit the `i32` prefix.
#[must_use]
pub fn frame_prefixed(payload: &[u8]) -> Option<Vec<u8>> {
    let len = i32::try_from(payload.len()).ok()?;
    let mut out = Vec::with_capacity(STRING_LENGTH_WIDTH + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths_match_layout() {
        assert_eq!(<i8 as WireScalar>::WIDTH, 1);
        assert_eq!(<bool as WireScalar>::WIDTH, 1);
        assert_eq!(<u16 as WireScalar>::WIDTH, 2);
        assert_eq!(<f32 as WireScalar>::WIDTH, 4);
        assert_eq!(<i64 as WireScalar>::WIDTH, 8);
        assert_eq!(<f64 as WireScalar>::WIDTH, 8);
    }

    #[test]
    fn integers_are_little_endian() {
        assert_eq!(encode(0x0102_0304_i32), vec![0x04, 0x03, 0x02, 0x01]);
        assert_eq!(encode(0xABCD_u16), vec![0xCD, 0xAB]);
        assert_eq!(encode(-2_i8), vec![0xFE]);
        assert_eq!(
            encode(0x0102_0304_0506_0708_u64),
            vec![8, 7, 6, 5, 4, 3, 2, 1]
        );
    }

    #[test]
    fn floats_use_ieee754_bits() {
        assert_eq!(encode(1.0_f32), vec![0x00, 0x00, 0x80, 0x3F]);
        assert_eq!(encode(-2.0_f64), vec![0, 0, 0, 0, 0, 0, 0, 0xC0]);
        assert_eq!(decode::<f64>(&encode(f64::MIN_POSITIVE)), Some(f64::MIN_POSITIVE));
    }

    #[test]
    fn bool_encodes_zero_or_one() {
        assert_eq!(encode(true), vec![1]);
        assert_eq!(encode(false), vec![0]);
        assert_eq!(decode::<bool>(&[7]), Some(true));
    }

    #[test]
    fn decode_short_input_is_none() {
        assert_eq!(decode::<u32>(&[1, 2, 3]), None);
        assert_eq!(decode::<u32>(&[1, 0, 0, 0, 9]), Some(1));
    }

    #[test]
    fn frame_prefixed_layout() {
        assert_eq!(
            frame_prefixed(b"abc").unwrap(),
            vec![3, 0, 0, 0, b'a', b'b', b'c']
        );
        assert_eq!(frame_prefixed(b"").unwrap(), vec![0, 0, 0, 0]);
    }
}
