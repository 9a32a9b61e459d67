//! Fixed-size byte-array keys and the integer-encoding helpers spec.md §6
//! calls for: mapping signed integers into byte arrays whose lexicographic
//! order matches their numeric order, so they can be used as `DenseMap`
//! keys under plain `Ord` comparison (and, transitively, composed into
//! wider composite keys).

/// A fixed-length byte array key, 1..=32 bytes, compared lexicographically.
///
/// `DenseMap`'s `SIMD` search mode treats these specially (spec.md §4.1):
/// rather than a vector broadcast-compare, it repeatedly compares
/// equal-length byte runs — which is exactly what `Ord for [u8; N]`
/// already does, so `FixedBytes` just needs to be `Ord` to participate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FixedBytes<const N: usize>(pub [u8; N]);

impl<const N: usize> FixedBytes<N> {
    pub const fn new(bytes: [u8; N]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }

    /// Concatenates `self` with `other`, producing a `2N`-byte composite
    /// key whose lexicographic order agrees with `(self, other)` compared
    /// lexicographically as a pair — exactly spec.md §6's "composite keys
    /// of 16 or 32 bytes ... constructed by concatenating such encodings".
    pub fn concat<const M: usize, const TOTAL: usize>(
        &self,
        other: &FixedBytes<M>,
    ) -> FixedBytes<TOTAL> {
        assert_eq!(N + M, TOTAL, "concat: N + M must equal TOTAL");
        let mut out = [0u8; TOTAL];
        out[..N].copy_from_slice(&self.0);
        out[N..N + M].copy_from_slice(&other.0);
        FixedBytes(out)
    }
}

impl<const N: usize> From<[u8; N]> for FixedBytes<N> {
    fn from(bytes: [u8; N]) -> Self {
        Self(bytes)
    }
}

/// Encodes a signed 32-bit integer so that byte-wise (lexicographic)
/// comparison matches numeric comparison: flip the sign bit, then lay the
/// bytes out big-endian.
#[inline]
pub fn encode_i32(value: i32) -> FixedBytes<4> {
    let flipped = (value as u32) ^ 0x8000_0000;
    FixedBytes(flipped.to_be_bytes())
}

#[inline]
pub fn decode_i32(bytes: FixedBytes<4>) -> i32 {
    let flipped = u32::from_be_bytes(bytes.0);
    (flipped ^ 0x8000_0000) as i32
}

/// `u32` is already order-preserving under big-endian byte layout (no
/// sign bit to flip).
#[inline]
pub fn encode_u32(value: u32) -> FixedBytes<4> {
    FixedBytes(value.to_be_bytes())
}

#[inline]
pub fn decode_u32(bytes: FixedBytes<4>) -> u32 {
    u32::from_be_bytes(bytes.0)
}

/// Encodes a signed 64-bit integer the same way as [`encode_i32`], widened
/// to 8 bytes — this is the encoding spec.md §6 calls out explicitly
/// ("helpers ... for encoding signed integers into 8-byte big-endian byte
/// arrays").
#[inline]
pub fn encode_i64(value: i64) -> FixedBytes<8> {
    let flipped = (value as u64) ^ 0x8000_0000_0000_0000;
    FixedBytes(flipped.to_be_bytes())
}

#[inline]
pub fn decode_i64(bytes: FixedBytes<8>) -> i64 {
    let flipped = u64::from_be_bytes(bytes.0);
    (flipped ^ 0x8000_0000_0000_0000) as i64
}

#[inline]
pub fn encode_u64(value: u64) -> FixedBytes<8> {
    FixedBytes(value.to_be_bytes())
}

#[inline]
pub fn decode_u64(bytes: FixedBytes<8>) -> u64 {
    u64::from_be_bytes(bytes.0)
}

/// Builds a 16-byte composite key from two 8-byte encoded fields — the
/// common case spec.md §6 names ("composite keys of 16 or 32 bytes").
#[inline]
pub fn composite_key_16(a: FixedBytes<8>, b: FixedBytes<8>) -> FixedBytes<16> {
    a.concat::<8, 16>(&b)
}

/// Builds a 32-byte composite key from four 8-byte encoded fields.
#[inline]
pub fn composite_key_32(
    a: FixedBytes<8>,
    b: FixedBytes<8>,
    c: FixedBytes<8>,
    d: FixedBytes<8>,
) -> FixedBytes<32> {
    let ab: FixedBytes<16> = a.concat::<8, 16>(&b);
    let cd: FixedBytes<16> = c.concat::<8, 16>(&d);
    ab.concat::<16, 32>(&cd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i32_encoding_preserves_numeric_order() {
        let mut values = vec![i32::MIN, -1000, -1, 0, 1, 1000, i32::MAX];
        let mut encoded: Vec<_> = values.iter().map(|&v| encode_i32(v)).collect();
        let sorted_values = {
            values.sort();
            values.clone()
        };
        encoded.sort();
        let roundtrip: Vec<i32> = encoded.into_iter().map(decode_i32).collect();
        assert_eq!(roundtrip, sorted_values);
    }

    #[test]
    fn i64_encoding_preserves_numeric_order() {
        let values = vec![i64::MIN, -1_000_000, -1, 0, 1, 1_000_000, i64::MAX];
        for i in 0..values.len() {
            for j in 0..values.len() {
                let a = encode_i64(values[i]);
                let b = encode_i64(values[j]);
                assert_eq!(a.cmp(&b), values[i].cmp(&values[j]));
            }
        }
    }

    #[test]
    fn composite_key_orders_lexicographically() {
        let a = composite_key_16(encode_i64(1), encode_i64(100));
        let b = composite_key_16(encode_i64(1), encode_i64(200));
        let c = composite_key_16(encode_i64(2), encode_i64(0));
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn fixed_bytes_ord_matches_lexicographic_bytes() {
        let a = FixedBytes::new([1u8, 2, 3]);
        let b = FixedBytes::new([1u8, 2, 4]);
        assert!(a < b);
    }
}
