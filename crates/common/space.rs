use sha2::{Digest, Sha256};
use std::fmt;

/// A point in the identifier ring: a `B`-bit unsigned integer held as a
/// big-endian byte buffer of `ceil(B/8)` bytes. When `B` is not a multiple
/// of eight the unused high bits of the leading byte are always zero; every
/// operation in [`Space`] re-masks before returning.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(Vec<u8>);

impl Id {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id(0x{})", hex::encode(&self.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpaceError {
    #[error("identifier width must be positive")]
    ZeroWidth,
    #[error("degree {0} is not a power of two >= 2")]
    BadDegree(u32),
    #[error("identifier width {bits} is not a multiple of the digit width {digit_bits}")]
    UnalignedDigits { bits: u32, digit_bits: u32 },
    #[error("degree {degree} exceeds successor list length {list_len}")]
    DegreeOverList { degree: u32, list_len: usize },
    #[error("bad hex identifier: {0}")]
    BadHex(String),
    #[error("identifier has wrong length or non-zero padding bits")]
    InvalidId,
}

/// Parameters of the identifier space: width `B`, de Bruijn degree `k`
/// (also the radix for digit extraction) and the successor list length `L`.
///
/// `k` must be a power of two with `B % log2(k) == 0`, so the `B`-bit view
/// splits into exactly `B / log2(k)` base-`k` digits and one digit shift is
/// a plain bit shift.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Space {
    bits: u32,
    degree: u32,
    digit_bits: u32,
    successor_list_len: usize,
    byte_len: usize,
    /// Valid bits of the leading byte.
    top_mask: u8,
}

impl Space {
    pub fn new(bits: u32, degree: u32, successor_list_len: usize) -> Result<Self, SpaceError> {
        if bits == 0 {
            return Err(SpaceError::ZeroWidth);
        }
        if degree < 2 || !degree.is_power_of_two() {
            return Err(SpaceError::BadDegree(degree));
        }
        let digit_bits = degree.trailing_zeros();
        if bits % digit_bits != 0 {
            return Err(SpaceError::UnalignedDigits { bits, digit_bits });
        }
        if successor_list_len < degree as usize {
            return Err(SpaceError::DegreeOverList {
                degree,
                list_len: successor_list_len,
            });
        }
        let byte_len = bits.div_ceil(8) as usize;
        let top_mask = match bits % 8 {
            0 => 0xff,
            rem => (1u8 << rem) - 1,
        };
        Ok(Self {
            bits,
            degree,
            digit_bits,
            successor_list_len,
            byte_len,
            top_mask,
        })
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn degree(&self) -> u32 {
        self.degree
    }

    pub fn digit_bits(&self) -> u32 {
        self.digit_bits
    }

    pub fn successor_list_len(&self) -> usize {
        self.successor_list_len
    }

    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    fn masked(&self, mut bytes: Vec<u8>) -> Id {
        bytes[0] &= self.top_mask;
        Id(bytes)
    }

    /// Hashes an application key into the ring, truncated big-endian to `B`
    /// bits.
    pub fn id_from_key(&self, key: &str) -> Id {
        let digest = Sha256::digest(key.as_bytes());
        let mut bytes = vec![0u8; self.byte_len];
        if self.byte_len <= digest.len() {
            bytes.copy_from_slice(&digest[..self.byte_len]);
        } else {
            let start = self.byte_len - digest.len();
            bytes[start..].copy_from_slice(&digest);
        }
        self.masked(bytes)
    }

    /// Parses a hexadecimal identifier (with or without a `0x` prefix).
    /// Rejects inputs shorter than `ceil(B/4)` characters; longer inputs
    /// keep only the low-order `B` bits.
    pub fn id_from_hex(&self, s: &str) -> Result<Id, SpaceError> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if (digits.len() as u32) < self.bits.div_ceil(4) {
            return Err(SpaceError::BadHex(format!(
                "expected at least {} hex characters, got {}",
                self.bits.div_ceil(4),
                digits.len()
            )));
        }
        let padded = if digits.len() % 2 == 0 {
            digits.to_string()
        } else {
            format!("0{digits}")
        };
        let decoded =
            hex::decode(&padded).map_err(|e| SpaceError::BadHex(format!("{s}: {e}")))?;
        let mut bytes = vec![0u8; self.byte_len];
        if decoded.len() >= self.byte_len {
            bytes.copy_from_slice(&decoded[decoded.len() - self.byte_len..]);
        } else {
            bytes[self.byte_len - decoded.len()..].copy_from_slice(&decoded);
        }
        Ok(self.masked(bytes))
    }

    /// Places `value` in the low-order bits, zero-padded to `ceil(B/8)`
    /// bytes.
    pub fn id_from_u64(&self, value: u64) -> Id {
        let be = value.to_be_bytes();
        let mut bytes = vec![0u8; self.byte_len];
        if self.byte_len >= be.len() {
            bytes[self.byte_len - be.len()..].copy_from_slice(&be);
        } else {
            bytes.copy_from_slice(&be[be.len() - self.byte_len..]);
        }
        self.masked(bytes)
    }

    /// Validates and adopts a raw big-endian buffer as an identifier.
    pub fn id_from_bytes(&self, bytes: &[u8]) -> Result<Id, SpaceError> {
        if !self.is_valid(bytes) {
            return Err(SpaceError::InvalidId);
        }
        Ok(Id(bytes.to_vec()))
    }

    /// True iff `bytes` has the right length and its padding bits are zero.
    pub fn is_valid(&self, bytes: &[u8]) -> bool {
        bytes.len() == self.byte_len && bytes[0] & !self.top_mask == 0
    }

    /// `(a + b) mod 2^B`.
    pub fn add_mod(&self, a: &Id, b: &Id) -> Id {
        let mut out = vec![0u8; self.byte_len];
        let mut carry = 0u16;
        for i in (0..self.byte_len).rev() {
            let sum = a.0[i] as u16 + b.0[i] as u16 + carry;
            out[i] = sum as u8;
            carry = sum >> 8;
        }
        self.masked(out)
    }

    /// `(a * m) mod 2^B` for a small scalar multiplier.
    pub fn mul_mod(&self, a: &Id, m: u32) -> Id {
        let mut out = vec![0u8; self.byte_len];
        let mut carry = 0u64;
        for i in (0..self.byte_len).rev() {
            let prod = a.0[i] as u64 * m as u64 + carry;
            out[i] = prod as u8;
            carry = prod >> 8;
        }
        self.masked(out)
    }

    /// `(a * k) mod 2^B`: the left shift by one base-`k` digit.
    pub fn mul_k_mod(&self, a: &Id) -> Id {
        self.mul_mod(a, self.degree)
    }

    /// Splits off the top base-`k` digit of the `B`-bit view: returns the
    /// digit and `(a * k) mod 2^B`, i.e. `a` shifted left with the consumed
    /// digit's bits zeroed.
    ///
    /// Operates on the logical `B`-bit value, so byte-unaligned widths read
    /// the digit from below the zero padding of the leading byte.
    pub fn next_digit(&self, a: &Id) -> (u32, Id) {
        let pad = self.byte_len as u32 * 8 - self.bits;
        let mut digit = 0u32;
        for i in 0..self.digit_bits {
            let bit_index = pad + i;
            let byte = a.0[(bit_index / 8) as usize];
            let bit = (byte >> (7 - bit_index % 8)) & 1;
            digit = (digit << 1) | bit as u32;
        }
        (digit, self.mul_k_mod(a))
    }

    /// Modular open-open interval: `x` strictly between `a` and `b` on the
    /// ring. When `a == b` the interval is the whole ring and the predicate
    /// holds for every `x`.
    pub fn between(&self, x: &Id, a: &Id, b: &Id) -> bool {
        if a == b {
            return true;
        }
        if a < b {
            a < x && x < b
        } else {
            x > a || x < b
        }
    }

    /// Modular open-closed interval: like [`Space::between`] but including
    /// the right endpoint.
    pub fn between_right_closed(&self, x: &Id, a: &Id, b: &Id) -> bool {
        x == b || self.between(x, a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space(bits: u32, degree: u32) -> Space {
        Space::new(bits, degree, degree as usize).expect("valid space")
    }

    #[test]
    fn rejects_bad_parameters() {
        assert_eq!(Space::new(0, 2, 4).unwrap_err(), SpaceError::ZeroWidth);
        assert_eq!(Space::new(8, 3, 4).unwrap_err(), SpaceError::BadDegree(3));
        assert_eq!(Space::new(8, 1, 4).unwrap_err(), SpaceError::BadDegree(1));
        assert!(matches!(
            Space::new(8, 8, 8).unwrap_err(),
            SpaceError::UnalignedDigits { .. }
        ));
        assert!(matches!(
            Space::new(8, 4, 2).unwrap_err(),
            SpaceError::DegreeOverList { .. }
        ));
    }

    #[test]
    fn mul_k_mod_vector_b32_k4() {
        let space = space(32, 4);
        let a = space.id_from_hex("71C8502C").unwrap();
        assert_eq!(space.mul_k_mod(&a).to_hex(), "c72140b0");
    }

    #[test]
    fn mul_mod_vector_b8_times_3() {
        // (0xFF * 3) mod 2^8; degree 3 itself is rejected at construction,
        // the scalar multiply handles any small factor.
        let space = space(8, 2);
        let a = space.id_from_hex("FF").unwrap();
        assert_eq!(space.mul_mod(&a, 3).to_hex(), "fd");
    }

    #[test]
    fn next_digit_vector_b32_k4() {
        let space = space(32, 4);
        let a = space.id_from_hex("C72140B0").unwrap();
        let (digit, rest) = space.next_digit(&a);
        assert_eq!(digit, 3);
        assert_eq!(rest.to_hex(), "1c8502c0");
    }

    #[test]
    fn step_advance_vector_b66_k8() {
        // Byte-unaligned width: 66 bits over 9 bytes, 6 padding bits.
        let space = space(66, 8);
        let current_i = space.id_from_hex("0x00FB487B807EA44256").unwrap();
        let kshift = space.id_from_hex("0x0037EF85D91755EA28").unwrap();
        let digit = 0u64;
        let next_i = space.add_mod(&space.mul_k_mod(&current_i), &space.id_from_u64(digit));
        assert_eq!(next_i.to_hex(), "03da43dc03f52212b0");
        assert_eq!(space.mul_k_mod(&kshift).to_hex(), "01bf7c2ec8baaf5140");
    }

    #[test]
    fn next_digit_concatenation_reconstructs() {
        let space = space(32, 4);
        let a = space.id_from_hex("DEADBEEF").unwrap();
        let (digit, rest) = space.next_digit(&a);
        // digit * 2^(B - r) + rest / k reconstructs a.
        let msb = space.mul_mod(&space.id_from_u64(digit as u64), 1 << 30);
        let mut low = u32::from_be_bytes(rest.as_bytes().try_into().unwrap());
        low >>= 2;
        let rebuilt = space.add_mod(&msb, &space.id_from_u64(low as u64));
        assert_eq!(rebuilt, a);
    }

    #[test]
    fn degree_two_extracts_top_bit() {
        let space = space(8, 2);
        let (digit, rest) = space.next_digit(&space.id_from_hex("80").unwrap());
        assert_eq!(digit, 1);
        assert_eq!(rest.to_hex(), "00");
        let (digit, _) = space.next_digit(&space.id_from_hex("7F").unwrap());
        assert_eq!(digit, 0);
    }

    #[test]
    fn hex_round_trip() {
        let space = space(66, 8);
        let id = space.id_from_hex("0x02aabbccddeeff1122").unwrap();
        assert_eq!(space.id_from_hex(&id.to_hex()).unwrap(), id);
    }

    #[test]
    fn hex_rejects_short_and_truncates_long() {
        let space = space(32, 4);
        assert!(matches!(
            space.id_from_hex("abc").unwrap_err(),
            SpaceError::BadHex(_)
        ));
        let id = space.id_from_hex("112233445566").unwrap();
        assert_eq!(id.to_hex(), "33445566");
    }

    #[test]
    fn unaligned_width_masks_padding() {
        let space = space(66, 8);
        // 0xFFF... exceeds 66 bits; the low 66 survive.
        let id = space.id_from_hex("0xFFFFFFFFFFFFFFFFFF").unwrap();
        assert_eq!(id.as_bytes()[0], 0x03);
        assert!(space.is_valid(id.as_bytes()));
        assert!(!space.is_valid(&[0xff; 9]));
        assert!(!space.is_valid(&[0u8; 8]));
    }

    #[test]
    fn add_wraps_at_width() {
        let space = space(8, 2);
        let a = space.id_from_hex("FF").unwrap();
        let b = space.id_from_u64(2);
        assert_eq!(space.add_mod(&a, &b).to_hex(), "01");
    }

    #[test]
    fn between_handles_wraparound() {
        let space = space(8, 2);
        let id = |v: u64| space.id_from_u64(v);
        assert!(space.between(&id(0x50), &id(0x40), &id(0x60)));
        assert!(!space.between(&id(0x40), &id(0x40), &id(0x60)));
        assert!(!space.between(&id(0x60), &id(0x40), &id(0x60)));
        // Wrapping interval.
        assert!(space.between(&id(0x10), &id(0xF0), &id(0x20)));
        assert!(space.between(&id(0xF8), &id(0xF0), &id(0x20)));
        assert!(!space.between(&id(0x80), &id(0xF0), &id(0x20)));
        // Degenerate interval covers the whole ring.
        assert!(space.between(&id(0x33), &id(0x40), &id(0x40)));
        assert!(space.between(&id(0x40), &id(0x40), &id(0x40)));
    }

    #[test]
    fn between_right_closed_includes_endpoint() {
        let space = space(8, 2);
        let id = |v: u64| space.id_from_u64(v);
        assert!(space.between_right_closed(&id(0x60), &id(0x40), &id(0x60)));
        assert!(!space.between_right_closed(&id(0x40), &id(0x40), &id(0x60)));
        assert!(space.between_right_closed(&id(0x05), &id(0xF0), &id(0x20)));
    }

    #[test]
    fn u64_values_are_truncated_to_the_width() {
        let narrow = space(8, 2);
        assert_eq!(narrow.id_from_u64(0x1FF).to_hex(), "ff");
        let wide = space(128, 2);
        assert_eq!(
            wide.id_from_u64(u64::MAX).to_hex(),
            "0000000000000000ffffffffffffffff"
        );
    }

    #[test]
    fn adding_zero_is_the_identity() {
        let space = space(32, 4);
        let a = space.id_from_hex("DEADBEEF").unwrap();
        assert_eq!(space.add_mod(&a, &space.id_from_u64(0)), a);
    }

    #[test]
    fn degree_two_multiply_equals_doubling() {
        let space = space(8, 2);
        for value in [0u64, 1, 0x42, 0x7F, 0x80, 0xFE, 0xFF] {
            let id = space.id_from_u64(value);
            assert_eq!(space.mul_k_mod(&id), space.add_mod(&id, &id));
        }
    }

    #[test]
    fn key_hashing_is_stable_and_valid() {
        let space = space(66, 8);
        let a = space.id_from_key("alpha");
        let b = space.id_from_key("alpha");
        assert_eq!(a, b);
        assert!(space.is_valid(a.as_bytes()));
        assert_ne!(a, space.id_from_key("beta"));
    }
}
