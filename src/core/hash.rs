use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Marker every hash token starts with.
pub const HASH_MARKER: &str = "p:";

#[derive(Debug, Error, PartialEq)]
pub enum HashParseError {
    #[error("Missing \"p:\" marker in hash token")]
    MissingMarker,

    #[error("Hash token has length {found}, expected {expected}")]
    WrongLength { expected: usize, found: usize },

    #[error("Invalid hex in hash token: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Fixed-width perceptual fingerprint of `N` bytes.
///
/// Serialized as `p:` followed by the lowercase hex of the bytes, so a
/// 256-bit hash is a 66 character token and a 64-bit hash an 18 character one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PerceptualHash<const N: usize>([u8; N]);

/// 256-bit fingerprint compared exactly and by Hamming distance.
pub type StrictHash = PerceptualHash<32>;

/// 64-bit coarse fingerprint used only as a bucket key.
pub type FuzzyHash = PerceptualHash<8>;

impl<const N: usize> PerceptualHash<N> {
    /// Length of the textual token, marker included.
    pub const TOKEN_LEN: usize = HASH_MARKER.len() + N * 2;

    pub fn from_bytes(bytes: [u8; N]) -> Self {
        Self(bytes)
    }

    /// Builds a hash from a byte slice of exactly `N` bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; N]>::try_from(bytes).ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }

    /// Parses a `p:<hex>` token.
    pub fn parse(token: &str) -> Result<Self, HashParseError> {
        let body = token
            .strip_prefix(HASH_MARKER)
            .ok_or(HashParseError::MissingMarker)?;
        if token.len() != Self::TOKEN_LEN {
            return Err(HashParseError::WrongLength {
                expected: Self::TOKEN_LEN,
                found: token.len(),
            });
        }
        let mut bytes = [0u8; N];
        hex::decode_to_slice(body, &mut bytes)?;
        Ok(Self(bytes))
    }

    pub fn to_token(&self) -> String {
        format!("{HASH_MARKER}{}", hex::encode(self.0))
    }

    /// Hamming distance: number of differing bits.
    pub fn distance(&self, other: &Self) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

/// Hamming distance between two strict hashes.
pub fn distance(a: &StrictHash, b: &StrictHash) -> u32 {
    a.distance(b)
}

impl<const N: usize> fmt::Display for PerceptualHash<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_token())
    }
}

impl<const N: usize> fmt::Debug for PerceptualHash<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PerceptualHash<{N}>({})", self.to_token())
    }
}

impl<const N: usize> FromStr for PerceptualHash<N> {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<const N: usize> Serialize for PerceptualHash<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_token())
    }
}

impl<'de, const N: usize> Deserialize<'de> for PerceptualHash<N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        Self::parse(&token).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn strict_token(c: char) -> String {
        format!("p:{}", c.to_string().repeat(64))
    }

    #[test]
    fn test_parse_strict_token() {
        let hash = StrictHash::parse(&strict_token('a')).unwrap();
        assert_eq!(hash.as_bytes(), &[0xaa; 32]);
        assert_eq!(hash.to_token(), strict_token('a'));
        assert_eq!(StrictHash::TOKEN_LEN, 66);
        assert_eq!(FuzzyHash::TOKEN_LEN, 18);
    }

    #[test]
    fn test_parse_accepts_uppercase_hex() {
        let hash = FuzzyHash::parse("p:FFFF0000FFFF0000").unwrap();
        assert_eq!(hash.to_token(), "p:ffff0000ffff0000");
    }

    #[test]
    fn test_parse_rejects_bad_tokens() {
        assert_eq!(
            FuzzyHash::parse("q:ffff0000ffff0000"),
            Err(HashParseError::MissingMarker)
        );
        assert_eq!(
            FuzzyHash::parse("p:ffff"),
            Err(HashParseError::WrongLength {
                expected: 18,
                found: 6
            })
        );
        // a strict token is not a fuzzy token
        assert!(FuzzyHash::parse(&strict_token('0')).is_err());
        assert!(matches!(
            FuzzyHash::parse("p:zzzz0000ffff0000"),
            Err(HashParseError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_distance_counts_differing_bits() {
        let zero = StrictHash::from_bytes([0; 32]);
        let mut bytes = [0u8; 32];
        bytes[0] = 0b1011_0000;
        bytes[31] = 0xff;
        let other = StrictHash::from_bytes(bytes);
        assert_eq!(distance(&zero, &other), 11);
        assert_eq!(distance(&zero, &StrictHash::from_bytes([0xff; 32])), 256);
    }

    #[test]
    fn test_serde_uses_token() {
        let hash = FuzzyHash::from_bytes([0x12; 8]);
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, "\"p:1212121212121212\"");
        let back: FuzzyHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }

    proptest! {
        #[test]
        fn distance_is_symmetric(a in prop::array::uniform32(any::<u8>()), b in prop::array::uniform32(any::<u8>())) {
            let a = StrictHash::from_bytes(a);
            let b = StrictHash::from_bytes(b);
            prop_assert_eq!(distance(&a, &b), distance(&b, &a));
            prop_assert_eq!(distance(&a, &a), 0);
        }
    }
}
