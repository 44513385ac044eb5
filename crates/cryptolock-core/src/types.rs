use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Token quantity in the token's native base units. Fixed-point ratios and
/// prices share this type and are scaled by `FIXED_POINT_ONE` (1e18).
pub type Amount = u128;

/// Unix timestamp (seconds, UTC).
pub type Timestamp = i64;

/// Sequential lock identifier, assigned in creation order starting at 0.
pub type LockId = u64;

/// Global criterion identifier. One counter is shared by all five criterion
/// stores, so ids are unique across types.
pub type CriterionId = u64;

// ── Address ──────────────────────────────────────────────────────────────────

/// 20-byte account or token address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn from_bytes(b: [u8; 20]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// `0x`-prefixed lowercase hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parse hex with or without a `0x` prefix. Exactly 20 bytes are required.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        let arr: [u8; 20] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }
}

impl FromStr for Address {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({}…)", &self.to_hex()[..10])
    }
}

// ── Hash32 ───────────────────────────────────────────────────────────────────

/// 32-byte digest: Merkle roots, proof siblings and leaves.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    pub const ZERO: Hash32 = Hash32([0u8; 32]);

    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }
}

impl FromStr for Hash32 {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({}…)", &self.to_hex()[..18])
    }
}

// ── Serde ────────────────────────────────────────────────────────────────────

// Hex strings in human-readable formats (JSON config), raw bytes otherwise
// (bincode records).
macro_rules! impl_hex_serde {
    ($ty:ident, $len:expr) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                if serializer.is_human_readable() {
                    serializer.serialize_str(&self.to_hex())
                } else {
                    self.0.serialize(serializer)
                }
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                if deserializer.is_human_readable() {
                    let s = String::deserialize(deserializer)?;
                    $ty::from_hex(&s).map_err(de::Error::custom)
                } else {
                    <[u8; $len]>::deserialize(deserializer).map($ty)
                }
            }
        }
    };
}

impl_hex_serde!(Address, 20);
impl_hex_serde!(Hash32, 32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_hex_accepts_optional_prefix() {
        let a = Address::from_hex("0x000000000000000000000000000000000000dEaD").unwrap();
        let b = Address::from_hex("000000000000000000000000000000000000dead").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_hex(), "0x000000000000000000000000000000000000dead");
    }

    #[test]
    fn address_rejects_wrong_length() {
        assert!(Address::from_hex("0xdead").is_err());
        assert!(Hash32::from_hex("0x00").is_err());
    }

    #[test]
    fn json_uses_hex_and_bincode_uses_bytes() {
        let a = Address([0xab; 20]);
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, format!("\"{}\"", a.to_hex()));
        assert_eq!(serde_json::from_str::<Address>(&json).unwrap(), a);

        let bin = bincode::serialize(&Hash32([7u8; 32])).unwrap();
        assert_eq!(bin.len(), 32);
        assert_eq!(bincode::deserialize::<Hash32>(&bin).unwrap(), Hash32([7u8; 32]));
    }
}
