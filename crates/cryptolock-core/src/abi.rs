//! 32-byte word codec for criterion and unlock payloads.
//!
//! Layout follows the contract ABI used by existing integrations: every
//! static value occupies one word in the head; an `address[]` occupies one
//! head word holding the byte offset of its tail, where a length word is
//! followed by one word per element.

use crate::constants::ABI_WORD_BYTES;
use crate::error::LockError;
use crate::types::{Address, Hash32};

/// A value that can be written by [`encode`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AbiValue {
    Uint(u128),
    Address(Address),
    Bytes32(Hash32),
    AddressArray(Vec<Address>),
}

/// Encode a tuple of values.
pub fn encode(values: &[AbiValue]) -> Vec<u8> {
    let head_len = values.len() * ABI_WORD_BYTES;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for value in values {
        match value {
            AbiValue::Uint(v) => head.extend_from_slice(&uint_word(*v)),
            AbiValue::Address(a) => head.extend_from_slice(&address_word(a)),
            AbiValue::Bytes32(h) => head.extend_from_slice(h.as_bytes()),
            AbiValue::AddressArray(items) => {
                head.extend_from_slice(&uint_word((head_len + tail.len()) as u128));
                tail.extend_from_slice(&uint_word(items.len() as u128));
                for a in items {
                    tail.extend_from_slice(&address_word(a));
                }
            }
        }
    }

    head.extend_from_slice(&tail);
    head
}

fn uint_word(v: u128) -> [u8; 32] {
    let mut w = [0u8; 32];
    w[16..].copy_from_slice(&v.to_be_bytes());
    w
}

fn address_word(a: &Address) -> [u8; 32] {
    let mut w = [0u8; 32];
    w[12..].copy_from_slice(a.as_bytes());
    w
}

/// Random-access reader over an encoded tuple.
pub struct AbiReader<'a> {
    data: &'a [u8],
}

impl<'a> AbiReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Fail unless the head holds at least `count` words.
    pub fn expect_words(&self, count: usize) -> Result<(), LockError> {
        if self.data.len() < count * ABI_WORD_BYTES {
            return Err(LockError::AbiDecode(format!(
                "expected at least {} words, got {} bytes",
                count,
                self.data.len()
            )));
        }
        Ok(())
    }

    fn word_at(&self, byte_offset: usize) -> Result<&'a [u8], LockError> {
        let end = byte_offset
            .checked_add(ABI_WORD_BYTES)
            .ok_or_else(|| LockError::AbiDecode("offset overflow".into()))?;
        self.data
            .get(byte_offset..end)
            .ok_or_else(|| LockError::AbiDecode(format!("word at byte {} out of range", byte_offset)))
    }

    fn word(&self, index: usize) -> Result<&'a [u8], LockError> {
        self.word_at(index * ABI_WORD_BYTES)
    }

    /// Unsigned integer word. Values wider than 128 bits are rejected.
    pub fn uint(&self, index: usize) -> Result<u128, LockError> {
        decode_uint(self.word(index)?)
    }

    pub fn address(&self, index: usize) -> Result<Address, LockError> {
        decode_address(self.word(index)?)
    }

    pub fn bytes32(&self, index: usize) -> Result<Hash32, LockError> {
        let w = self.word(index)?;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(w);
        Ok(Hash32(arr))
    }

    /// Dynamic `address[]` whose head word sits at `index`.
    pub fn address_array(&self, index: usize) -> Result<Vec<Address>, LockError> {
        let offset = usize::try_from(self.uint(index)?)
            .map_err(|_| LockError::AbiDecode("array offset too large".into()))?;
        let len = usize::try_from(decode_uint(self.word_at(offset)?)?)
            .map_err(|_| LockError::AbiDecode("array length too large".into()))?;

        let available = self.data.len().saturating_sub(offset + ABI_WORD_BYTES) / ABI_WORD_BYTES;
        if len > available {
            return Err(LockError::AbiDecode(format!(
                "array declares {} elements but only {} words follow",
                len, available
            )));
        }

        (0..len)
            .map(|i| decode_address(self.word_at(offset + ABI_WORD_BYTES * (i + 1))?))
            .collect()
    }
}

fn decode_uint(w: &[u8]) -> Result<u128, LockError> {
    if w[..16].iter().any(|b| *b != 0) {
        return Err(LockError::AbiDecode("integer exceeds 128 bits".into()));
    }
    let mut arr = [0u8; 16];
    arr.copy_from_slice(&w[16..]);
    Ok(u128::from_be_bytes(arr))
}

fn decode_address(w: &[u8]) -> Result<Address, LockError> {
    if w[..12].iter().any(|b| *b != 0) {
        return Err(LockError::AbiDecode("address word has dirty padding".into()));
    }
    let mut arr = [0u8; 20];
    arr.copy_from_slice(&w[12..]);
    Ok(Address(arr))
}
