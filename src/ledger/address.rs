/// Ledger account addresses and transaction ids.
///
/// An address is the base32 (RFC 4648, unpadded) encoding of a 32-byte
/// public key followed by a 4-byte checksum: the last four bytes of
/// SHA-512/256(public key). Transaction ids are the unpadded base32 of
/// SHA-512/256("TX" || encoded transaction).
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::crypto::hash;
use crate::error::{AnchorError, Result};

const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
const CHECKSUM_LEN: usize = 4;
const ADDRESS_LEN: usize = 58;

/// Encode bytes as unpadded RFC 4648 base32.
pub fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() * 8).div_ceil(5));
    let mut buffer: u16 = 0;
    let mut bits = 0u32;

    for &byte in data {
        buffer = (buffer << 8) | u16::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[usize::from((buffer >> bits) & 0x1F)] as char);
        }
        buffer &= (1 << bits) - 1;
    }
    if bits > 0 {
        out.push(ALPHABET[usize::from((buffer << (5 - bits)) & 0x1F)] as char);
    }
    out
}

/// Decode unpadded RFC 4648 base32. Trailing bits that do not complete a
/// byte must be zero.
pub fn base32_decode(text: &str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len() * 5 / 8);
    let mut buffer: u16 = 0;
    let mut bits = 0u32;

    for c in text.bytes() {
        let value = ALPHABET
            .iter()
            .position(|&a| a == c)
            .ok_or_else(|| AnchorError::InvalidInput(format!("invalid base32 character {:?}", c as char)))?;
        buffer = (buffer << 5) | value as u16;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
            buffer &= (1 << bits) - 1;
        }
    }
    if buffer != 0 {
        return Err(AnchorError::InvalidInput(
            "non-zero trailing bits in base32 input".into(),
        ));
    }
    Ok(out)
}

/// A ledger account address (32-byte public key).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(pub [u8; 32]);

impl Address {
    pub fn public_key(&self) -> &[u8; 32] {
        &self.0
    }

    fn checksum(key: &[u8; 32]) -> [u8; CHECKSUM_LEN] {
        let digest = hash::sha512_256(key);
        let mut checksum = [0u8; CHECKSUM_LEN];
        checksum.copy_from_slice(&digest[32 - CHECKSUM_LEN..]);
        checksum
    }
}

impl FromStr for Address {
    type Err = AnchorError;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != ADDRESS_LEN {
            return Err(AnchorError::InvalidInput(format!(
                "address must be {ADDRESS_LEN} characters, got {}",
                s.len()
            )));
        }
        let raw = base32_decode(s)?;
        let (key, checksum) = raw.split_at(32);
        let key: [u8; 32] = key
            .try_into()
            .map_err(|_| AnchorError::InvalidInput("address has wrong length".into()))?;
        if checksum != Self::checksum(&key) {
            return Err(AnchorError::InvalidInput(format!(
                "address checksum mismatch: {s}"
            )));
        }
        Ok(Self(key))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut raw = Vec::with_capacity(32 + CHECKSUM_LEN);
        raw.extend_from_slice(&self.0);
        raw.extend_from_slice(&Self::checksum(&self.0));
        f.write_str(&base32_encode(&raw))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(d)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Transaction id of an encoded transaction.
pub fn transaction_id(encoded_txn: &[u8]) -> String {
    let mut tagged = Vec::with_capacity(2 + encoded_txn.len());
    tagged.extend_from_slice(b"TX");
    tagged.extend_from_slice(encoded_txn);
    base32_encode(&hash::sha512_256(&tagged))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base32_rfc4648_vectors() {
        assert_eq!(base32_encode(b""), "");
        assert_eq!(base32_encode(b"f"), "MY");
        assert_eq!(base32_encode(b"fo"), "MZXQ");
        assert_eq!(base32_encode(b"foo"), "MZXW6");
        assert_eq!(base32_encode(b"foobar"), "MZXW6YTBOI");
        assert_eq!(base32_decode("MZXW6YTBOI").unwrap(), b"foobar");
        assert_eq!(base32_decode("MY").unwrap(), b"f");
    }

    #[test]
    fn test_base32_rejects_bad_input() {
        assert!(base32_decode("mzxw6").is_err());
        assert!(base32_decode("MZ").is_err());
    }

    #[test]
    fn test_zero_address() {
        let zero = Address([0u8; 32]);
        assert_eq!(
            zero.to_string(),
            "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAY5HFKQ"
        );
        let parsed: Address = zero.to_string().parse().unwrap();
        assert_eq!(parsed, zero);
    }

    #[test]
    fn test_address_checksum_mismatch() {
        let good = Address([7u8; 32]).to_string();
        let mut bad = good.clone().into_bytes();
        // Flip a checksum character.
        let last = bad.len() - 2;
        bad[last] = if bad[last] == b'A' { b'B' } else { b'A' };
        let bad = String::from_utf8(bad).unwrap();
        assert!(bad.parse::<Address>().is_err());
        assert!(good.parse::<Address>().is_ok());
    }

    #[test]
    fn test_address_wrong_length() {
        assert!("ABC".parse::<Address>().is_err());
    }

    #[test]
    fn test_transaction_id_shape() {
        let id = transaction_id(b"\x80");
        assert_eq!(id.len(), 52);
        assert!(id.bytes().all(|c| ALPHABET.contains(&c)));
        assert_ne!(id, transaction_id(b"\x81"));
    }
}
