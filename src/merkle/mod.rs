/// Merkle commitments over ordered batches of records.
///
/// Records are application-defined; the only requirement is a stable
/// byte encoding. Serializable records are encoded as compact JSON with
/// keys in insertion order, matching the bytes a JavaScript
/// `JSON.stringify` of the same record produces for roots already on chain.
pub mod proof;
pub mod tree;

use serde::Serialize;
use serde_json::{Number, Value};

use crate::crypto::hash::DIGEST_LEN;
use crate::error::{AnchorError, Result};

pub use proof::{prove, verify, InclusionProof, Position, ProofStep};
pub use tree::{build_root, leaf_hash, MerkleTree};

/// Canonical bytes of one record.
///
/// Object keys keep the order the record was built or parsed in. Floats
/// with no fractional part are written as integers (`12.0` becomes `12`).
/// Other floats use the shortest round-trip form, which agrees with
/// JavaScript except for exponent notation on very large or very small
/// magnitudes; batches that need byte-exact agreement there should carry
/// such values as strings.
pub fn record_bytes<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    let mut value = serde_json::to_value(record)
        .map_err(|e| AnchorError::Serialization(format!("record encoding failed: {e}")))?;
    normalize_numbers(&mut value);
    serde_json::to_vec(&value)
        .map_err(|e| AnchorError::Serialization(format!("record encoding failed: {e}")))
}

fn normalize_numbers(value: &mut Value) {
    match value {
        Value::Number(n) => {
            if let Some(f) = n.as_f64().filter(|_| n.is_f64()) {
                // i64::MAX as f64 is 2^63, so the upper bound is exclusive.
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
                    *n = Number::from(f as i64);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(normalize_numbers),
        Value::Object(map) => map.values_mut().for_each(normalize_numbers),
        _ => {}
    }
}

/// Leaf digest of one record.
pub fn record_leaf<T: Serialize>(record: &T) -> Result<[u8; 32]> {
    Ok(leaf_hash(&record_bytes(record)?))
}

/// Canonical bytes for every record of a batch, in order.
pub fn batch_bytes<T: Serialize>(records: &[T]) -> Result<Vec<Vec<u8>>> {
    records.iter().map(record_bytes).collect()
}

/// Parse a hex-encoded 32-byte digest (an optional `0x` prefix is accepted).
pub fn parse_digest(text: &str) -> Result<[u8; 32]> {
    let raw = hex::decode(text.trim_start_matches("0x"))
        .map_err(|e| AnchorError::InvalidInput(format!("digest is not hex: {e}")))?;
    raw.try_into().map_err(|raw: Vec<u8>| {
        AnchorError::InvalidInput(format!(
            "digest must be {DIGEST_LEN} bytes, got {}",
            raw.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_bytes_compact_json() {
        let record = json!({"site": "mangrove-3", "dbh_cm": 12.5});
        let bytes = record_bytes(&record).unwrap();
        assert_eq!(bytes, br#"{"site":"mangrove-3","dbh_cm":12.5}"#);
    }

    #[test]
    fn test_record_bytes_match_js_stringify() {
        // Expected bytes are JSON.stringify(JSON.parse(input)).
        let cases = [
            (r#"{"site":"m3","dbh":12.0}"#, r#"{"site":"m3","dbh":12}"#),
            (r#"{"b":2,"a":1}"#, r#"{"b":2,"a":1}"#),
            (
                r#"{"z":{"y":[1.0,2.5,-0.0],"x":null},"a":"s"}"#,
                r#"{"z":{"y":[1,2.5,0],"x":null},"a":"s"}"#,
            ),
            (r#"{"ph":8.07,"n":-3}"#, r#"{"ph":8.07,"n":-3}"#),
        ];
        for (input, expected) in cases {
            let record: Value = serde_json::from_str(input).unwrap();
            let bytes = record_bytes(&record).unwrap();
            assert_eq!(String::from_utf8(bytes).unwrap(), expected, "input {input}");
            assert_eq!(
                record_leaf(&record).unwrap(),
                crate::crypto::hash::hash(expected.as_bytes())
            );
        }
    }

    #[test]
    fn test_record_leaf_depends_on_key_order() {
        let a = json!({"a": 1, "b": 2});
        let b = json!({"b": 2, "a": 1});
        assert_ne!(record_leaf(&a).unwrap(), record_leaf(&b).unwrap());
    }

    #[test]
    fn test_struct_records_keep_field_order() {
        #[derive(Serialize)]
        struct Reading {
            sensor: &'static str,
            temp_c: f64,
        }
        let bytes = record_bytes(&Reading { sensor: "buoy-1", temp_c: 21.0 }).unwrap();
        assert_eq!(bytes, br#"{"sensor":"buoy-1","temp_c":21}"#);
    }

    #[test]
    fn test_parse_digest() {
        let d = [0xABu8; 32];
        assert_eq!(parse_digest(&hex::encode(d)).unwrap(), d);
        assert_eq!(parse_digest(&format!("0x{}", hex::encode(d))).unwrap(), d);
        assert!(parse_digest("abcd").is_err());
        assert!(parse_digest("zz").is_err());
    }
}
