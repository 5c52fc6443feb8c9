//! Canonical MessagePack encoding for ledger transactions.
//!
//! The ledger signs and hashes transactions in a canonical MessagePack
//! form: map keys sorted lexicographically, zero-valued fields omitted,
//! and every integer/string/binary written in its shortest encoding.
//! Only the subset of MessagePack that transactions use is implemented.

/// A MessagePack value in the transaction subset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsgValue {
    Uint(u64),
    Str(String),
    Bin(Vec<u8>),
    Array(Vec<MsgValue>),
    Map(CanonicalMap),
}

impl MsgValue {
    /// Whether the canonical encoding omits this value as a map field.
    fn is_empty(&self) -> bool {
        match self {
            MsgValue::Uint(v) => *v == 0,
            MsgValue::Str(s) => s.is_empty(),
            MsgValue::Bin(b) => b.is_empty(),
            MsgValue::Array(a) => a.is_empty(),
            MsgValue::Map(m) => m.entries.is_empty(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write(&mut out);
        out
    }

    fn write(&self, out: &mut Vec<u8>) {
        match self {
            MsgValue::Uint(v) => write_uint(out, *v),
            MsgValue::Str(s) => {
                write_len(out, s.len(), Some(0xa0), 0xd9, 0xda, 0xdb, 32);
                out.extend_from_slice(s.as_bytes());
            }
            MsgValue::Bin(b) => {
                write_len(out, b.len(), None, 0xc4, 0xc5, 0xc6, 0);
                out.extend_from_slice(b);
            }
            MsgValue::Array(items) => {
                write_container_len(out, items.len(), 0x90, 0xdc, 0xdd);
                for item in items {
                    item.write(out);
                }
            }
            MsgValue::Map(map) => {
                write_container_len(out, map.entries.len(), 0x80, 0xde, 0xdf);
                for (key, value) in &map.entries {
                    MsgValue::Str(key.clone()).write(out);
                    value.write(out);
                }
            }
        }
    }
}

/// A map with sorted keys and empty values dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalMap {
    entries: Vec<(String, MsgValue)>,
}

impl CanonicalMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field. Zero-valued fields are skipped; keys stay sorted.
    pub fn field(mut self, key: &str, value: MsgValue) -> Self {
        if value.is_empty() {
            return self;
        }
        let pos = match self.entries.binary_search_by(|(k, _)| k.as_str().cmp(key)) {
            Ok(pos) => {
                self.entries[pos].1 = value;
                return self;
            }
            Err(pos) => pos,
        };
        self.entries.insert(pos, (key.to_string(), value));
        self
    }

    pub fn get(&self, key: &str) -> Option<&MsgValue> {
        self.entries
            .binary_search_by(|(k, _)| k.as_str().cmp(key))
            .ok()
            .map(|pos| &self.entries[pos].1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn encode(&self) -> Vec<u8> {
        MsgValue::Map(self.clone()).encode()
    }
}

fn write_uint(out: &mut Vec<u8>, v: u64) {
    match v {
        0..=0x7f => out.push(v as u8),
        0x80..=0xff => {
            out.push(0xcc);
            out.push(v as u8);
        }
        0x100..=0xffff => {
            out.push(0xcd);
            out.extend_from_slice(&(v as u16).to_be_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xce);
            out.extend_from_slice(&(v as u32).to_be_bytes());
        }
        _ => {
            out.push(0xcf);
            out.extend_from_slice(&v.to_be_bytes());
        }
    }
}

/// Length prefix for str/bin families. `fix` is the fixed-width marker when
/// the family has one, usable below `fix_limit`.
fn write_len(
    out: &mut Vec<u8>,
    len: usize,
    fix: Option<u8>,
    m8: u8,
    m16: u8,
    m32: u8,
    fix_limit: usize,
) {
    match fix {
        Some(marker) if len < fix_limit => out.push(marker | len as u8),
        _ if len <= 0xff => {
            out.push(m8);
            out.push(len as u8);
        }
        _ if len <= 0xffff => {
            out.push(m16);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        _ => {
            out.push(m32);
            out.extend_from_slice(&(len as u32).to_be_bytes());
        }
    }
}

fn write_container_len(out: &mut Vec<u8>, len: usize, fix: u8, m16: u8, m32: u8) {
    if len < 16 {
        out.push(fix | len as u8);
    } else if len <= 0xffff {
        out.push(m16);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(m32);
        out.extend_from_slice(&(len as u32).to_be_bytes());
    }
}
