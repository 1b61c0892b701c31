//! A strict decoder for the CBOR subset used by authenticators.
//!
//! Only definite length items of major types 0 to 5 and the simple values `false`, `true` and
//! `null` are accepted. Heads must use the shortest encoding, map keys must be unique, and nesting
//! depth and collection sizes are bounded. Anything else is rejected rather than skipped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_cbor_2::Value;

use crate::constants::{DEFAULT_CBOR_MAX_DEPTH, DEFAULT_CBOR_MAX_ITEMS};
use crate::error::{WebauthnError, WebauthnResult};

/// Resource bounds applied while decoding untrusted CBOR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeLimits {
    /// The deepest allowed nesting of arrays and maps. A top level map is depth 1.
    pub max_depth: usize,
    /// The largest number of elements (or pairs) in a single array or map.
    pub max_collection_items: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        DecodeLimits {
            max_depth: DEFAULT_CBOR_MAX_DEPTH,
            max_collection_items: DEFAULT_CBOR_MAX_ITEMS,
        }
    }
}

const MAJOR_UNSIGNED: u8 = 0;
const MAJOR_NEGATIVE: u8 = 1;
const MAJOR_BYTES: u8 = 2;
const MAJOR_TEXT: u8 = 3;
const MAJOR_ARRAY: u8 = 4;
const MAJOR_MAP: u8 = 5;
const MAJOR_TAG: u8 = 6;
const MAJOR_SIMPLE: u8 = 7;

const SIMPLE_FALSE: u8 = 20;
const SIMPLE_TRUE: u8 = 21;
const SIMPLE_NULL: u8 = 22;

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
    limits: DecodeLimits,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> WebauthnResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or(WebauthnError::CborTruncated { offset: self.pos })?;
        let s = &self.buf[self.pos..end];
        self.pos = end;
        Ok(s)
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Read an item head, returning the major type, the raw additional info and the argument.
    fn head(&mut self) -> WebauthnResult<(u8, u8, u64)> {
        let offset = self.pos;
        let initial = self.take(1)?[0];
        let major = initial >> 5;
        let info = initial & 0x1f;

        let (arg, min) = match info {
            0..=23 => (info as u64, 0),
            24 => (self.take(1)?[0] as u64, 24),
            25 => {
                let b = self.take(2)?;
                (u16::from_be_bytes([b[0], b[1]]) as u64, 0x100)
            }
            26 => {
                let b = self.take(4)?;
                (u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as u64, 0x1_0000)
            }
            27 => {
                let b = self.take(8)?;
                let mut a = [0; 8];
                a.copy_from_slice(b);
                (u64::from_be_bytes(a), 0x1_0000_0000)
            }
            31 => {
                return Err(WebauthnError::CborUnsupported {
                    offset,
                    reason: "indefinite length",
                })
            }
            _ => {
                return Err(WebauthnError::CborUnsupported {
                    offset,
                    reason: "reserved additional information",
                })
            }
        };

        // Simple values and floats reuse the argument sizes, they are checked by the caller.
        if major != MAJOR_SIMPLE && arg < min {
            return Err(WebauthnError::CborNonCanonical { offset });
        }

        Ok((major, info, arg))
    }

    fn length(&self, arg: u64, offset: usize) -> WebauthnResult<usize> {
        usize::try_from(arg)
            .ok()
            .filter(|l| *l <= self.remaining())
            .ok_or(WebauthnError::CborTruncated { offset })
    }

    fn collection_len(&self, arg: u64, offset: usize) -> WebauthnResult<usize> {
        if arg > self.limits.max_collection_items as u64 {
            return Err(WebauthnError::CborLimitExceeded {
                offset,
                limit: "collection size",
            });
        }
        // Every element needs at least one byte.
        self.length(arg, offset)
    }

    fn value(&mut self, depth: usize) -> WebauthnResult<Value> {
        let offset = self.pos;
        let (major, info, arg) = self.head()?;

        match major {
            MAJOR_UNSIGNED => Ok(Value::Integer(arg as i128)),
            MAJOR_NEGATIVE => Ok(Value::Integer(-1 - arg as i128)),
            MAJOR_BYTES => {
                let len = self.length(arg, offset)?;
                self.take(len).map(|b| Value::Bytes(b.to_vec()))
            }
            MAJOR_TEXT => {
                let len = self.length(arg, offset)?;
                let b = self.take(len)?;
                std::str::from_utf8(b)
                    .map(|s| Value::Text(s.to_string()))
                    .map_err(|_| WebauthnError::CborInvalidUtf8 { offset })
            }
            MAJOR_ARRAY => {
                self.enter(depth, offset)?;
                let len = self.collection_len(arg, offset)?;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(self.value(depth + 1)?);
                }
                Ok(Value::Array(items))
            }
            MAJOR_MAP => {
                self.enter(depth, offset)?;
                let len = self.collection_len(arg, offset)?;
                let mut map = BTreeMap::new();
                for _ in 0..len {
                    let key_offset = self.pos;
                    let k = self.value(depth + 1)?;
                    let v = self.value(depth + 1)?;
                    if map.insert(k, v).is_some() {
                        return Err(WebauthnError::CborDuplicateKey { offset: key_offset });
                    }
                }
                Ok(Value::Map(map))
            }
            MAJOR_TAG => Err(WebauthnError::CborUnsupported {
                offset,
                reason: "tag",
            }),
            _ => match info {
                SIMPLE_FALSE => Ok(Value::Bool(false)),
                SIMPLE_TRUE => Ok(Value::Bool(true)),
                SIMPLE_NULL => Ok(Value::Null),
                25..=27 => Err(WebauthnError::CborUnsupported {
                    offset,
                    reason: "floating point",
                }),
                _ => Err(WebauthnError::CborUnsupported {
                    offset,
                    reason: "simple value",
                }),
            },
        }
    }

    fn enter(&self, depth: usize, offset: usize) -> WebauthnResult<()> {
        if depth >= self.limits.max_depth {
            debug!(depth, max = self.limits.max_depth, "cbor nesting limit");
            Err(WebauthnError::CborLimitExceeded {
                offset,
                limit: "nesting depth",
            })
        } else {
            Ok(())
        }
    }
}

/// Decode exactly one item from the front of `buf`, returning it and the number of bytes it
/// occupied. Bytes after the item are left for the caller.
pub fn decode_prefix(buf: &[u8], limits: DecodeLimits) -> WebauthnResult<(Value, usize)> {
    let mut cursor = Cursor {
        buf,
        pos: 0,
        limits,
    };
    let v = cursor.value(0)?;
    Ok((v, cursor.pos))
}

/// Decode a buffer that must contain exactly one CBOR item.
pub fn decode(buf: &[u8], limits: DecodeLimits) -> WebauthnResult<Value> {
    let (v, used) = decode_prefix(buf, limits)?;
    if used != buf.len() {
        return Err(WebauthnError::CborTrailingBytes { offset: used });
    }
    Ok(v)
}
