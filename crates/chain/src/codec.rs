//! Generic contract value codec.
//!
//! Turns a tagged [`ScVal`] into a [`NativeValue`] the rest of the keeper can
//! work with. Wide integers are rebuilt from their 32-bit limbs into 256-bit
//! values without truncation.

use crate::scval::{ScVal, ScValType, XdrError, MAX_DEPTH, READ_LIMITS};
use alloy_primitives::{I256, U256};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use stellar_xdr::curr::ReadXdr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unsupported value type {name} ({tag})")]
    UnsupportedValueType { tag: u32, name: &'static str },

    #[error("malformed value: {0}")]
    Malformed(String),

    #[error("invalid base64: {0}")]
    Base64(String),

    #[error("value nesting exceeds {0} levels")]
    DepthExceeded(usize),
}

impl DecodeError {
    fn unsupported(val: &ScVal) -> Self {
        Self::UnsupportedValueType {
            tag: val.discriminant() as u32,
            name: val.name(),
        }
    }
}

impl From<XdrError> for DecodeError {
    fn from(e: XdrError) -> Self {
        match e {
            XdrError::DepthLimitExceeded => Self::DepthExceeded(MAX_DEPTH),
            other => Self::Malformed(other.to_string()),
        }
    }
}

/// Decoded contract value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeValue {
    Null,
    Bool(bool),
    U32(u32),
    I32(i32),
    /// u64, u128 and u256
    UInt(U256),
    /// i64, i128 and i256, sign-extended
    Int(I256),
    /// Canonical strkey (`G...`, `C...`, `M...`, `B...` or `L...`)
    Address(String),
    /// Symbols and strings
    Text(String),
    Bytes(Vec<u8>),
    Vec(Vec<NativeValue>),
    /// Entries in wire order
    Map(Vec<(NativeValue, NativeValue)>),
    Timepoint(u64),
    Duration(u64),
}

impl NativeValue {
    /// Look up a map entry by text key.
    pub fn get(&self, field: &str) -> Option<&NativeValue> {
        match self {
            Self::Map(entries) => entries
                .iter()
                .find(|(k, _)| matches!(k, Self::Text(t) if t == field))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Text or address contents.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::Address(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<&str> {
        match self {
            Self::Address(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_slice(&self) -> Option<&[NativeValue]> {
        match self {
            Self::Vec(items) => Some(items),
            _ => None,
        }
    }

    /// Any integer that fits in an `i128`.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Self::U32(v) => Some(i128::from(*v)),
            Self::I32(v) => Some(i128::from(*v)),
            Self::Int(v) => i256_to_i128(*v),
            Self::UInt(v) => {
                let bytes = v.to_be_bytes::<32>();
                // Top 17 bytes clear: fits below 2^127.
                if bytes[..17].iter().all(|b| *b == 0) {
                    let mut low = [0u8; 16];
                    low.copy_from_slice(&bytes[16..]);
                    Some(i128::from_be_bytes(low))
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

/// Decode a tagged value.
pub fn decode(val: &ScVal) -> Result<NativeValue, DecodeError> {
    decode_depth(val, 0)
}

/// Parse and decode a value from its XDR bytes.
pub fn decode_xdr(bytes: &[u8]) -> Result<NativeValue, DecodeError> {
    if let Some(tag) = bytes.get(..4) {
        let tag = u32::from_be_bytes([tag[0], tag[1], tag[2], tag[3]]);
        if ScValType::try_from(tag as i32).is_err() {
            return Err(DecodeError::UnsupportedValueType {
                tag,
                name: "unknown",
            });
        }
    }
    let val = ScVal::from_xdr(bytes, READ_LIMITS)?;
    decode(&val)
}

/// Parse and decode a base64-encoded XDR value, as returned by the RPC.
pub fn decode_base64(s: &str) -> Result<NativeValue, DecodeError> {
    let bytes = STANDARD
        .decode(s)
        .map_err(|e| DecodeError::Base64(e.to_string()))?;
    decode_xdr(&bytes)
}

fn decode_depth(val: &ScVal, depth: usize) -> Result<NativeValue, DecodeError> {
    if depth > MAX_DEPTH {
        return Err(DecodeError::DepthExceeded(MAX_DEPTH));
    }
    Ok(match val {
        ScVal::Bool(b) => NativeValue::Bool(*b),
        ScVal::Void | ScVal::Vec(None) | ScVal::Map(None) => NativeValue::Null,
        ScVal::U32(v) => NativeValue::U32(*v),
        ScVal::I32(v) => NativeValue::I32(*v),
        ScVal::U64(v) => NativeValue::UInt(unsigned_from_limbs(&u64_limbs(*v))),
        ScVal::I64(v) => NativeValue::Int(signed_from_limbs(&u64_limbs(*v as u64))),
        ScVal::U128(p) => {
            let limbs = [u64_limbs(p.hi), u64_limbs(p.lo)].concat();
            NativeValue::UInt(unsigned_from_limbs(&limbs))
        }
        ScVal::I128(p) => {
            let limbs = [u64_limbs(p.hi as u64), u64_limbs(p.lo)].concat();
            NativeValue::Int(signed_from_limbs(&limbs))
        }
        ScVal::U256(p) => {
            let limbs = [p.hi_hi, p.hi_lo, p.lo_hi, p.lo_lo]
                .iter()
                .flat_map(|w| u64_limbs(*w))
                .collect::<Vec<_>>();
            NativeValue::UInt(unsigned_from_limbs(&limbs))
        }
        ScVal::I256(p) => {
            let limbs = [p.hi_hi as u64, p.hi_lo, p.lo_hi, p.lo_lo]
                .iter()
                .flat_map(|w| u64_limbs(*w))
                .collect::<Vec<_>>();
            NativeValue::Int(signed_from_limbs(&limbs))
        }
        ScVal::Timepoint(t) => NativeValue::Timepoint(t.0),
        ScVal::Duration(d) => NativeValue::Duration(d.0),
        ScVal::Bytes(b) => NativeValue::Bytes(b.0.to_vec()),
        ScVal::String(s) => NativeValue::Text(s.0.to_utf8_string_lossy()),
        ScVal::Symbol(s) => NativeValue::Text(s.0.to_utf8_string_lossy()),
        ScVal::Vec(Some(items)) => NativeValue::Vec(
            items
                .0
                .iter()
                .map(|item| decode_depth(item, depth + 1))
                .collect::<Result<_, _>>()?,
        ),
        ScVal::Map(Some(entries)) => NativeValue::Map(
            entries
                .0
                .iter()
                .map(|e| Ok((decode_depth(&e.key, depth + 1)?, decode_depth(&e.val, depth + 1)?)))
                .collect::<Result<_, DecodeError>>()?,
        ),
        ScVal::Address(addr) => NativeValue::Address(addr.to_string()),
        ScVal::LedgerKeyNonce(key) => {
            NativeValue::Int(signed_from_limbs(&u64_limbs(key.nonce as u64)))
        }
        ScVal::Error(_) | ScVal::ContractInstance(_) | ScVal::LedgerKeyContractInstance => {
            return Err(DecodeError::unsupported(val))
        }
    })
}

fn u64_limbs(v: u64) -> [u32; 2] {
    [(v >> 32) as u32, v as u32]
}

/// Place limbs (most significant first) at the low end of a 32-byte buffer.
fn limb_bytes(limbs: &[u32], fill: u8) -> [u8; 32] {
    let mut buf = [fill; 32];
    let start = 32 - limbs.len() * 4;
    for (i, limb) in limbs.iter().enumerate() {
        buf[start + i * 4..start + i * 4 + 4].copy_from_slice(&limb.to_be_bytes());
    }
    buf
}

/// Rebuild an unsigned integer from up to eight 32-bit limbs.
pub fn unsigned_from_limbs(limbs: &[u32]) -> U256 {
    debug_assert!(limbs.len() <= 8);
    U256::from_be_bytes(limb_bytes(limbs, 0))
}

/// Rebuild a signed integer from up to eight 32-bit limbs, sign-extending
/// from the top bit of the first limb.
pub fn signed_from_limbs(limbs: &[u32]) -> I256 {
    debug_assert!(limbs.len() <= 8);
    let negative = limbs.first().is_some_and(|l| l & 0x8000_0000 != 0);
    let fill = if negative { 0xff } else { 0 };
    I256::from_raw(U256::from_be_bytes(limb_bytes(limbs, fill)))
}

pub fn i256_from_i128(v: i128) -> I256 {
    let fill = if v < 0 { 0xff } else { 0 };
    let mut buf = [fill; 32];
    buf[16..].copy_from_slice(&v.to_be_bytes());
    I256::from_raw(U256::from_be_bytes(buf))
}

/// Narrow to `i128`, or `None` when the value does not fit.
pub fn i256_to_i128(v: I256) -> Option<i128> {
    let bytes = v.into_raw().to_be_bytes::<32>();
    let mut low = [0u8; 16];
    low.copy_from_slice(&bytes[16..]);
    let narrowed = i128::from_be_bytes(low);
    let fill = if narrowed < 0 { 0xff } else { 0 };
    bytes[..16].iter().all(|b| *b == fill).then_some(narrowed)
}
