//! Contract values and addresses.
//!
//! The XDR types come from `stellar-xdr`; this module adds the constructors
//! the keeper needs for call arguments and the read limits applied to every
//! payload received from the RPC.

use stellar_xdr::curr::{
    Int128Parts, Limits, ScMap, ScMapEntry, ScSymbol, ScVec, UInt128Parts,
};

pub use stellar_xdr::curr::{Error as XdrError, ScAddress, ScVal, ScValType};

/// Nesting limit for decoded values.
pub const MAX_DEPTH: usize = 64;

/// Limits for XDR received from the network.
pub const READ_LIMITS: Limits = Limits {
    depth: 500,
    len: 16 * 1024 * 1024,
};

/// Parse a strkey address (`G...`, `C...`, `M...`, `B...` or `L...`).
pub fn parse_address(address: &str) -> Result<ScAddress, XdrError> {
    address.parse()
}

pub fn address(address: &str) -> Result<ScVal, XdrError> {
    Ok(ScVal::Address(parse_address(address)?))
}

pub fn symbol(name: &str) -> Result<ScVal, XdrError> {
    Ok(ScVal::Symbol(ScSymbol(name.try_into()?)))
}

pub fn i128(v: i128) -> ScVal {
    ScVal::I128(Int128Parts {
        hi: (v >> 64) as i64,
        lo: v as u64,
    })
}

pub fn u128(v: u128) -> ScVal {
    ScVal::U128(UInt128Parts {
        hi: (v >> 64) as u64,
        lo: v as u64,
    })
}

pub fn vec(items: Vec<ScVal>) -> Result<ScVal, XdrError> {
    Ok(ScVal::Vec(Some(ScVec(items.try_into()?))))
}

pub fn map(entries: Vec<(ScVal, ScVal)>) -> Result<ScVal, XdrError> {
    let entries = entries
        .into_iter()
        .map(|(key, val)| ScMapEntry { key, val })
        .collect::<Vec<_>>();
    Ok(ScVal::Map(Some(ScMap(entries.try_into()?))))
}
