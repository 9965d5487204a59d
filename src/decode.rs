//! Decoders for the few request payload fields the gateway inspects.
//!
//! Every decoder returns an explicit [`DecodeError`] instead of silently
//! yielding nothing, so each validator decides for itself whether an
//! undecodable value is let through or rejected.

use alloy_primitives::U256;
use alloy_rlp::{Decodable, Header};

/// Block tags accepted in place of a number in log filters.
const BLOCK_TAGS: &[&str] = &["latest", "earliest", "pending", "safe", "finalized"];

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("invalid RLP: {0}")]
    Rlp(#[from] alloy_rlp::Error),
    #[error("empty transaction payload")]
    Empty,
    #[error("unsupported transaction type 0x{0:02x}")]
    UnsupportedTxType(u8),
    #[error("expected an RLP list")]
    ExpectedList,
    #[error("{0} trailing bytes after transaction")]
    TrailingBytes(usize),
    #[error("expected {expected} transaction fields, found {found}")]
    FieldCount { expected: usize, found: usize },
    #[error("invalid block number: {0}")]
    BlockNumber(String),
}

/// One end of an `eth_getLogs` block range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockBound {
    /// An explicit block number.
    Number(U256),
    /// Absent or a tag such as `latest`.
    Unbounded,
}

/// Decodes a hex string with an optional `0x` prefix.
pub fn hex_bytes(s: &str) -> Result<Vec<u8>, DecodeError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    Ok(hex::decode(digits)?)
}

/// Interprets a `fromBlock` / `toBlock` filter value.
pub fn block_number(value: Option<&serde_json::Value>) -> Result<BlockBound, DecodeError> {
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return Ok(BlockBound::Unbounded);
    };
    let s = value
        .as_str()
        .ok_or_else(|| DecodeError::BlockNumber(value.to_string()))?;

    if BLOCK_TAGS.contains(&s) {
        return Ok(BlockBound::Unbounded);
    }
    let digits = s
        .strip_prefix("0x")
        .filter(|d| !d.is_empty())
        .ok_or_else(|| DecodeError::BlockNumber(s.to_owned()))?;

    U256::from_str_radix(digits, 16)
        .map(BlockBound::Number)
        .map_err(|_| DecodeError::BlockNumber(s.to_owned()))
}

/// Field layout of each supported transaction envelope.
struct Layout {
    fields: usize,
    price_index: usize,
}

const LEGACY: Layout = Layout {
    fields: 9,
    price_index: 1,
};
const EIP2930: Layout = Layout {
    fields: 11,
    price_index: 2,
};
const EIP1559: Layout = Layout {
    fields: 12,
    price_index: 3,
};
const EIP4844: Layout = Layout {
    fields: 14,
    price_index: 3,
};
const EIP7702: Layout = Layout {
    fields: 13,
    price_index: 3,
};

/// Extracts the per-gas price a signed transaction is willing to pay.
///
/// For legacy and access-list transactions this is `gasPrice`; for
/// dynamic-fee transactions it is `maxFeePerGas`. The envelope structure
/// (field count, no trailing bytes) is checked, the signature is not.
pub fn transaction_fee_cap(raw: &[u8]) -> Result<U256, DecodeError> {
    let (&first, rest) = raw.split_first().ok_or(DecodeError::Empty)?;

    let (layout, mut body) = match first {
        0xc0..=0xff => (LEGACY, list_payload(raw)?),
        0x01 => (EIP2930, list_payload(rest)?),
        0x02 => (EIP1559, list_payload(rest)?),
        0x03 => (EIP4844, blob_tx_payload(list_payload(rest)?)?),
        0x04 => (EIP7702, list_payload(rest)?),
        other => return Err(DecodeError::UnsupportedTxType(other)),
    };

    let found = count_items(body)?;
    if found != layout.fields {
        return Err(DecodeError::FieldCount {
            expected: layout.fields,
            found,
        });
    }

    for _ in 0..layout.price_index {
        skip_item(&mut body)?;
    }
    Ok(U256::decode(&mut body)?)
}

/// Strips the outer list header, requiring it to span the whole input.
fn list_payload(mut buf: &[u8]) -> Result<&[u8], DecodeError> {
    let header = Header::decode(&mut buf)?;
    if !header.list {
        return Err(DecodeError::ExpectedList);
    }
    let payload = take(buf, header.payload_length)?;
    let trailing = &buf[payload.len()..];
    if !trailing.is_empty() {
        return Err(DecodeError::TrailingBytes(trailing.len()));
    }
    Ok(payload)
}

/// Unwraps the network form `[tx, blobs, commitments, proofs]` of a blob
/// transaction, returning the inner transaction fields.
fn blob_tx_payload(payload: &[u8]) -> Result<&[u8], DecodeError> {
    let mut buf = payload;
    let header = Header::decode(&mut buf)?;
    if !header.list {
        return Ok(payload);
    }
    take(buf, header.payload_length)
}

fn take(buf: &[u8], len: usize) -> Result<&[u8], DecodeError> {
    buf.get(..len)
        .ok_or(DecodeError::Rlp(alloy_rlp::Error::InputTooShort))
}

fn skip_item(buf: &mut &[u8]) -> Result<(), DecodeError> {
    let header = Header::decode(buf)?;
    let item = take(buf, header.payload_length)?;
    *buf = &buf[item.len()..];
    Ok(())
}

fn count_items(mut buf: &[u8]) -> Result<usize, DecodeError> {
    let mut count = 0;
    while !buf.is_empty() {
        skip_item(&mut buf)?;
        count += 1;
    }
    Ok(count)
}
