//! Method-specific payload checks.
//!
//! Each validator is a pure function of the policy snapshot and the
//! request parameters. Values that cannot be decoded are let through
//! unless the policy asks for strict decoding.

use alloy_primitives::U256;
use serde_json::Value;
use tracing::debug;

use crate::decode::{self, BlockBound, DecodeError};
use crate::{Policy, Rejection};

pub const SEND_RAW_TRANSACTION: &str = "eth_sendRawTransaction";
pub const GET_LOGS: &str = "eth_getLogs";

/// Runs the validator registered for `method`, if any.
pub fn validate(method: &str, params: &[Value], policy: &Policy) -> Result<(), Rejection> {
    match method {
        SEND_RAW_TRANSACTION => check_raw_transaction(params, policy),
        GET_LOGS => check_log_range(params, policy),
        _ => Ok(()),
    }
}

/// Enforces the gas-price floor on `eth_sendRawTransaction`.
pub fn check_raw_transaction(params: &[Value], policy: &Policy) -> Result<(), Rejection> {
    let raw_hex = params
        .first()
        .and_then(Value::as_str)
        .ok_or(Rejection::MissingParam)?;

    let fee_cap = match decode::hex_bytes(raw_hex)
        .and_then(|raw| decode::transaction_fee_cap(&raw))
    {
        Ok(fee_cap) => fee_cap,
        Err(e) => return on_decode_error(e, policy, Rejection::MalformedTransaction),
    };

    if fee_cap < policy.min_gas_price_wei() {
        return Err(Rejection::LowGasPrice);
    }
    Ok(())
}

/// Enforces the block-span ceiling on `eth_getLogs`.
pub fn check_log_range(params: &[Value], policy: &Policy) -> Result<(), Rejection> {
    let Some(filter) = params.first() else {
        return Ok(());
    };
    let Some(filter) = filter.as_object() else {
        if policy.strict_decoding {
            return Err(Rejection::MalformedFilter);
        }
        return Ok(());
    };

    let bound = |field: &str| match decode::block_number(filter.get(field)) {
        Ok(bound) => Ok(bound),
        Err(e) => {
            on_decode_error(e, policy, Rejection::MalformedFilter).map(|()| BlockBound::Unbounded)
        }
    };
    let from = bound("fromBlock")?;
    let to = bound("toBlock")?;

    if let (BlockBound::Number(from), BlockBound::Number(to)) = (from, to) {
        let too_wide = to
            .checked_sub(from)
            .is_some_and(|span| span > U256::from(policy.max_log_block_range));
        if too_wide {
            return Err(Rejection::LogRangeTooWide);
        }
    }
    Ok(())
}

/// Applies the decode-failure policy: let through, or reject when strict.
fn on_decode_error(err: DecodeError, policy: &Policy, strict: Rejection) -> Result<(), Rejection> {
    if policy.strict_decoding {
        debug!(error = %err, "payload rejected by strict decoding");
        return Err(strict);
    }
    debug!(error = %err, "payload not decodable, skipping check");
    Ok(())
}
