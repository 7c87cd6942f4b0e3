// ============================================================================
// KIN-SDK - Amounts
// ============================================================================
// Kin amounts travel as decimal strings and are stored on the ledger as
// int64 stroops (1 KIN = 10^7 stroops). Conversion is exact; extra
// precision is rejected rather than rounded.

use crate::config::AMOUNT_PRECISION as PRECISION;
use crate::error::KinError;
use crate::Result;

pub const STROOPS_PER_KIN: i64 = 10_000_000;

/// Parse a non-negative decimal string into stroops
pub fn to_stroops(amount: &str) -> Result<i64> {
    let invalid = || KinError::InvalidAmount(amount.to_string());
    let trimmed = amount.trim();

    let (whole, fraction) = match trimmed.split_once('.') {
        Some((w, f)) => (w, f),
        None => (trimmed, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    // "1.50000000" carries no more precision than "1.5"
    let fraction = fraction.trim_end_matches('0');
    if fraction.len() > PRECISION {
        return Err(KinError::Precision {
            amount: amount.to_string(),
            max_digits: PRECISION,
        });
    }

    let whole: i64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid())?
    };
    let fraction: i64 = if fraction.is_empty() {
        0
    } else {
        format!("{:0<width$}", fraction, width = PRECISION)
            .parse()
            .map_err(|_| invalid())?
    };

    whole
        .checked_mul(STROOPS_PER_KIN)
        .and_then(|w| w.checked_add(fraction))
        .ok_or_else(invalid)
}

/// Like `to_stroops` but zero is rejected too
pub fn to_positive_stroops(amount: &str) -> Result<i64> {
    let stroops = to_stroops(amount)?;
    if stroops == 0 {
        return Err(KinError::InvalidAmount(format!(
            "{} (amount must be positive)",
            amount
        )));
    }
    Ok(stroops)
}

/// Render stroops the way Horizon does ("12.3400000")
pub fn from_stroops(stroops: i64) -> String {
    let sign = if stroops < 0 { "-" } else { "" };
    let abs = stroops.unsigned_abs();
    let per = STROOPS_PER_KIN as u64;
    format!("{}{}.{:07}", sign, abs / per, abs % per)
}
