//! Collateralization ratio of a vault, in exact integer arithmetic.
//!
//! The quote says `quote_amount_in` of the collateral asset is worth
//! `quote_amount_out` of the debt asset. The two assets may use different
//! decimal places, so the cross product is rescaled before dividing:
//!
//!   ratio = floor(locked · quote_out · unit · num / (debt · quote_in · den))
//!
//! where `(num, den)` is `(1, 1)` for equal decimals and otherwise carries
//! `(10^|Δ|)^2` in the denominator when the out side has more decimals,
//! else in the numerator.

use num_bigint::BigUint;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RatioError {
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatioUnit {
    Percent,
    BasisPoints,
}

impl RatioUnit {
    fn multiplier(&self) -> u32 {
        match self {
            RatioUnit::Percent => 100,
            RatioUnit::BasisPoints => 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatioInputs {
    pub locked: u128,
    pub debt: u128,
    /// Collateral side of the quote.
    pub quote_amount_in: u128,
    /// Debt-asset side of the quote.
    pub quote_amount_out: u128,
    /// Decimal places of the quote's in asset.
    pub decimals_in: u32,
    /// Decimal places of the quote's out asset.
    pub decimals_out: u32,
}

/// Saturates to `u64::MAX`.
pub fn collateralization_ratio(inputs: &RatioInputs, unit: RatioUnit) -> Result<u64, RatioError> {
    if inputs.locked == 0 {
        return Err(RatioError::InvalidInput("locked must be positive"));
    }
    if inputs.debt == 0 {
        return Err(RatioError::InvalidInput("debt must be positive"));
    }
    if inputs.quote_amount_in == 0 || inputs.quote_amount_out == 0 {
        return Err(RatioError::InvalidInput("quote amounts must be positive"));
    }
    if inputs.decimals_in == 0 || inputs.decimals_out == 0 {
        return Err(RatioError::InvalidInput("decimal places are required"));
    }

    let (num_factor, den_factor) = scale_factors(inputs.decimals_in, inputs.decimals_out);

    let numerator = BigUint::from(inputs.locked)
        * BigUint::from(inputs.quote_amount_out)
        * BigUint::from(unit.multiplier())
        * num_factor;
    let denominator =
        BigUint::from(inputs.debt) * BigUint::from(inputs.quote_amount_in) * den_factor;

    let ratio = numerator / denominator;
    Ok(u64::try_from(&ratio).unwrap_or(u64::MAX))
}

fn scale_factors(decimals_in: u32, decimals_out: u32) -> (BigUint, BigUint) {
    let one = BigUint::from(1u32);
    if decimals_in == decimals_out {
        return (one.clone(), one);
    }
    let factor = BigUint::from(10u32).pow(decimals_in.abs_diff(decimals_out)).pow(2);
    if decimals_out > decimals_in {
        (one, factor)
    } else {
        (factor, one)
    }
}
