//! Expected-reward math
//!
//! Everything here is `Decimal`; the 24h power is the only float input and
//! is converted once, from its shortest round-trip text. Multiplication
//! order is fixed and every operation is checked.

use rust_decimal::Decimal;
use std::str::FromStr;

use crate::CollectError;

/// Seconds per day, the numerator of the auxiliary parameter
const SECONDS_PER_DAY: i64 = 86_400;

/// Power unit scale (power is reported in millions of hashes per second)
const POWER_SCALE: i64 = 1_000_000;

/// `86400 / avg_proof_target`, or zero when the target is not positive
///
/// # Errors
///
/// Returns [`CollectError::Overflow`] if the quotient does not fit a `Decimal`.
pub fn auxiliary_parameter(avg_proof_target: Decimal) -> Result<Decimal, CollectError> {
    if avg_proof_target <= Decimal::ZERO {
        return Ok(Decimal::ZERO);
    }
    Decimal::from(SECONDS_PER_DAY)
        .checked_div(avg_proof_target)
        .ok_or(CollectError::Overflow("auxiliary_parameter"))
}

/// `avg_reward × auxiliary_parameter × 10^6`
///
/// # Errors
///
/// Returns [`CollectError::Overflow`] if either multiplication overflows.
pub fn reward_per_unit(avg_reward: Decimal, auxiliary: Decimal) -> Result<Decimal, CollectError> {
    avg_reward
        .checked_mul(auxiliary)
        .and_then(|v| v.checked_mul(Decimal::from(POWER_SCALE)))
        .ok_or(CollectError::Overflow("reward_per_unit"))
}

/// `reward_per_unit × last_24h_power`
///
/// # Errors
///
/// Returns [`CollectError::NonFinitePower`] for NaN or infinite power, and
/// [`CollectError::Overflow`] if the power or the product does not fit a
/// `Decimal`.
pub fn expected_reward(reward_per_unit: Decimal, last_24h_power: f64) -> Result<Decimal, CollectError> {
    if !last_24h_power.is_finite() {
        return Err(CollectError::NonFinitePower(last_24h_power));
    }
    let power = power_to_decimal(last_24h_power)?;
    reward_per_unit
        .checked_mul(power)
        .ok_or(CollectError::Overflow("expected_reward"))
}

/// Exact decimal value of the float's shortest round-trip form
/// (`6.666666666666666e-7` -> `0.0000006666666666666666`)
fn power_to_decimal(power: f64) -> Result<Decimal, CollectError> {
    Decimal::from_str(&power.to_string()).map_err(|_| CollectError::Overflow("last_24h_power"))
}

/// Full derivation from network averages and cluster power
///
/// # Errors
///
/// Propagates any error from the three steps above.
pub fn derive_expected_reward(
    avg_reward: Decimal,
    avg_proof_target: Decimal,
    last_24h_power: f64,
) -> Result<Decimal, CollectError> {
    let aux = auxiliary_parameter(avg_proof_target)?;
    let rpu = reward_per_unit(avg_reward, aux)?;
    expected_reward(rpu, last_24h_power)
}
