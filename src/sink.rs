//! Persistence sink
//!
//! Every write is keyed on `transaction_id`: a transaction delivered twice is
//! stored once, and the second call reports [PersistOutcome::Duplicate].
pub mod postgres;

use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::{error::PersistError, transaction::Transaction};

/// Scale amounts are stored with
pub const AMOUNT_SCALE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Inserted,
    /// a record with this `transaction_id` already exists, nothing was written
    Duplicate,
}

#[async_trait]
pub trait Sink: Send + Sync {
    async fn persist(&self, tx: &Transaction) -> Result<PersistOutcome, PersistError>;
}

/// Largest amount a `NUMERIC(19, 2)` column holds
pub fn max_amount() -> Decimal {
    Decimal::from_i128_with_scale(9_999_999_999_999_999_999, AMOUNT_SCALE)
}

/// Converts a wire amount into the exact decimal that gets stored.
///
/// Goes through the shortest decimal representation of the float, so `123.45`
/// becomes exactly `123.45` rather than the binary expansion `123.4500000000000028...`.
pub fn amount_to_decimal(amount: f64) -> Result<Decimal, PersistError> {
    to_cents(amount).map_err(PersistError::ConstraintViolation)
}

/// Same conversion as [amount_to_decimal], reporting why the amount cannot be stored
pub fn to_cents(amount: f64) -> Result<Decimal, String> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(format!("amount must be positive, got {amount}"));
    }
    let exact =
        Decimal::from_str(&amount.to_string()).map_err(|e| format!("amount {amount}: {e}"))?;
    checked_amount(scale_amount(exact))
}

/// Rounds half away from zero to [AMOUNT_SCALE] places, matching `NUMERIC(19, 2)`
pub fn scale_amount(amount: Decimal) -> Decimal {
    let mut rounded =
        amount.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(AMOUNT_SCALE);
    rounded
}

/// Accepts a scaled amount only if the column constraints will
pub fn checked_amount(amount: Decimal) -> Result<Decimal, String> {
    if amount <= Decimal::ZERO {
        return Err(format!("amount must be at least 0.01, got {amount}"));
    }
    if amount > max_amount() {
        return Err(format!("amount {amount} exceeds {}", max_amount()));
    }
    Ok(amount)
}
