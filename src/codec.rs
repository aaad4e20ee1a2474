//! Manages decoders
//!
//! A subscriber is bound to exactly one [Decoder] when it is built. The decoder
//! always produces a [Transaction]; nothing carried inside a record (headers,
//! type-hint properties) can change the target type.
pub mod json;

use std::sync::Arc;

use anyhow::anyhow;

use crate::{error::DecodeError, sink::to_cents, transaction::Transaction};

/// Decoder converts binary message from Kafka into a [Transaction]
pub trait Decoder {
    fn get_name(&self) -> String;
    fn decode(&self, message: &[u8]) -> Result<Transaction, DecodeError>;
}

impl<T: Decoder + ?Sized> Decoder for Arc<T> {
    fn get_name(&self) -> String {
        (**self).get_name()
    }
    fn decode(&self, message: &[u8]) -> Result<Transaction, DecodeError> {
        (**self).decode(message)
    }
}

/// Creates decoder of specified name.
/// If you add your own decoders, register them here
pub fn get_decoder(name: &str) -> Result<Arc<dyn Decoder + Send + Sync>, anyhow::Error> {
    match name {
        "json" => Ok(Arc::new(json::Decoder)),
        _ => Err(anyhow!("unknown decoder {}", name)),
    }
}

/// Checks the invariants the wire schema alone cannot express
pub fn validate(tx: &Transaction) -> Result<(), DecodeError> {
    if tx.transaction_id.is_empty() {
        return Err(DecodeError::Invalid(String::from("empty transactionId")));
    }
    // same bounds the store enforces
    to_cents(tx.amount).map_err(DecodeError::Invalid)?;
    Ok(())
}
