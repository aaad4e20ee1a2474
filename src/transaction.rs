//! Transaction wire schema and the records stored for it.
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Transaction event as it travels through the topic.
///
/// Field names on the wire are camelCase (`transactionId`, `isInternational`, ...)
/// so that producers and consumers written against the same JSON agree without
/// sharing any type metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Partition key and the idempotency key for persistence
    pub transaction_id: String,
    pub customer_id: String,
    pub merchant_id: String,
    pub amount: f64,
    /// Local, zone-less time at which the transaction was generated
    pub timestamp: NaiveDateTime,
    pub location: String,
    pub merchant_category: String,
    pub is_international: bool,
}

/// Stored form of a [Transaction]: surrogate key, exact amount, creation time.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTransaction {
    pub id: i64,
    pub transaction_id: String,
    pub customer_id: String,
    pub merchant_id: String,
    pub amount: Decimal,
    pub timestamp: NaiveDateTime,
    pub location: String,
    pub merchant_category: String,
    pub is_international: bool,
    pub created_at: DateTime<Utc>,
}

/// Manually inserted record served by the admin HTTP surface.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEvent {
    pub id: i64,
    pub card_last4: String,
    pub amount: Decimal,
    pub merchant: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTransactionEvent {
    pub card_last4: String,
    pub amount: Decimal,
    pub merchant: String,
}
