use crate::{error::DecodeError, transaction::Transaction};

pub struct Decoder;

/// Serializes a transaction into the schema-less JSON carried by the topic.
pub fn encode(tx: &Transaction) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(tx)
}

impl super::Decoder for Decoder {
    fn get_name(&self) -> String {
        String::from("json")
    }
    fn decode(&self, message: &[u8]) -> Result<Transaction, DecodeError> {
        let tx: Transaction = serde_json::from_slice(message)?;
        super::validate(&tx)?;
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Decoder as _;
    use chrono::NaiveDate;
    use serde_json::{json, Value};

    fn sample() -> Transaction {
        Transaction {
            transaction_id: String::from("T1"),
            customer_id: String::from("CUST_42"),
            merchant_id: String::from("MERCH_7"),
            amount: 123.45,
            timestamp: NaiveDate::from_ymd_opt(2025, 3, 1)
                .unwrap()
                .and_hms_micro_opt(14, 5, 9, 123_456)
                .unwrap(),
            location: String::from("Toronto"),
            merchant_category: String::from("retail"),
            is_international: true,
        }
    }

    #[test]
    fn decode_reproduces_every_field() {
        let mut tx = sample();
        tx.amount = 50.0 + 0.1234567890123 * 950.0;
        let bytes = encode(&tx).unwrap();
        let decoded = Decoder.decode(&bytes).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.amount.to_bits(), tx.amount.to_bits());
    }

    #[test]
    fn field_names_match_wire_schema() {
        let value: Value = serde_json::from_slice(&encode(&sample()).unwrap()).unwrap();
        let mut keys: Vec<&str> = value.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "amount",
                "customerId",
                "isInternational",
                "location",
                "merchantCategory",
                "merchantId",
                "timestamp",
                "transactionId",
            ]
        );
        assert_eq!(value["timestamp"], "2025-03-01T14:05:09.123456");
    }

    #[test]
    fn embedded_type_hints_are_ignored() {
        let payload = json!({
            "@class": "com.example.producer.model.Transaction",
            "transactionId": "T9",
            "customerId": "CUST_1",
            "merchantId": "MERCH_1",
            "amount": 75.5,
            "timestamp": "2025-03-01T14:05:09",
            "location": "Toronto",
            "merchantCategory": "retail",
            "isInternational": false
        });
        let tx = Decoder.decode(payload.to_string().as_bytes()).unwrap();
        assert_eq!(tx.transaction_id, "T9");
        assert_eq!(tx.amount, 75.5);
    }

    #[test]
    fn malformed_payload_fails() {
        let err = Decoder.decode(b"{not json").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn type_mismatch_fails() {
        let mut value = serde_json::to_value(sample()).unwrap();
        value["amount"] = json!("lots");
        let err = Decoder.decode(value.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn missing_field_fails() {
        let mut value = serde_json::to_value(sample()).unwrap();
        value.as_object_mut().unwrap().remove("isInternational");
        assert!(Decoder.decode(value.to_string().as_bytes()).is_err());
    }

    #[test]
    fn non_positive_amount_is_invalid() {
        let mut tx = sample();
        tx.amount = 0.0;
        let err = Decoder.decode(&encode(&tx).unwrap()).unwrap_err();
        assert!(matches!(err, DecodeError::Invalid(_)));
    }

    #[test]
    fn unstorable_amount_is_invalid() {
        for amount in [0.004, 1e18] {
            let mut tx = sample();
            tx.amount = amount;
            let err = Decoder.decode(&encode(&tx).unwrap()).unwrap_err();
            assert!(matches!(err, DecodeError::Invalid(_)), "{amount}");
        }
    }

    #[test]
    fn empty_id_is_invalid() {
        let mut tx = sample();
        tx.transaction_id.clear();
        let err = Decoder.decode(&encode(&tx).unwrap()).unwrap_err();
        assert!(matches!(err, DecodeError::Invalid(_)));
    }
}
