//! Synthetic transaction generator
use chrono::Utc;
use chrono_tz::Tz;
use rand::{rngs::StdRng, Rng, SeedableRng};
use uuid::Builder;

use crate::transaction::Transaction;

/// Customer ids are drawn from `CUST_0 .. CUST_9999`
pub const CUSTOMER_SPACE: u32 = 10_000;
/// Merchant ids are drawn from `MERCH_0 .. MERCH_499`
pub const MERCHANT_SPACE: u32 = 500;
pub const MIN_AMOUNT: f64 = 50.0;
pub const MAX_AMOUNT: f64 = 1000.0;
pub const INTERNATIONAL_PROBABILITY: f64 = 0.1;

/// Produces random transactions from an injected random source.
///
/// The random source is owned by the generator, so a seeded [StdRng] yields
/// the same sequence of ids, customers, merchants and amounts on every run.
pub struct Generator<R: Rng = StdRng> {
    rng: R,
    timezone: Tz,
    location: String,
    merchant_category: String,
}

impl Generator<StdRng> {
    /// Generator seeded from `seed`, or from OS entropy when `None`
    pub fn from_seed(
        seed: Option<u64>,
        timezone: Tz,
        location: &str,
        merchant_category: &str,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Generator::new(rng, timezone, location, merchant_category)
    }
}

impl<R: Rng> Generator<R> {
    pub fn new(rng: R, timezone: Tz, location: &str, merchant_category: &str) -> Self {
        Generator {
            rng,
            timezone,
            location: location.to_owned(),
            merchant_category: merchant_category.to_owned(),
        }
    }

    pub fn generate(&mut self) -> Transaction {
        let id = Builder::from_random_bytes(self.rng.random()).into_uuid();
        let amount = MIN_AMOUNT + self.rng.random::<f64>() * (MAX_AMOUNT - MIN_AMOUNT);
        Transaction {
            transaction_id: id.to_string(),
            customer_id: format!("CUST_{}", self.rng.random_range(0..CUSTOMER_SPACE)),
            merchant_id: format!("MERCH_{}", self.rng.random_range(0..MERCHANT_SPACE)),
            amount,
            timestamp: Utc::now().with_timezone(&self.timezone).naive_local(),
            location: self.location.clone(),
            merchant_category: self.merchant_category.clone(),
            is_international: self.rng.random_bool(INTERNATIONAL_PROBABILITY),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn seeded(seed: u64) -> Generator {
        Generator::from_seed(Some(seed), chrono_tz::America::Toronto, "Toronto", "retail")
    }

    #[test]
    fn amounts_stay_within_bounds() {
        let mut generator = seeded(7);
        for _ in 0..10_000 {
            let tx = generator.generate();
            assert!(
                (MIN_AMOUNT..=MAX_AMOUNT).contains(&tx.amount),
                "amount out of range: {}",
                tx.amount
            );
        }
    }

    #[test]
    fn roughly_one_in_ten_is_international() {
        let mut generator = seeded(11);
        let samples = 20_000;
        let international = (0..samples)
            .filter(|_| generator.generate().is_international)
            .count();
        let ratio = international as f64 / samples as f64;
        assert!((0.08..0.12).contains(&ratio), "international ratio {ratio}");
    }

    #[test]
    fn ids_come_from_bounded_namespaces() {
        let mut generator = seeded(3);
        for _ in 0..1_000 {
            let tx = generator.generate();
            let customer: u32 = tx.customer_id.strip_prefix("CUST_").unwrap().parse().unwrap();
            let merchant: u32 = tx.merchant_id.strip_prefix("MERCH_").unwrap().parse().unwrap();
            assert!(customer < CUSTOMER_SPACE);
            assert!(merchant < MERCHANT_SPACE);
            assert_eq!(tx.location, "Toronto");
            assert_eq!(tx.merchant_category, "retail");
        }
    }

    #[test]
    fn transaction_ids_are_unique_uuids() {
        let mut generator = seeded(5);
        let ids: HashSet<String> = (0..1_000)
            .map(|_| generator.generate().transaction_id)
            .collect();
        assert_eq!(ids.len(), 1_000);
        for id in &ids {
            let parsed = uuid::Uuid::parse_str(id).unwrap();
            assert_eq!(parsed.get_version_num(), 4);
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut a = seeded(42);
        let mut b = seeded(42);
        for _ in 0..100 {
            let (x, y) = (a.generate(), b.generate());
            assert_eq!(x.transaction_id, y.transaction_id);
            assert_eq!(x.customer_id, y.customer_id);
            assert_eq!(x.merchant_id, y.merchant_id);
            assert_eq!(x.amount, y.amount);
            assert_eq!(x.is_international, y.is_international);
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let a = seeded(1).generate();
        let b = seeded(2).generate();
        assert_ne!(a.transaction_id, b.transaction_id);
    }
}
