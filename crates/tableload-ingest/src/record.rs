//! Synthetic order records
//!
//! A [`LoadUnit`] is one independently scheduled batch. [`synthesize`] turns it
//! into `record_count` fully populated [`SyntheticRecord`]s. Generation is pure
//! apart from the clock and a random source; the default source is the
//! thread-local generator, so concurrent units never share RNG state.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::PARTITION_GROUP_SIZE;

/// Upper bound (exclusive) of the `order_date` offset, in days.
pub const ORDER_DATE_WINDOW_DAYS: i64 = 31;

/// One unit of concurrent work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadUnit {
    index: usize,
    partition_key: String,
    record_count: usize,
}

impl LoadUnit {
    /// Create the unit at 0-based `index`, deriving its partition key from `prefix`
    pub fn new(index: usize, prefix: &str, record_count: usize) -> Self {
        Self {
            index,
            partition_key: partition_key_for(prefix, index),
            record_count,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// 1-based number used in operator-facing messages
    pub fn number(&self) -> usize {
        self.index + 1
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn record_count(&self) -> usize {
        self.record_count
    }
}

/// Partition key shared by every group of [`PARTITION_GROUP_SIZE`] consecutive units
pub fn partition_key_for(prefix: &str, unit_index: usize) -> String {
    format!("{}_{}", prefix, unit_index / PARTITION_GROUP_SIZE)
}

/// Row key, unique within a run because `(unit, item)` pairs are unique
pub fn row_key_for(unit_index: usize, item_index: usize) -> String {
    format!("Order_{}_{}", unit_index, item_index)
}

/// One generated order row
///
/// Serialized with the store's PascalCase property names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SyntheticRecord {
    pub partition_key: String,
    pub row_key: String,
    pub created_at: DateTime<Utc>,
    pub user_id: u32,
    pub user_name: String,
    pub product_id: u32,
    pub product_name: String,
    pub price: f64,
    pub quantity: u32,
    /// `round2(price * quantity)`, fixed at generation time
    pub total: f64,
    pub order_date: DateTime<Utc>,
}

impl SyntheticRecord {
    /// Store identity of the row
    pub fn key(&self) -> (&str, &str) {
        (&self.partition_key, &self.row_key)
    }
}

/// Round half away from zero to two decimal places
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Synthesize every record of `unit` with the thread-local random source
pub fn synthesize(unit: &LoadUnit) -> Vec<SyntheticRecord> {
    synthesize_with(unit, &mut rand::rng())
}

/// Synthesize every record of `unit` with a caller-supplied random source
pub fn synthesize_with<R: Rng>(unit: &LoadUnit, rng: &mut R) -> Vec<SyntheticRecord> {
    (0..unit.record_count())
        .map(|item_index| generate_record(unit, item_index, Utc::now(), &mut *rng))
        .collect()
}

/// Build the record at `item_index` of `unit`, stamped with `created_at`
pub fn generate_record<R: Rng>(
    unit: &LoadUnit,
    item_index: usize,
    created_at: DateTime<Utc>,
    rng: &mut R,
) -> SyntheticRecord {
    let price = round2(rng.random_range(10.0..500.0));
    let quantity = rng.random_range(1..21);
    let age_days = rng.random_range(0..ORDER_DATE_WINDOW_DAYS);

    SyntheticRecord {
        partition_key: unit.partition_key().to_string(),
        row_key: row_key_for(unit.index(), item_index),
        created_at,
        user_id: rng.random_range(1000..10000),
        user_name: format!("User_{}", rng.random_range(1..=5000)),
        product_id: rng.random_range(100..1000),
        product_name: format!("Product_{}", rng.random_range(1..=100)),
        price,
        quantity,
        total: round2(price * f64::from(quantity)),
        order_date: created_at - Duration::days(age_days),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn test_partition_key_groups_of_fifty() {
        assert_eq!(partition_key_for("Batch", 0), "Batch_0");
        assert_eq!(partition_key_for("Batch", 49), "Batch_0");
        assert_eq!(partition_key_for("Batch", 50), "Batch_1");
        assert_eq!(partition_key_for("Nightly", 149), "Nightly_2");
    }

    #[test]
    fn test_unit_accessors() {
        let unit = LoadUnit::new(73, "Batch", 100);
        assert_eq!(unit.index(), 73);
        assert_eq!(unit.number(), 74);
        assert_eq!(unit.partition_key(), "Batch_1");
        assert_eq!(unit.record_count(), 100);
    }

    #[test]
    fn test_synthesize_count_and_keys() {
        let unit = LoadUnit::new(3, "Batch", 100);
        let records = synthesize(&unit);

        assert_eq!(records.len(), 100);
        assert_eq!(records[0].row_key, "Order_3_0");
        assert_eq!(records[99].row_key, "Order_3_99");
        assert!(records.iter().all(|r| r.partition_key == "Batch_0"));

        let keys: HashSet<_> = records.iter().map(|r| r.row_key.clone()).collect();
        assert_eq!(keys.len(), 100);
    }

    #[test]
    fn test_seeded_generation_is_reproducible() {
        let unit = LoadUnit::new(0, "Batch", 5);
        let now = Utc::now();
        let a = generate_record(&unit, 1, now, &mut StdRng::seed_from_u64(7));
        let b = generate_record(&unit, 1, now, &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }

    #[test]
    fn test_serializes_pascal_case() {
        let unit = LoadUnit::new(0, "Batch", 1);
        let record = synthesize(&unit).remove(0);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["PartitionKey"], "Batch_0");
        assert_eq!(json["RowKey"], "Order_0_0");
        assert!(json.get("OrderDate").is_some());
        assert!(json.get("order_date").is_none());
    }

    #[test]
    fn test_adjacent_units_share_partition_iff_same_group() {
        for k in 0..1_000usize {
            let same = partition_key_for("P", k) == partition_key_for("P", k + 1);
            assert_eq!(same, k / 50 == (k + 1) / 50, "k = {}", k);
        }
    }

    proptest! {
        #[test]
        fn prop_record_fields_within_bounds(seed in any::<u64>(), unit_index in 0usize..10_000) {
            let unit = LoadUnit::new(unit_index, "Batch", 1);
            let mut rng = StdRng::seed_from_u64(seed);
            let created_at = Utc::now();
            let record = generate_record(&unit, 0, created_at, &mut rng);

            prop_assert_eq!(record.total, round2(record.price * f64::from(record.quantity)));
            prop_assert!(record.price >= 10.0 && record.price <= 500.0);
            prop_assert!((1..=20).contains(&record.quantity));
            prop_assert!((1000..10000).contains(&record.user_id));
            prop_assert!((100..1000).contains(&record.product_id));
            prop_assert!(record.order_date <= record.created_at);
            let age = (record.created_at - record.order_date).num_days();
            prop_assert!((0..ORDER_DATE_WINDOW_DAYS).contains(&age));
        }
    }
}
