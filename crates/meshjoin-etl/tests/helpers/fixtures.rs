//! Fixture builders

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use meshjoin_common::types::{Customer, Product, Transaction};
use meshjoin_etl::{PipelineConfig, StaticMasterData};
use std::time::Duration;

pub const KNOWN_CUSTOMER: i32 = 1;
pub const KNOWN_PRODUCT: i32 = 10;

/// Base timestamp; transaction `n` is `n` seconds later
pub fn order_date(offset_secs: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2019, 5, 1)
        .and_then(|d| d.and_hms_opt(10, 0, 0))
        .map(|t| t + chrono::Duration::seconds(offset_secs))
        .unwrap_or_default()
}

pub fn transaction(order_id: i32, customer_id: i32, product_id: i32, quantity: i32) -> Transaction {
    Transaction::new(order_id, order_date(order_id as i64), product_id, customer_id, quantity, 1)
        .unwrap_or_else(|e| panic!("invalid fixture transaction {}: {}", order_id, e))
}

/// `count` transactions with ids `1..=count`, quantity 2, all matching
pub fn matching_transactions(count: i32) -> Vec<Transaction> {
    (1..=count)
        .map(|id| transaction(id, KNOWN_CUSTOMER, KNOWN_PRODUCT, 2))
        .collect()
}

/// Customer 1 and 2, product 10 priced 10.00 and product 11 priced 3.50
pub fn master_data() -> StaticMasterData {
    let products = vec![
        Product::new(KNOWN_PRODUCT, "Tea", BigDecimal::from(10), 1, "Tapal", 1, "Metro Lahore"),
        Product::new(11, "Sugar", BigDecimal::new(350.into(), 2), 2, "Nestle", 1, "Metro Lahore"),
    ]
    .into_iter()
    .collect::<Result<Vec<_>, _>>()
    .unwrap_or_else(|e| panic!("invalid fixture product: {}", e));

    StaticMasterData::new(
        vec![
            Customer::new(KNOWN_CUSTOMER, "Ayesha Khan", "F"),
            Customer::new(2, "Bilal Ahmed", "M"),
        ],
        products,
    )
}

/// Chunks of 100, no pacing, generous grace period
pub fn fast_config() -> PipelineConfig {
    PipelineConfig::default()
        .with_chunk_size(100)
        .with_pace_interval(Duration::ZERO)
        .with_shutdown_grace(Duration::from_secs(5))
}
