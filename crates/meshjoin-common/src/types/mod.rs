//! Record types flowing through the warehouse refresh pipeline
//!
//! Transactions are the fact rows read from the stream; customers and products
//! are the dimension rows held by the master-data cache; an [`EnrichedRecord`]
//! is the fact row joined with both dimensions, ready for the warehouse table.

use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{CommonError, Result};

/// Accepted `ORDER_DATE` layouts, tried in order
const ORDER_DATE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// One row of the transaction stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique within the stream
    pub order_id: i32,
    /// Stream order key
    pub order_date: NaiveDateTime,
    pub product_id: i32,
    pub customer_id: i32,
    /// Always positive
    pub quantity: i32,
    /// Reference into the time dimension, opaque here
    pub time_id: i32,
}

impl Transaction {
    pub fn new(
        order_id: i32,
        order_date: NaiveDateTime,
        product_id: i32,
        customer_id: i32,
        quantity: i32,
        time_id: i32,
    ) -> Result<Self> {
        if quantity <= 0 {
            return Err(CommonError::InvalidRecord(format!(
                "transaction {} has non-positive quantity {}",
                order_id, quantity
            )));
        }

        Ok(Self {
            order_id,
            order_date,
            product_id,
            customer_id,
            quantity,
            time_id,
        })
    }
}

/// Customer dimension row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub customer_id: i32,
    pub name: String,
    pub gender: String,
}

impl Customer {
    pub fn new(customer_id: i32, name: impl Into<String>, gender: impl Into<String>) -> Self {
        Self {
            customer_id,
            name: name.into(),
            gender: gender.into(),
        }
    }
}

/// Product dimension row, including its supplier and store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: i32,
    pub name: String,
    /// Never negative
    pub price: BigDecimal,
    pub supplier_id: i32,
    pub supplier_name: String,
    pub store_id: i32,
    pub store_name: String,
}

impl Product {
    pub fn new(
        product_id: i32,
        name: impl Into<String>,
        price: BigDecimal,
        supplier_id: i32,
        supplier_name: impl Into<String>,
        store_id: i32,
        store_name: impl Into<String>,
    ) -> Result<Self> {
        if price < BigDecimal::from(0) {
            return Err(CommonError::InvalidRecord(format!(
                "product {} has negative price {}",
                product_id, price
            )));
        }

        Ok(Self {
            product_id,
            name: name.into(),
            price,
            supplier_id,
            supplier_name: supplier_name.into(),
            store_id,
            store_name: store_name.into(),
        })
    }
}

/// Warehouse fact row: a transaction joined with its customer and product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub order_id: i32,
    pub order_date: NaiveDateTime,
    pub product_id: i32,
    pub customer_id: i32,
    pub customer_name: String,
    pub gender: String,
    pub quantity: i32,
    pub time_id: i32,
    pub product_name: String,
    pub product_price: BigDecimal,
    pub supplier_id: i32,
    pub supplier_name: String,
    pub store_id: i32,
    pub store_name: String,
    /// `quantity * product_price` at enrichment time
    pub sale: BigDecimal,
}

impl EnrichedRecord {
    /// Join a transaction with its resolved dimension rows.
    ///
    /// The caller is responsible for passing the customer and product whose
    /// ids match the transaction.
    pub fn from_parts(transaction: &Transaction, customer: &Customer, product: &Product) -> Self {
        let sale = BigDecimal::from(transaction.quantity) * &product.price;

        Self {
            order_id: transaction.order_id,
            order_date: transaction.order_date,
            product_id: product.product_id,
            customer_id: customer.customer_id,
            customer_name: customer.name.clone(),
            gender: customer.gender.clone(),
            quantity: transaction.quantity,
            time_id: transaction.time_id,
            product_name: product.name.clone(),
            product_price: product.price.clone(),
            supplier_id: product.supplier_id,
            supplier_name: product.supplier_name.clone(),
            store_id: product.store_id,
            store_name: product.store_name.clone(),
            sale,
        }
    }
}

/// An ordered batch moved between pipeline stages as one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk<T> {
    /// Publication order, starting at 0
    pub sequence: u64,
    pub records: Vec<T>,
}

impl<T> Chunk<T> {
    pub fn new(sequence: u64, records: Vec<T>) -> Self {
        Self { sequence, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Parse an order timestamp as exported by the transactional store
pub fn parse_order_date(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    ORDER_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .ok_or_else(|| CommonError::Parse(format!("Invalid order date: {}", raw)))
}

/// Parse a price column, tolerating a leading currency sign
pub fn parse_price(raw: &str) -> Result<BigDecimal> {
    let cleaned = raw.trim().trim_start_matches('$').trim();
    BigDecimal::from_str(cleaned)
        .map_err(|e| CommonError::Parse(format!("Invalid price '{}': {}", raw, e)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn order_date() -> NaiveDateTime {
        parse_order_date("2019-07-01 09:30:00").unwrap()
    }

    #[test]
    fn test_transaction_rejects_non_positive_quantity() {
        assert!(Transaction::new(1, order_date(), 1, 1, 0, 1).is_err());
        assert!(Transaction::new(1, order_date(), 1, 1, -3, 1).is_err());
        assert!(Transaction::new(1, order_date(), 1, 1, 1, 1).is_ok());
    }

    #[test]
    fn test_product_rejects_negative_price() {
        let result = Product::new(1, "Milk", BigDecimal::from(-1), 2, "Nestle", 3, "Metro G-9");
        assert!(matches!(result, Err(CommonError::InvalidRecord(_))));

        let free = Product::new(1, "Sample", BigDecimal::from(0), 2, "Nestle", 3, "Metro G-9");
        assert!(free.is_ok());
    }

    #[test]
    fn test_enriched_record_copies_dimensions_and_computes_sale() {
        let tx = Transaction::new(42, order_date(), 10, 7, 3, 99).unwrap();
        let customer = Customer::new(7, "Bilal Ahmed", "M");
        let product = Product::new(
            10,
            "Olive Oil",
            parse_price("12.35").unwrap(),
            5,
            "Sunridge",
            2,
            "Metro Lahore",
        )
        .unwrap();

        let record = EnrichedRecord::from_parts(&tx, &customer, &product);

        assert_eq!(record.order_id, 42);
        assert_eq!(record.order_date, tx.order_date);
        assert_eq!(record.time_id, 99);
        assert_eq!(record.customer_name, "Bilal Ahmed");
        assert_eq!(record.gender, "M");
        assert_eq!(record.product_name, "Olive Oil");
        assert_eq!(record.product_price, product.price);
        assert_eq!(record.supplier_id, 5);
        assert_eq!(record.supplier_name, "Sunridge");
        assert_eq!(record.store_id, 2);
        assert_eq!(record.store_name, "Metro Lahore");
        assert_eq!(record.sale, parse_price("37.05").unwrap());
    }

    #[test]
    fn test_parse_order_date_formats() {
        let spaced = parse_order_date("2019-07-01 09:30:00").unwrap();
        let iso = parse_order_date("2019-07-01T09:30:00").unwrap();
        assert_eq!(spaced, iso);
        assert!(parse_order_date("01/07/2019").is_err());
    }

    #[test]
    fn test_parse_price_strips_currency() {
        assert_eq!(parse_price("$4.50").unwrap(), parse_price("4.5").unwrap());
        assert!(parse_price("four").is_err());
    }

    #[test]
    fn test_chunk_len() {
        let chunk = Chunk::new(3, vec![1, 2, 3]);
        assert_eq!(chunk.len(), 3);
        assert!(!chunk.is_empty());
        assert!(Chunk::<u8>::new(0, Vec::new()).is_empty());
    }
}
