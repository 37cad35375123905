//! Meshjoin Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared record types, error handling and logging for the meshjoin workspace.
//!
//! # Overview
//!
//! - **Types**: the transaction fact row, the customer and product dimension
//!   rows, and the enriched warehouse row produced by joining them
//! - **Error Handling**: record validation and parse errors
//! - **Logging**: centralized `tracing` subscriber setup
//!
//! # Example
//!
//! ```no_run
//! use bigdecimal::BigDecimal;
//! use chrono::NaiveDate;
//! use meshjoin_common::types::{Customer, EnrichedRecord, Product, Transaction};
//!
//! fn enrich() -> meshjoin_common::Result<EnrichedRecord> {
//!     let order_date = NaiveDate::from_ymd_opt(2019, 7, 1)
//!         .and_then(|d| d.and_hms_opt(9, 30, 0))
//!         .ok_or_else(|| meshjoin_common::CommonError::Parse("bad date".into()))?;
//!     let tx = Transaction::new(1, order_date, 10, 7, 2, 1)?;
//!     let customer = Customer::new(7, "Ayesha Khan", "F");
//!     let product = Product::new(10, "Tea", BigDecimal::from(3), 1, "Lipton", 4, "Metro F-7")?;
//!     Ok(EnrichedRecord::from_parts(&tx, &customer, &product))
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CommonError, Result};
