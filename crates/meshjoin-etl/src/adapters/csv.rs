//! CSV-backed transaction source and master data
//!
//! Expected headers:
//! - transactions: `ORDER_ID,ORDER_DATE,PRODUCT_ID,CUSTOMER_ID,QUANTITY,TIME_ID`
//! - customers: `CUSTOMER_ID,CUSTOMER_NAME,GENDER`
//! - products: `PRODUCT_ID,PRODUCT_NAME,PRODUCT_PRICE,SUPPLIER_ID,SUPPLIER_NAME,`
//!   `STORE_ID,STORE_NAME`

use async_trait::async_trait;
use csv_async::{AsyncReaderBuilder, Trim};
use futures::stream::{BoxStream, StreamExt};
use meshjoin_common::types::{parse_order_date, parse_price, Customer, Product, Transaction};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::cache::MasterDataSource;
use crate::error::{PipelineError, Result};
use crate::reader::{TransactionSource, MAX_PREALLOCATED_ROWS};

#[derive(Debug, Deserialize)]
struct TransactionRow {
    #[serde(rename = "ORDER_ID")]
    order_id: i32,
    #[serde(rename = "ORDER_DATE")]
    order_date: String,
    #[serde(rename = "PRODUCT_ID")]
    product_id: i32,
    #[serde(rename = "CUSTOMER_ID")]
    customer_id: i32,
    #[serde(rename = "QUANTITY")]
    quantity: i32,
    #[serde(rename = "TIME_ID")]
    time_id: i32,
}

impl TransactionRow {
    fn into_transaction(self) -> Result<Transaction> {
        let order_date = parse_order_date(&self.order_date)?;
        Ok(Transaction::new(
            self.order_id,
            order_date,
            self.product_id,
            self.customer_id,
            self.quantity,
            self.time_id,
        )?)
    }
}

#[derive(Debug, Deserialize)]
struct CustomerRow {
    #[serde(rename = "CUSTOMER_ID")]
    customer_id: i32,
    #[serde(rename = "CUSTOMER_NAME")]
    customer_name: String,
    #[serde(rename = "GENDER")]
    gender: String,
}

#[derive(Debug, Deserialize)]
struct ProductRow {
    #[serde(rename = "PRODUCT_ID")]
    product_id: i32,
    #[serde(rename = "PRODUCT_NAME")]
    product_name: String,
    #[serde(rename = "PRODUCT_PRICE")]
    product_price: String,
    #[serde(rename = "SUPPLIER_ID")]
    supplier_id: i32,
    #[serde(rename = "SUPPLIER_NAME")]
    supplier_name: String,
    #[serde(rename = "STORE_ID")]
    store_id: i32,
    #[serde(rename = "STORE_NAME")]
    store_name: String,
}

impl ProductRow {
    fn into_product(self) -> Result<Product> {
        let price = parse_price(&self.product_price)?;
        Ok(Product::new(
            self.product_id,
            self.product_name,
            price,
            self.supplier_id,
            self.supplier_name,
            self.store_id,
            self.store_name,
        )?)
    }
}

type RowStream<T> = BoxStream<'static, std::result::Result<T, csv_async::Error>>;

async fn open_rows<T>(path: &Path) -> Result<RowStream<T>>
where
    T: DeserializeOwned + Send + 'static,
{
    let file = tokio::fs::File::open(path).await.map_err(|e| {
        PipelineError::SourceRead(format!("cannot open {}: {}", path.display(), e))
    })?;

    let rows = AsyncReaderBuilder::new()
        .trim(Trim::All)
        .create_deserializer(file)
        .into_deserialize::<T>();

    Ok(rows.boxed())
}

async fn read_all<T>(path: &Path) -> Result<Vec<T>>
where
    T: DeserializeOwned + Send + 'static,
{
    let mut rows = open_rows::<T>(path).await?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await {
        out.push(row?);
    }
    Ok(out)
}

/// Streams transactions from a CSV file already sorted by `ORDER_DATE`.
///
/// The file is opened lazily on the first `next_batch` call. A malformed row
/// ends the stream, but rows read before it are returned first.
pub struct CsvTransactionSource {
    path: PathBuf,
    rows: Option<RowStream<TransactionRow>>,
    line: u64,
    deferred: Option<PipelineError>,
}

impl CsvTransactionSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            rows: None,
            line: 1,
            deferred: None,
        }
    }
}

#[async_trait]
impl TransactionSource for CsvTransactionSource {
    async fn next_batch(&mut self, max: usize) -> Result<Vec<Transaction>> {
        if let Some(e) = self.deferred.take() {
            return Err(e);
        }
        if self.rows.is_none() {
            info!(path = %self.path.display(), "Opening transaction file");
            self.rows = Some(open_rows(&self.path).await?);
        }
        let Some(rows) = self.rows.as_mut() else {
            return Ok(Vec::new());
        };

        let mut batch = Vec::with_capacity(max.min(MAX_PREALLOCATED_ROWS));
        while batch.len() < max {
            let Some(row) = rows.next().await else {
                break;
            };
            self.line += 1;

            match row
                .map_err(PipelineError::from)
                .and_then(TransactionRow::into_transaction)
            {
                Ok(transaction) => batch.push(transaction),
                Err(e) => {
                    let e = PipelineError::SourceRead(format!(
                        "{} line {}: {}",
                        self.path.display(),
                        self.line,
                        e
                    ));
                    if batch.is_empty() {
                        return Err(e);
                    }
                    self.deferred = Some(e);
                    break;
                }
            }
        }

        debug!(rows = batch.len(), line = self.line, "Read transaction rows");
        Ok(batch)
    }
}

/// Customers and products from two CSV files
#[derive(Debug, Clone)]
pub struct CsvMasterData {
    customers: PathBuf,
    products: PathBuf,
}

impl CsvMasterData {
    pub fn new(customers: impl Into<PathBuf>, products: impl Into<PathBuf>) -> Self {
        Self {
            customers: customers.into(),
            products: products.into(),
        }
    }
}

#[async_trait]
impl MasterDataSource for CsvMasterData {
    async fn load_customers(&self) -> Result<Vec<Customer>> {
        let rows = read_all::<CustomerRow>(&self.customers).await?;
        Ok(rows
            .into_iter()
            .map(|row| Customer::new(row.customer_id, row.customer_name, row.gender))
            .collect())
    }

    async fn load_products(&self) -> Result<Vec<Product>> {
        read_all::<ProductRow>(&self.products)
            .await?
            .into_iter()
            .map(ProductRow::into_product)
            .collect()
    }
}
