//! Postgres-backed transaction source, master data and warehouse sink
//!
//! Tables: `transactions`, `customers`, `products` and the configured
//! warehouse fact table (default `warehouse_sales`).

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use meshjoin_common::types::{Customer, EnrichedRecord, Product, Transaction};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, QueryBuilder};
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::MasterDataSource;
use crate::config::{DatabaseConfig, WAREHOUSE_COLUMNS};
use crate::error::{PipelineError, Result};
use crate::reader::TransactionSource;
use crate::sink::WarehouseSink;

/// Open a connection pool for the pipeline collaborators
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    config.validate()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(&config.url)
        .await?;

    info!(
        max_connections = config.max_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    order_id: i32,
    order_date: NaiveDateTime,
    product_id: i32,
    customer_id: i32,
    quantity: i32,
    time_id: i32,
}

#[derive(Debug, FromRow)]
struct CustomerRow {
    customer_id: i32,
    customer_name: String,
    gender: String,
}

#[derive(Debug, FromRow)]
struct ProductRow {
    product_id: i32,
    product_name: String,
    product_price: BigDecimal,
    supplier_id: i32,
    supplier_name: String,
    store_id: i32,
    store_name: String,
}

/// Reads `transactions` ordered by `(order_date, order_id)` using keyset paging,
/// so no cursor or transaction stays open between batches.
pub struct PgTransactionSource {
    pool: PgPool,
    last_key: Option<(NaiveDateTime, i32)>,
}

impl PgTransactionSource {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            last_key: None,
        }
    }
}

#[async_trait]
impl TransactionSource for PgTransactionSource {
    async fn next_batch(&mut self, max: usize) -> Result<Vec<Transaction>> {
        let limit = i64::try_from(max).unwrap_or(i64::MAX);

        let rows: Vec<TransactionRow> = match self.last_key {
            None => {
                sqlx::query_as(
                    r#"
                    SELECT order_id, order_date, product_id, customer_id, quantity, time_id
                    FROM transactions
                    ORDER BY order_date, order_id
                    LIMIT $1
                    "#,
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            Some((order_date, order_id)) => {
                sqlx::query_as(
                    r#"
                    SELECT order_id, order_date, product_id, customer_id, quantity, time_id
                    FROM transactions
                    WHERE (order_date, order_id) > ($1, $2)
                    ORDER BY order_date, order_id
                    LIMIT $3
                    "#,
                )
                .bind(order_date)
                .bind(order_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| PipelineError::SourceRead(e.to_string()))?;

        if let Some(last) = rows.last() {
            self.last_key = Some((last.order_date, last.order_id));
        }
        debug!(rows = rows.len(), "Fetched transaction page");

        rows.into_iter()
            .map(|row| {
                Transaction::new(
                    row.order_id,
                    row.order_date,
                    row.product_id,
                    row.customer_id,
                    row.quantity,
                    row.time_id,
                )
                .map_err(|e| PipelineError::SourceRead(e.to_string()))
            })
            .collect()
    }
}

/// Bulk reads of the `customers` and `products` tables
pub struct PgMasterData {
    pool: PgPool,
}

impl PgMasterData {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MasterDataSource for PgMasterData {
    async fn load_customers(&self) -> Result<Vec<Customer>> {
        let rows: Vec<CustomerRow> =
            sqlx::query_as("SELECT customer_id, customer_name, gender FROM customers")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|row| Customer::new(row.customer_id, row.customer_name, row.gender))
            .collect())
    }

    async fn load_products(&self) -> Result<Vec<Product>> {
        let rows: Vec<ProductRow> = sqlx::query_as(
            r#"
            SELECT product_id, product_name, product_price,
                   supplier_id, supplier_name, store_id, store_name
            FROM products
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(Product::new(
                    row.product_id,
                    row.product_name,
                    row.product_price,
                    row.supplier_id,
                    row.supplier_name,
                    row.store_id,
                    row.store_name,
                )?)
            })
            .collect()
    }
}

/// Multi-row INSERT of each batch into the warehouse table, one transaction per batch.
///
/// Rows whose `order_id` already exists are skipped so redelivered batches are harmless.
pub struct PostgresSink {
    pool: PgPool,
    table: String,
}

impl PostgresSink {
    pub fn new(pool: PgPool, config: &DatabaseConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            pool,
            table: config.warehouse_table.clone(),
        })
    }
}

#[async_trait]
impl WarehouseSink for PostgresSink {
    async fn write_batch(&self, records: &[EnrichedRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        if records.len() > DatabaseConfig::max_chunk_size() {
            return Err(PipelineError::Config(format!(
                "batch of {} rows exceeds the {} bind parameter limit ({} columns per row)",
                records.len(),
                crate::config::POSTGRES_MAX_BIND_PARAMS,
                WAREHOUSE_COLUMNS
            )));
        }

        let mut tx = self.pool.begin().await?;

        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            r#"
            INSERT INTO {} (
                order_id,
                order_date,
                product_id,
                customer_id,
                customer_name,
                gender,
                quantity,
                product_name,
                product_price,
                supplier_id,
                supplier_name,
                store_id,
                store_name,
                sale
            )
            "#,
            self.table
        ));

        query_builder.push_values(records, |mut b, record| {
            b.push_bind(record.order_id)
                .push_bind(record.order_date)
                .push_bind(record.product_id)
                .push_bind(record.customer_id)
                .push_bind(&record.customer_name)
                .push_bind(&record.gender)
                .push_bind(record.quantity)
                .push_bind(&record.product_name)
                .push_bind(&record.product_price)
                .push_bind(record.supplier_id)
                .push_bind(&record.supplier_name)
                .push_bind(record.store_id)
                .push_bind(&record.store_name)
                .push_bind(&record.sale);
        });

        query_builder.push(" ON CONFLICT (order_id) DO NOTHING");

        let result = query_builder.build().execute(&mut *tx).await?;
        tx.commit().await?;

        debug!(
            table = %self.table,
            records = records.len(),
            inserted = result.rows_affected(),
            "Warehouse batch committed"
        );
        Ok(())
    }
}
