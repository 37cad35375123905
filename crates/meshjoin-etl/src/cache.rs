//! In-memory master-data cache
//!
//! Customers and products are read in full, once, before the join stage
//! consumes its first chunk. The result is an immutable [`MasterDataSnapshot`]
//! installed behind a `OnceCell`, so lookups after the load take no locks.

use async_trait::async_trait;
use meshjoin_common::types::{Customer, Product};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};

use crate::error::{PipelineError, Result};

/// Bulk reader for the dimension tables
#[async_trait]
pub trait MasterDataSource: Send + Sync {
    /// Read every customer row
    async fn load_customers(&self) -> Result<Vec<Customer>>;

    /// Read every product row
    async fn load_products(&self) -> Result<Vec<Product>>;
}

/// Master data held in memory, e.g. for embedding or tests
#[derive(Debug, Clone, Default)]
pub struct StaticMasterData {
    customers: Vec<Customer>,
    products: Vec<Product>,
}

impl StaticMasterData {
    pub fn new(customers: Vec<Customer>, products: Vec<Product>) -> Self {
        Self {
            customers,
            products,
        }
    }
}

#[async_trait]
impl MasterDataSource for StaticMasterData {
    async fn load_customers(&self) -> Result<Vec<Customer>> {
        Ok(self.customers.clone())
    }

    async fn load_products(&self) -> Result<Vec<Product>> {
        Ok(self.products.clone())
    }
}

/// Point-in-time copy of both dimensions
#[derive(Debug, Default)]
pub struct MasterDataSnapshot {
    customers: HashMap<i32, Customer>,
    products: HashMap<i32, Product>,
}

impl MasterDataSnapshot {
    /// Build the lookup maps. On duplicate keys the later row wins.
    pub fn new(customers: Vec<Customer>, products: Vec<Product>) -> Self {
        let customer_rows = customers.len();
        let product_rows = products.len();

        let customers: HashMap<_, _> = customers
            .into_iter()
            .map(|c| (c.customer_id, c))
            .collect();
        let products: HashMap<_, _> = products.into_iter().map(|p| (p.product_id, p)).collect();

        if customers.len() < customer_rows {
            warn!(
                duplicates = customer_rows - customers.len(),
                "Duplicate customer ids in master data, keeping last row"
            );
        }
        if products.len() < product_rows {
            warn!(
                duplicates = product_rows - products.len(),
                "Duplicate product ids in master data, keeping last row"
            );
        }

        Self {
            customers,
            products,
        }
    }

    pub fn customer(&self, customer_id: i32) -> Option<&Customer> {
        self.customers.get(&customer_id)
    }

    pub fn product(&self, product_id: i32) -> Option<&Product> {
        self.products.get(&product_id)
    }

    pub fn customer_count(&self) -> usize {
        self.customers.len()
    }

    pub fn product_count(&self) -> usize {
        self.products.len()
    }
}

/// Load-once cache over a [`MasterDataSource`]
pub struct MasterDataCache {
    source: Arc<dyn MasterDataSource>,
    snapshot: OnceCell<MasterDataSnapshot>,
}

impl MasterDataCache {
    pub fn new(source: Arc<dyn MasterDataSource>) -> Self {
        Self {
            source,
            snapshot: OnceCell::new(),
        }
    }

    /// Bulk-load both dimensions and install the snapshot.
    ///
    /// Concurrent callers share a single load. Once installed, later calls
    /// return the same snapshot without touching the source. A failed load
    /// leaves the cache empty and is reported as [`PipelineError::MasterDataLoad`].
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<&MasterDataSnapshot> {
        self.snapshot
            .get_or_try_init(|| async {
                let customers = self
                    .source
                    .load_customers()
                    .await
                    .map_err(|e| PipelineError::MasterDataLoad(format!("customers: {}", e)))?;
                let products = self
                    .source
                    .load_products()
                    .await
                    .map_err(|e| PipelineError::MasterDataLoad(format!("products: {}", e)))?;

                let snapshot = MasterDataSnapshot::new(customers, products);
                info!(
                    customers = snapshot.customer_count(),
                    products = snapshot.product_count(),
                    "Master data loaded"
                );
                Ok::<_, PipelineError>(snapshot)
            })
            .await
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot.initialized()
    }

    /// The installed snapshot, if `load` has completed
    pub fn snapshot(&self) -> Option<&MasterDataSnapshot> {
        self.snapshot.get()
    }

    /// `None` when the id is unknown or the cache has not been loaded
    pub fn lookup_customer(&self, customer_id: i32) -> Option<&Customer> {
        self.snapshot.get()?.customer(customer_id)
    }

    /// `None` when the id is unknown or the cache has not been loaded
    pub fn lookup_product(&self, product_id: i32) -> Option<&Product> {
        self.snapshot.get()?.product(product_id)
    }
}
