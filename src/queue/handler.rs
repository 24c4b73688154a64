use std::sync::Arc;

use crate::counter::Counter;
use crate::database::Database;
use crate::lifecycle::BoxError;
use crate::observability::metrics;
use crate::queue::{Product, ProductHandler};

/// Stores every consumed product when a database is configured, then
/// counts and logs it.
#[derive(Debug, Clone)]
pub struct ProductRecorder {
    consumed: Arc<Counter>,
    database: Option<Database>,
}

impl ProductRecorder {
    pub fn new(consumed: Arc<Counter>) -> Self {
        Self {
            consumed,
            database: None,
        }
    }

    /// Persist products to `database` before counting them.
    pub fn with_database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }
}

impl ProductHandler for ProductRecorder {
    async fn handle(&self, product: Product) -> Result<(), BoxError> {
        if product.name.trim().is_empty() {
            return Err("product name is empty".into());
        }

        tracing::info!(
            product = %product.name,
            description = %product.description,
            "Product consumed"
        );

        if let Some(database) = &self.database {
            let id = database.add_product(&product).await?;
            tracing::info!(id, product = %product.name, "Product added");
        }

        let total = self.consumed.add(1);
        metrics::record_product_consumed();
        tracing::debug!(total, "Products consumed so far");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;

    fn product(name: &str) -> Product {
        Product {
            name: name.into(),
            description: "desk".into(),
        }
    }

    #[tokio::test]
    async fn test_counts_valid_products_only() {
        let consumed = Arc::new(Counter::default());
        let recorder = ProductRecorder::new(consumed.clone());

        recorder.handle(product("lamp")).await.unwrap();
        let err = recorder.handle(product(" ")).await.unwrap_err();

        assert_eq!(err.to_string(), "product name is empty");
        assert_eq!(consumed.get(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_is_not_counted() {
        let consumed = Arc::new(Counter::default());
        let database = Database::connect_lazy(&DatabaseConfig {
            url: "postgres://postgres@127.0.0.1:1/postgres".into(),
            connect_timeout_secs: 1,
            ..DatabaseConfig::default()
        })
        .unwrap();
        let recorder = ProductRecorder::new(consumed.clone()).with_database(database);

        assert!(recorder.handle(product("lamp")).await.is_err());
        assert_eq!(consumed.get(), 0);
    }
}
