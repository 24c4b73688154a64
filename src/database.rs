//! Product storage.
//!
//! # Responsibilities
//! - Open the Postgres connection pool at startup
//! - Persist products handed over by the queue consumer
//! - Close the pool during shutdown
//!
//! # Design Decisions
//! - Small pool with a bounded connection lifetime
//! - Acquiring a connection is bounded by the configured connect timeout
//! - The `products` table is created outside this service

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::DatabaseConfig;
use crate::queue::Product;

/// Written to `last_user` on every insert.
const SERVICE_NAME: &str = env!("CARGO_PKG_NAME");

const INSERT_PRODUCT: &str = "INSERT INTO products (name, description, last_user, updated_at) \
     VALUES ($1, $2, $3, NOW()) RETURNING id";

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("Product `{0}` already exists")]
    Duplicate(String),

    #[error("Pg error: {0}")]
    Query(#[from] sqlx::Error),
}

/// Pooled connection to the product database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Open the pool and check that one connection can be established.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let pool = Self::options(config)
            .connect(&config.url)
            .await
            .map_err(DatabaseError::Connect)?;

        tracing::info!(max_connections = config.max_connections, "Database connected");
        Ok(Self { pool })
    }

    /// Build the pool without connecting; connections open on first use.
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let pool = Self::options(config)
            .connect_lazy(&config.url)
            .map_err(DatabaseError::Connect)?;
        Ok(Self { pool })
    }

    fn options(config: &DatabaseConfig) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(config.max_connections)
            .max_lifetime(config.max_lifetime())
            .acquire_timeout(config.connect_timeout())
    }

    /// Insert `product` and return its id.
    pub async fn add_product(&self, product: &Product) -> Result<i64, DatabaseError> {
        let inserted = sqlx::query_scalar::<_, i64>(INSERT_PRODUCT)
            .bind(&product.name)
            .bind(&product.description)
            .bind(SERVICE_NAME)
            .fetch_one(&self.pool)
            .await;

        match inserted {
            Ok(id) => Ok(id),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(DatabaseError::Duplicate(product.name.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Wait for checked-out connections to return, then close them all.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Database pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// A config pointing at a port nothing listens on.
    fn unreachable() -> DatabaseConfig {
        DatabaseConfig {
            enabled: true,
            url: "postgres://postgres@127.0.0.1:1/postgres".into(),
            connect_timeout_secs: 1,
            ..DatabaseConfig::default()
        }
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let started = tokio::time::Instant::now();
        let err = Database::connect(&unreachable()).await.unwrap_err();

        assert!(matches!(err, DatabaseError::Connect(_)), "unexpected error: {err}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_insert_without_server_fails() {
        let db = Database::connect_lazy(&unreachable()).unwrap();
        let product = Product {
            name: "lamp".into(),
            description: "desk".into(),
        };

        let err = db.add_product(&product).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Query(_)), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let db = Database::connect_lazy(&unreachable()).unwrap();
        assert!(!db.is_closed());

        db.close().await;
        db.clone().close().await;
        assert!(db.is_closed());
    }
}
