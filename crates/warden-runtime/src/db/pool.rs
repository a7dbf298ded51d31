use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};

use warden_core::config::DatabaseConfig;
use warden_core::error::{Result, WardenError};

/// Database connection wrapper providing connection pooling.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect, retrying while the database is unavailable.
    ///
    /// Gives up after `max_retries` failed attempts.
    pub async fn connect_with_retry(config: &DatabaseConfig) -> Result<Self> {
        let mut attempts_left = config.max_retries.max(1);

        loop {
            match Self::create_pool(&config.url, config.pool_size, config.pool_timeout_secs).await
            {
                Ok(pool) => {
                    tracing::info!("Connection to database established");
                    return Ok(Self { pool });
                }
                Err(e) if is_connectivity_error(&e) => {
                    attempts_left -= 1;
                    if attempts_left == 0 {
                        return Err(WardenError::Database(format!(
                            "Database not available: {}",
                            e
                        )));
                    }
                    tracing::warn!(
                        error = %e,
                        retry_in = ?config.retry_delay(),
                        "Database not available, trying again"
                    );
                    tokio::time::sleep(config.retry_delay()).await;
                }
                Err(e) => {
                    return Err(WardenError::Database(format!(
                        "Failed to connect to database: {}",
                        e
                    )))
                }
            }
        }
    }

    /// Create a connection pool with the given parameters.
    async fn create_pool(url: &str, size: u32, timeout_secs: u64) -> sqlx::Result<PgPool> {
        PgPoolOptions::new()
            .max_connections(size)
            .acquire_timeout(Duration::from_secs(timeout_secs))
            .connect(url)
            .await
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| WardenError::Database(format!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Close all connections gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Whether an error means the server could not be reached at all.
pub fn is_connectivity_error(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}
