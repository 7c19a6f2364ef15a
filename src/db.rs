use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use std::time::Duration;
use tokio_postgres::NoTls;

use crate::error::{AppError, Result};

/// Upper bound on pooled PostgreSQL connections.
pub const MAX_CONNECTIONS: usize = 32;

/// Creates the PostgreSQL pool behind the attendance store.
///
/// The pool is lazy: no connection is made until the first query. Prepared
/// statements are cached per connection by `prepare_cached`.
pub fn create_pool(database_url: &str) -> Result<Pool> {
    let pg_config: tokio_postgres::Config = database_url.parse()?;

    let manager = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );

    Pool::builder(manager)
        .max_size(MAX_CONNECTIONS)
        .runtime(Runtime::Tokio1)
        .wait_timeout(Some(Duration::from_secs(5)))
        .create_timeout(Some(Duration::from_secs(2)))
        .recycle_timeout(Some(Duration::from_secs(1)))
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build database pool: {}", e)))
}
