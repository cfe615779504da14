use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};

pub mod connection_store;
pub mod memory;
pub mod message_store;
pub mod records;

pub use connection_store::{ConnectionStore, PgConnectionStore};
pub use memory::{MemoryConnectionStore, MemoryMessageStore};
pub use message_store::{Appended, MessageStore, PgMessageStore};

pub type DbPool = Pool<Postgres>;

/// Initializes the database connection pool.
///
/// # Errors
/// Returns `sqlx::Error` if the connection fails.
pub async fn init_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new().max_connections(20).connect(database_url).await
}

/// Runs embedded migrations.
///
/// # Errors
/// Returns `sqlx::migrate::MigrateError` if any migration fails.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!().run(pool).await
}
