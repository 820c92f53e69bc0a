//! PostgreSQL connection handling.

pub mod pool;

pub use pool::{create_pool_for_channel, run_migrations, Database, DatabaseError, MIGRATIONS_DIR};
