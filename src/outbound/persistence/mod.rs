//! PostgreSQL persistence adapter: connection pooling, schema, row types,
//! and the [`crate::domain::ports::Store`] implementation.

mod diesel_store;
mod models;
mod pool;
mod schema;

pub use diesel_store::DieselStore;
pub use pool::{DbPool, PoolConfig, PoolError};
