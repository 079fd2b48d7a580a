//! `db` crate — Postgres rows behind the workflow and execution stores.
//!
//! `engine::postgres::PgStore` is the only consumer; it maps these rows to
//! domain types. Execution ids are `BIGSERIAL` here and decimal strings
//! everywhere else.

pub mod error;
pub mod models;
pub mod pool;
pub mod repository;

pub use error::DbError;
pub use pool::{DbPool, PoolConfig};
