//! Postgres access for the execution audit trail

pub mod migrations;
pub mod pool;

pub use pool::{Database, PoolStats};
