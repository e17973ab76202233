//! Infrastructure layer
//!
//! This module contains the implementations for external concerns:
//! the Postgres-backed route and exchange stores.

pub mod postgres;

pub use postgres::{PostgresExchangeStore, PostgresRouteStore};
