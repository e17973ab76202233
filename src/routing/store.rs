//! Route persistence
//!
//! `RouteStore` is the durable side of the routing table. The proxy loads
//! the full route set from its store at startup and keeps serving from the
//! in-memory table afterwards; the memory backend is the default and simply
//! holds routes for the process lifetime.

use crate::domain::routes::{BackendRoute, ProxyModelName};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouteStoreError {
    #[error("Route '{0}' not found")]
    NotFound(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, RouteStoreError>;

/// Storage backend for routing table entries
#[async_trait]
pub trait RouteStore: Send + Sync {
    /// All routes, in no particular order
    async fn list_routes(&self) -> Result<Vec<BackendRoute>>;

    /// Route for an exact proxy model name, if one exists
    async fn get_route(&self, name: &ProxyModelName) -> Result<Option<BackendRoute>>;

    /// Insert or replace a route keyed by its proxy model name
    async fn upsert_route(&self, route: BackendRoute) -> Result<()>;

    /// Delete a route; returns whether an entry existed
    async fn delete_route(&self, name: &ProxyModelName) -> Result<bool>;
}

/// In-memory route store, the default backend
#[derive(Clone, Default)]
pub struct MemoryRouteStore {
    routes: Arc<RwLock<HashMap<ProxyModelName, BackendRoute>>>,
}

impl MemoryRouteStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RouteStore for MemoryRouteStore {
    async fn list_routes(&self) -> Result<Vec<BackendRoute>> {
        Ok(self.routes.read().values().cloned().collect())
    }

    async fn get_route(&self, name: &ProxyModelName) -> Result<Option<BackendRoute>> {
        Ok(self.routes.read().get(name).cloned())
    }

    async fn upsert_route(&self, route: BackendRoute) -> Result<()> {
        self.routes
            .write()
            .insert(route.proxy_model_name.clone(), route);
        Ok(())
    }

    async fn delete_route(&self, name: &ProxyModelName) -> Result<bool> {
        Ok(self.routes.write().remove(name).is_some())
    }
}
