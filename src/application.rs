//! Application wiring and lifecycle
//!
//! Loads settings, builds the configured storage backends, seeds the
//! routing table and runs the proxy server.

use crate::config::{Settings, StorageBackend};
use crate::infrastructure::postgres::{
    verify_connectivity, PostgresExchangeStore, PostgresRouteStore,
};
use crate::proxy::ProxyService;
use crate::recorder::{ExchangeStore, MemoryExchangeStore};
use crate::routing::{MemoryRouteStore, RouteStore, RoutingTable};
use crate::{Error, Result};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, instrument};

/// Main application struct that coordinates all components
pub struct Application {
    settings: Settings,
    table: RoutingTable,
    route_store: Arc<dyn RouteStore>,
    exchange_store: Arc<dyn ExchangeStore>,
}

impl Application {
    #[instrument]
    pub async fn new() -> Result<Self> {
        let settings = Settings::new()?;

        let (route_store, exchange_store): (Arc<dyn RouteStore>, Arc<dyn ExchangeStore>) =
            match settings.storage.backend {
                StorageBackend::Memory => {
                    info!("Using in-memory storage");
                    (
                        Arc::new(MemoryRouteStore::new()),
                        Arc::new(MemoryExchangeStore::new()),
                    )
                }
                StorageBackend::Postgres => {
                    info!("Connecting to database at {}", settings.database.host);
                    let pool = PgPool::connect(&settings.database_url()).await?;
                    sqlx::migrate!("./migrations").run(&pool).await?;
                    verify_connectivity(&pool).await?;
                    (
                        Arc::new(PostgresRouteStore::new(pool.clone())),
                        Arc::new(PostgresExchangeStore::new(pool)),
                    )
                }
            };

        // Seed configured routes, then load the table from the store so
        // the table always reflects what storage holds
        for route in &settings.routes {
            route_store.upsert_route(route.clone()).await?;
        }
        let table = RoutingTable::new();
        table.replace(route_store.list_routes().await?);

        Ok(Self {
            settings,
            table,
            route_store,
            exchange_store,
        })
    }

    #[instrument(skip(self))]
    pub async fn run(self) -> Result<()> {
        let address = format!(
            "{}:{}",
            self.settings.application.host, self.settings.application.port
        );
        info!("Starting Tapwire server on {address}");

        let config = self.settings.proxy_config()?;
        let service = ProxyService::new(
            config,
            self.table.clone(),
            Arc::clone(&self.exchange_store),
        )
        .map_err(|e| Error::application(format!("failed to build proxy service: {e}")))?;

        let listener = TcpListener::bind(&address).await?;
        axum::serve(listener, service.into_router()).await?;

        Ok(())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.table
    }

    pub fn route_store(&self) -> &Arc<dyn RouteStore> {
        &self.route_store
    }
}
