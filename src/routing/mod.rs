//! Routing table and its persistence
//!
//! Maps client-visible proxy model names to backend routes. The hot path
//! reads copy-on-write snapshots from `RoutingTable`; `RouteStore` is the
//! storage interface the table is loaded from and synchronized to.

pub mod store;
pub mod table;

pub use store::{MemoryRouteStore, RouteStore, RouteStoreError};
pub use table::{RouteSnapshot, RoutingTable};
