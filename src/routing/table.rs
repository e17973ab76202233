//! In-memory routing table with copy-on-write snapshots
//!
//! The table the request path actually reads. Lookups clone an `Arc` to the
//! current route map and never take the write lock, so a request that
//! resolved against one snapshot is unaffected by concurrent updates.
//! Writers rebuild the map and swap the `Arc` in one step.

use crate::domain::routes::{BackendRoute, ProxyModelName};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable view of the route map at one point in time
pub type RouteSnapshot = Arc<HashMap<ProxyModelName, BackendRoute>>;

/// Shared routing table
///
/// Cheap to clone; all clones observe the same table.
#[derive(Clone, Default)]
pub struct RoutingTable {
    routes: Arc<RwLock<RouteSnapshot>>,
}

impl RoutingTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot of all routes
    ///
    /// The snapshot stays valid for as long as the caller holds it, even if
    /// the table is modified afterwards.
    pub fn snapshot(&self) -> RouteSnapshot {
        Arc::clone(&self.routes.read())
    }

    /// Exact-match, case-sensitive route lookup
    pub fn route_for(&self, name: &ProxyModelName) -> Option<BackendRoute> {
        self.routes.read().get(name).cloned()
    }

    /// Insert a route, replacing any existing entry with the same name
    pub fn upsert(&self, route: BackendRoute) {
        let mut guard = self.routes.write();
        let mut next: HashMap<_, _> = (**guard).clone();
        next.insert(route.proxy_model_name.clone(), route);
        *guard = Arc::new(next);
    }

    /// Remove a route; returns whether an entry existed
    pub fn remove(&self, name: &ProxyModelName) -> bool {
        let mut guard = self.routes.write();
        if !guard.contains_key(name) {
            return false;
        }
        let mut next: HashMap<_, _> = (**guard).clone();
        next.remove(name);
        *guard = Arc::new(next);
        true
    }

    /// Replace the entire table in one swap
    pub fn replace(&self, routes: impl IntoIterator<Item = BackendRoute>) {
        let next: HashMap<_, _> = routes
            .into_iter()
            .map(|route| (route.proxy_model_name.clone(), route))
            .collect();
        *self.routes.write() = Arc::new(next);
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::routes::{BackendModelName, BackendUrl};

    fn route(name: &str, url: &str) -> BackendRoute {
        BackendRoute {
            proxy_model_name: ProxyModelName::try_new(name.to_string()).unwrap(),
            backend_url: BackendUrl::try_new(url.to_string()).unwrap(),
            backend_model_name: BackendModelName::try_new("backend-model".to_string()).unwrap(),
            backend_api_key: None,
            ignore_tls_verify: false,
        }
    }

    fn name(s: &str) -> ProxyModelName {
        ProxyModelName::try_new(s.to_string()).unwrap()
    }

    #[test]
    fn test_lookup_is_exact_and_case_sensitive() {
        let table = RoutingTable::new();
        table.upsert(route("gpt-x", "http://a/v1/chat/completions"));

        assert!(table.route_for(&name("gpt-x")).is_some());
        assert!(table.route_for(&name("GPT-X")).is_none());
        assert!(table.route_for(&name("gpt-x2")).is_none());
    }

    #[test]
    fn test_upsert_replaces_existing_route() {
        let table = RoutingTable::new();
        table.upsert(route("gpt-x", "http://old/v1/chat/completions"));
        table.upsert(route("gpt-x", "http://new/v1/chat/completions"));

        assert_eq!(table.len(), 1);
        let resolved = table.route_for(&name("gpt-x")).unwrap();
        assert_eq!(resolved.backend_url.as_ref(), "http://new/v1/chat/completions");
    }

    #[test]
    fn test_remove_reports_whether_route_existed() {
        let table = RoutingTable::new();
        table.upsert(route("gpt-x", "http://a/v1/chat/completions"));

        assert!(table.remove(&name("gpt-x")));
        assert!(!table.remove(&name("gpt-x")));
        assert!(table.is_empty());
    }

    #[test]
    fn test_snapshot_is_unaffected_by_later_updates() {
        let table = RoutingTable::new();
        table.upsert(route("gpt-x", "http://a/v1/chat/completions"));

        let snapshot = table.snapshot();
        table.remove(&name("gpt-x"));
        table.upsert(route("gpt-y", "http://b/v1/chat/completions"));

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key(&name("gpt-x")));
        assert!(!snapshot.contains_key(&name("gpt-y")));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_replace_swaps_whole_table() {
        let table = RoutingTable::new();
        table.upsert(route("gpt-x", "http://a/v1/chat/completions"));

        table.replace(vec![
            route("gpt-y", "http://b/v1/chat/completions"),
            route("gpt-z", "http://c/v1/chat/completions"),
        ]);

        assert_eq!(table.len(), 2);
        assert!(table.route_for(&name("gpt-x")).is_none());
        assert!(table.route_for(&name("gpt-y")).is_some());
    }

    #[test]
    fn test_clones_share_the_same_table() {
        let table = RoutingTable::new();
        let other = table.clone();
        table.upsert(route("gpt-x", "http://a/v1/chat/completions"));

        assert!(other.route_for(&name("gpt-x")).is_some());
    }
}
