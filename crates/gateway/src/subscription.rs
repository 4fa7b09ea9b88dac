//! Tri-map subscription index: which clients watch which resource uris, and
//! which uris a given client watches, so both "who do I notify" and "what do
//! I drop on disconnect" are O(1) lookups (spec §4.6).

use std::collections::{HashMap, HashSet};

use goblin_core::prelude::Strng;
use parking_lot::RwLock;

use crate::error::{GatewayError, GatewayResult};

/// Per-client subscription cap (spec §4.6 "a client may not hold more than
/// 100 concurrent subscriptions").
pub const MAX_SUBSCRIPTIONS_PER_CLIENT: usize = 100;

#[derive(Debug, Clone)]
pub struct SubscriptionDetail {
    pub upstream: Strng,
}

struct Inner {
    uri_to_clients: HashMap<Strng, HashSet<Strng>>,
    client_to_uris: HashMap<Strng, HashSet<Strng>>,
    details: HashMap<Strng, SubscriptionDetail>,
}

pub struct SubscriptionManager {
    inner: RwLock<Inner>,
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                uri_to_clients: HashMap::new(),
                client_to_uris: HashMap::new(),
                details: HashMap::new(),
            }),
        }
    }

    /// Returns `true` if this is the first subscriber for `namespaced_uri`,
    /// meaning the caller should issue an upstream `resources/subscribe`.
    pub fn subscribe(
        &self,
        client: &str,
        namespaced_uri: &str,
        upstream: Strng,
    ) -> GatewayResult<bool> {
        let mut inner = self.inner.write();
        let client_set = inner.client_to_uris.entry(Strng::from(client)).or_default();
        if client_set.len() >= MAX_SUBSCRIPTIONS_PER_CLIENT && !client_set.contains(namespaced_uri) {
            return Err(GatewayError::LimitExceeded(format!(
                "client {client} already holds {MAX_SUBSCRIPTIONS_PER_CLIENT} subscriptions"
            )));
        }
        client_set.insert(Strng::from(namespaced_uri));

        inner
            .details
            .entry(Strng::from(namespaced_uri))
            .or_insert(SubscriptionDetail { upstream });

        let clients = inner
            .uri_to_clients
            .entry(Strng::from(namespaced_uri))
            .or_default();
        let first = clients.is_empty();
        clients.insert(Strng::from(client));
        Ok(first)
    }

    /// Returns `true` if no subscribers remain for `namespaced_uri`, meaning
    /// the caller should issue an upstream `resources/unsubscribe`.
    pub fn unsubscribe(&self, client: &str, namespaced_uri: &str) -> bool {
        let mut inner = self.inner.write();
        if let Some(uris) = inner.client_to_uris.get_mut(client) {
            uris.remove(namespaced_uri);
        }
        let Some(clients) = inner.uri_to_clients.get_mut(namespaced_uri) else {
            return false;
        };
        clients.remove(client);
        let empty = clients.is_empty();
        if empty {
            inner.uri_to_clients.remove(namespaced_uri);
            inner.details.remove(namespaced_uri);
        }
        empty
    }

    /// Drops every subscription owned by `client` (spec §4.6 "on
    /// disconnect"). Returns the namespaced uris that became subscriber-free
    /// as a result, so the caller can issue upstream unsubscribes.
    pub fn cleanup_client(&self, client: &str) -> Vec<Strng> {
        let mut inner = self.inner.write();
        let Some(uris) = inner.client_to_uris.remove(client) else {
            return Vec::new();
        };
        let mut now_empty = Vec::new();
        for uri in uris {
            if let Some(clients) = inner.uri_to_clients.get_mut(uri.as_str()) {
                clients.remove(client);
                if clients.is_empty() {
                    inner.uri_to_clients.remove(uri.as_str());
                    inner.details.remove(uri.as_str());
                    now_empty.push(uri);
                }
            }
        }
        now_empty
    }

    /// Drops every subscription for uris whose upstream disconnected (spec
    /// §4.6 "on upstream removal"), so subscribers can be told the resource
    /// is gone without the gateway retaining a dangling upstream reference.
    pub fn cleanup_upstream(&self, upstream: &str) -> Vec<Strng> {
        let mut inner = self.inner.write();
        let dead: Vec<Strng> = inner
            .details
            .iter()
            .filter(|(_, d)| d.upstream.as_str() == upstream)
            .map(|(uri, _)| uri.clone())
            .collect();
        for uri in &dead {
            if let Some(clients) = inner.uri_to_clients.remove(uri.as_str()) {
                for client in clients {
                    if let Some(set) = inner.client_to_uris.get_mut(client.as_str()) {
                        set.remove(uri.as_str());
                    }
                }
            }
            inner.details.remove(uri.as_str());
        }
        dead
    }

    pub fn subscribers(&self, namespaced_uri: &str) -> Vec<Strng> {
        self.inner
            .read()
            .uri_to_clients
            .get(namespaced_uri)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn client_subscription_count(&self, client: &str) -> usize {
        self.inner
            .read()
            .client_to_uris
            .get(client)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_subscriber_triggers_upstream_subscribe() {
        let mgr = SubscriptionManager::new();
        let first = mgr.subscribe("c1", "mcp://a/x", Strng::from("a")).unwrap();
        assert!(first);
        let second = mgr.subscribe("c2", "mcp://a/x", Strng::from("a")).unwrap();
        assert!(!second);
        assert_eq!(mgr.subscribers("mcp://a/x").len(), 2);
    }

    #[test]
    fn last_unsubscriber_triggers_upstream_unsubscribe() {
        let mgr = SubscriptionManager::new();
        mgr.subscribe("c1", "mcp://a/x", Strng::from("a")).unwrap();
        mgr.subscribe("c2", "mcp://a/x", Strng::from("a")).unwrap();
        assert!(!mgr.unsubscribe("c1", "mcp://a/x"));
        assert!(mgr.unsubscribe("c2", "mcp://a/x"));
    }

    #[test]
    fn cleanup_client_drops_all_its_subscriptions() {
        let mgr = SubscriptionManager::new();
        mgr.subscribe("c1", "mcp://a/x", Strng::from("a")).unwrap();
        mgr.subscribe("c1", "mcp://a/y", Strng::from("a")).unwrap();
        let emptied = mgr.cleanup_client("c1");
        assert_eq!(emptied.len(), 2);
        assert_eq!(mgr.client_subscription_count("c1"), 0);
    }

    #[test]
    fn per_client_cap_is_enforced() {
        let mgr = SubscriptionManager::new();
        for i in 0..MAX_SUBSCRIPTIONS_PER_CLIENT {
            mgr.subscribe("c1", &format!("mcp://a/{i}"), Strng::from("a"))
                .unwrap();
        }
        let err = mgr.subscribe("c1", "mcp://a/overflow", Strng::from("a"));
        assert!(err.is_err());
    }

    #[test]
    fn cleanup_upstream_drops_only_its_own_uris() {
        let mgr = SubscriptionManager::new();
        mgr.subscribe("c1", "mcp://a/x", Strng::from("a")).unwrap();
        mgr.subscribe("c1", "mcp://b/y", Strng::from("b")).unwrap();
        let dead = mgr.cleanup_upstream("a");
        assert_eq!(dead, vec![Strng::from("mcp://a/x")]);
        assert_eq!(mgr.client_subscription_count("c1"), 1);
    }
}
