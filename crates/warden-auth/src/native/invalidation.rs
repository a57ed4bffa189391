//! Explicit cache invalidation, local and cluster-wide.
//!
//! A request is applied to the local cache first. Unless it is local-only, the
//! same request is then sent concurrently to every peer hosting the same store
//! type, each delivery bounded by the configured per-node timeout. Peers apply
//! requests they receive locally and never re-broadcast them.
//!
//! Delivery is best-effort: unreachable or slow peers show up as failed
//! entries in the [`InvalidationReport`] and converge on their next reload
//! tick. Applying the same request twice has the same effect as applying it
//! once.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::ser::SerializeStruct;
use tokio::task::JoinSet;

use crate::StoreResult;
use crate::cluster::{ClusterTransport, InvalidationHandler, InvalidationRequest, InvalidationTarget, NodeId};
use crate::error::StoreError;
use crate::native::cache::MetadataCache;
use crate::native::lifecycle::Lifecycle;
use crate::storage::{MetadataRecord, StoreKind};

// =============================================================================
// Invalidation Report
// =============================================================================

/// Outcome of delivering a request to one peer.
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    pub node: NodeId,
    /// Entries dropped on the peer, or why it did not acknowledge.
    pub result: StoreResult<usize>,
}

impl NodeOutcome {
    #[must_use]
    pub fn is_acknowledged(&self) -> bool {
        self.result.is_ok()
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.result, Err(StoreError::BroadcastTimeout { .. }))
    }
}

impl Serialize for NodeOutcome {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("NodeOutcome", 3)?;
        state.serialize_field("node", &self.node)?;
        match &self.result {
            Ok(cleared) => {
                state.serialize_field("acknowledged", &true)?;
                state.serialize_field("cleared", cleared)?;
            }
            Err(e) => {
                state.serialize_field("acknowledged", &false)?;
                state.serialize_field("error", &e.to_string())?;
            }
        }
        state.end()
    }
}

/// Per-node report of one invalidation.
#[derive(Debug, Clone, Serialize)]
pub struct InvalidationReport {
    pub kind: StoreKind,
    /// Node that accepted the request.
    pub node: NodeId,
    /// Entries dropped from the local cache.
    pub cleared: usize,
    /// One outcome per peer, ordered by node. Empty for local-only requests.
    pub peers: Vec<NodeOutcome>,
}

impl InvalidationReport {
    /// Returns `true` if every peer acknowledged.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.peers.iter().all(NodeOutcome::is_acknowledged)
    }

    /// Peers that did not acknowledge.
    pub fn failures(&self) -> impl Iterator<Item = &NodeOutcome> {
        self.peers.iter().filter(|outcome| !outcome.is_acknowledged())
    }

    #[must_use]
    pub fn outcome(&self, node: &NodeId) -> Option<&NodeOutcome> {
        self.peers.iter().find(|outcome| &outcome.node == node)
    }
}

// =============================================================================
// Invalidation Coordinator
// =============================================================================

/// Applies invalidation requests to one store's cache and fans them out.
pub struct InvalidationCoordinator<R> {
    cache: Arc<MetadataCache<R>>,
    lifecycle: Arc<Lifecycle>,
    transport: Arc<dyn ClusterTransport>,
    node_timeout: Duration,
}

impl<R: MetadataRecord> InvalidationCoordinator<R> {
    #[must_use]
    pub fn new(
        cache: Arc<MetadataCache<R>>,
        lifecycle: Arc<Lifecycle>,
        transport: Arc<dyn ClusterTransport>,
        node_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            lifecycle,
            transport,
            node_timeout,
        }
    }

    /// Drops every cached entry, here and (unless `local_only`) on every peer.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the local store is not `STARTED`.
    /// Peer failures are reported, not returned.
    pub async fn clear_all(&self, local_only: bool) -> StoreResult<InvalidationReport> {
        self.invalidate(InvalidationTarget::All, local_only).await
    }

    /// Drops the named entries, here and (unless `local_only`) on every peer.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the local store is not `STARTED`.
    pub async fn clear_names<I, S>(&self, names: I, local_only: bool) -> StoreResult<InvalidationReport>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.invalidate(InvalidationTarget::names(names), local_only)
            .await
    }

    /// Applies `target` locally, then broadcasts it unless `local_only`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the local store is not `STARTED`.
    pub async fn invalidate(
        &self,
        target: InvalidationTarget,
        local_only: bool,
    ) -> StoreResult<InvalidationReport> {
        let request = InvalidationRequest::new(R::KIND, target);
        let cleared = self.apply_local(&request)?;

        let peers = if local_only {
            Vec::new()
        } else {
            self.broadcast(&request).await
        };

        let report = InvalidationReport {
            kind: R::KIND,
            node: self.transport.local_node(),
            cleared,
            peers,
        };

        if report.is_complete() {
            tracing::info!(
                kind = %R::KIND,
                cleared = report.cleared,
                peers = report.peers.len(),
                local_only,
                "Cache invalidated"
            );
        } else {
            tracing::warn!(
                kind = %R::KIND,
                cleared = report.cleared,
                peers = report.peers.len(),
                failed = report.failures().count(),
                "Cache invalidated with unacknowledged peers"
            );
        }
        Ok(report)
    }

    /// Applies a request to the local cache only.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the store is not `STARTED`.
    pub fn apply_local(&self, request: &InvalidationRequest) -> StoreResult<usize> {
        let _guard = self.lifecycle.enter()?;

        let cleared = match &request.target {
            InvalidationTarget::All => self.cache.clear(),
            InvalidationTarget::Names(names) => {
                self.cache.clear_names(names.iter().map(String::as_str))
            }
        };

        tracing::debug!(kind = %R::KIND, cleared, all = request.target.is_all(), "Applied invalidation");
        Ok(cleared)
    }

    async fn broadcast(&self, request: &InvalidationRequest) -> Vec<NodeOutcome> {
        let peers = self.transport.peers(R::KIND);
        if peers.is_empty() {
            return Vec::new();
        }

        let mut deliveries = JoinSet::new();
        for node in peers {
            let transport = Arc::clone(&self.transport);
            let request = request.clone();
            let timeout = self.node_timeout;

            deliveries.spawn(async move {
                let result = match tokio::time::timeout(timeout, transport.send(&node, &request)).await {
                    Ok(result) => result,
                    Err(_) => Err(StoreError::broadcast_timeout(node.as_str(), timeout)),
                };
                if let Err(e) = &result {
                    tracing::warn!(kind = %request.kind, node = %node, error = %e, "Peer did not acknowledge invalidation");
                }
                NodeOutcome { node, result }
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = deliveries.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    tracing::error!(kind = %request.kind, error = %e, "Broadcast delivery task failed");
                }
            }
        }
        outcomes.sort_by(|a, b| a.node.cmp(&b.node));
        outcomes
    }
}

#[async_trait]
impl<R: MetadataRecord> InvalidationHandler for InvalidationCoordinator<R> {
    async fn handle(&self, request: InvalidationRequest) -> StoreResult<usize> {
        if request.kind != R::KIND {
            return Err(StoreError::transport(
                self.transport.local_node().as_str(),
                format!("{} request delivered to {} store", request.kind, R::KIND),
            ));
        }
        self.apply_local(&request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::LocalCluster;
    use crate::config::CacheConfig;
    use crate::native::lifecycle::StoreState;
    use crate::storage::Role;

    struct Node {
        cache: Arc<MetadataCache<Role>>,
        lifecycle: Arc<Lifecycle>,
        coordinator: Arc<InvalidationCoordinator<Role>>,
    }

    async fn node(cluster: &LocalCluster, id: &str, names: &[&str]) -> Node {
        let transport = cluster.join(id);
        let cache = Arc::new(MetadataCache::new(&CacheConfig::default()));
        for name in names {
            cache.put(*name, Arc::new(Role::new(*name)));
        }
        let lifecycle = Arc::new(Lifecycle::new(StoreKind::Roles));
        lifecycle.start(|| async { Ok(()) }).await.unwrap();

        let coordinator = Arc::new(InvalidationCoordinator::new(
            Arc::clone(&cache),
            Arc::clone(&lifecycle),
            transport.clone(),
            Duration::from_millis(200),
        ));
        let handler: Arc<dyn InvalidationHandler> = coordinator.clone();
        transport.register(StoreKind::Roles, &handler);

        Node {
            cache,
            lifecycle,
            coordinator,
        }
    }

    #[tokio::test]
    async fn test_clear_names_local_only() {
        let cluster = LocalCluster::new();
        let a = node(&cluster, "a", &["r1", "r2"]).await;
        let b = node(&cluster, "b", &["r1", "r2"]).await;

        let report = a.coordinator.clear_names(["r1", "missing"], true).await.unwrap();
        assert_eq!(report.cleared, 1);
        assert!(report.peers.is_empty());
        assert!(!a.cache.contains("r1"));
        assert!(a.cache.contains("r2"));
        assert!(b.cache.contains("r1"));
    }

    #[tokio::test]
    async fn test_clear_all_broadcasts_to_peers() {
        let cluster = LocalCluster::new();
        let a = node(&cluster, "a", &["r1"]).await;
        let b = node(&cluster, "b", &["r1", "r2"]).await;
        let c = node(&cluster, "c", &["r3"]).await;

        let report = a.coordinator.clear_all(false).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.cleared, 1);
        assert_eq!(report.peers.len(), 2);
        assert_eq!(report.outcome(&NodeId::from("b")).unwrap().result.as_ref().ok(), Some(&2));
        assert!(b.cache.is_empty());
        assert!(c.cache.is_empty());
    }

    #[tokio::test]
    async fn test_failures_reported_per_node() {
        let cluster = LocalCluster::new();
        let a = node(&cluster, "a", &["r1"]).await;
        let _b = node(&cluster, "b", &["r1"]).await;
        let _c = node(&cluster, "c", &["r1"]).await;
        let d = node(&cluster, "d", &["r1"]).await;

        cluster.set_reachable(&NodeId::from("b"), false);
        cluster.set_latency(&NodeId::from("c"), Duration::from_secs(5));

        let started = std::time::Instant::now();
        let report = a.coordinator.clear_names(["r1"], false).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));

        assert!(!report.is_complete());
        assert!(matches!(
            report.outcome(&NodeId::from("b")).unwrap().result,
            Err(StoreError::Transport { .. })
        ));
        assert!(report.outcome(&NodeId::from("c")).unwrap().is_timeout());
        assert!(report.outcome(&NodeId::from("d")).unwrap().is_acknowledged());
        assert!(d.cache.is_empty());
    }

    #[tokio::test]
    async fn test_stopped_peer_reports_unavailable() {
        let cluster = LocalCluster::new();
        let a = node(&cluster, "a", &["r1"]).await;
        let b = node(&cluster, "b", &["r1"]).await;
        assert_eq!(b.lifecycle.stop(|| async { true }).await, StoreState::Stopped);

        let report = a.coordinator.clear_all(false).await.unwrap();
        let outcome = report.outcome(&NodeId::from("b")).unwrap();
        assert!(matches!(outcome.result, Err(StoreError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn test_invalidation_is_idempotent() {
        let cluster = LocalCluster::new();
        let a = node(&cluster, "a", &["r1", "r2"]).await;

        a.coordinator.clear_names(["r1"], true).await.unwrap();
        let again = a.coordinator.clear_names(["r1"], true).await.unwrap();
        assert_eq!(again.cleared, 0);
        assert_eq!(a.cache.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_when_not_started() {
        let cluster = LocalCluster::new();
        let a = node(&cluster, "a", &["r1"]).await;
        a.lifecycle.stop(|| async { true }).await;

        let err = a.coordinator.clear_all(false).await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(a.cache.contains("r1"));
    }

    #[test]
    fn test_node_outcome_serialization() {
        let ok = NodeOutcome {
            node: NodeId::from("b"),
            result: Ok(3),
        };
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            serde_json::json!({"node": "b", "acknowledged": true, "cleared": 3})
        );

        let timed_out = NodeOutcome {
            node: NodeId::from("c"),
            result: Err(StoreError::broadcast_timeout("c", Duration::from_secs(1))),
        };
        let json = serde_json::to_value(&timed_out).unwrap();
        assert_eq!(json["acknowledged"], false);
        assert!(json["error"].as_str().unwrap().contains("did not acknowledge"));
    }
}
