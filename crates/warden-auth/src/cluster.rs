//! Cluster fan-out of cache invalidation requests.
//!
//! The invalidation coordinator only needs two things from cluster
//! membership: the list of peers hosting a store type, and a way to deliver a
//! request to one of them. [`ClusterTransport`] captures exactly that.
//! Delivery timeouts and result aggregation are applied by the caller.
//!
//! [`LocalCluster`] connects nodes living in one process. It is what the
//! server binary uses for single-process deployments and what the
//! integration tests use to simulate unreachable and slow peers.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::StoreResult;
use crate::error::StoreError;
use crate::storage::StoreKind;

// =============================================================================
// Node Identity
// =============================================================================

/// Identifier of a cluster node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// =============================================================================
// Invalidation Request
// =============================================================================

/// Which cache entries an invalidation request drops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "names", rename_all = "snake_case")]
pub enum InvalidationTarget {
    /// Every entry cached when the request is applied.
    All,
    /// Only the named entries. Absent names are ignored.
    Names(BTreeSet<String>),
}

impl InvalidationTarget {
    /// Builds a target from a list of names.
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Names(names.into_iter().map(Into::into).collect())
    }

    /// Parses a path-style expression: `*` or `_all` for everything, otherwise
    /// a comma-separated list of names.
    ///
    /// An expression with no names at all also means everything.
    #[must_use]
    pub fn parse(expression: &str) -> Self {
        let names: BTreeSet<String> = expression
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();

        if names.is_empty() || names.contains("*") || names.contains("_all") {
            Self::All
        } else {
            Self::Names(names)
        }
    }

    #[must_use]
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

/// A request to drop cache entries of one store type.
///
/// Transient: it is applied and broadcast, never queued durably.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationRequest {
    pub kind: StoreKind,
    pub target: InvalidationTarget,
}

impl InvalidationRequest {
    #[must_use]
    pub fn new(kind: StoreKind, target: InvalidationTarget) -> Self {
        Self { kind, target }
    }
}

// =============================================================================
// Transport Traits
// =============================================================================

/// Receiving side of an invalidation request on one node.
#[async_trait]
pub trait InvalidationHandler: Send + Sync {
    /// Applies the request to the local cache only.
    /// Returns the number of entries dropped.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the local store is not running.
    async fn handle(&self, request: InvalidationRequest) -> StoreResult<usize>;
}

/// Delivery of invalidation requests to other cluster nodes.
#[async_trait]
pub trait ClusterTransport: Send + Sync {
    /// Identifier of the node this transport belongs to.
    fn local_node(&self) -> NodeId;

    /// Other nodes hosting a store of the given type.
    fn peers(&self, kind: StoreKind) -> Vec<NodeId>;

    /// Delivers a request to one peer and waits for its acknowledgement.
    /// Returns the number of entries the peer dropped.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Transport` if the peer cannot be reached, or the
    /// error the peer reported while applying the request.
    async fn send(&self, node: &NodeId, request: &InvalidationRequest) -> StoreResult<usize>;
}

// =============================================================================
// In-Process Cluster
// =============================================================================

#[derive(Default)]
struct NodeSlot {
    handlers: HashMap<StoreKind, Weak<dyn InvalidationHandler>>,
    reachable: bool,
    latency: Duration,
}

/// Registry connecting nodes that run in the same process.
///
/// Handlers are held weakly, so a dropped store simply stops acknowledging.
#[derive(Clone, Default)]
pub struct LocalCluster {
    nodes: Arc<DashMap<NodeId, NodeSlot>>,
}

impl LocalCluster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a reachable node and returns its transport.
    #[must_use]
    pub fn join(&self, node: impl Into<NodeId>) -> Arc<LocalTransport> {
        let node = node.into();
        self.nodes.entry(node.clone()).or_insert_with(|| NodeSlot {
            reachable: true,
            ..NodeSlot::default()
        });

        Arc::new(LocalTransport {
            node,
            cluster: self.clone(),
        })
    }

    /// Registers the store of type `kind` running on `node`.
    pub fn register(&self, node: &NodeId, kind: StoreKind, handler: &Arc<dyn InvalidationHandler>) {
        let mut slot = self.nodes.entry(node.clone()).or_insert_with(|| NodeSlot {
            reachable: true,
            ..NodeSlot::default()
        });
        slot.handlers.insert(kind, Arc::downgrade(handler));
        tracing::debug!(node = %node, kind = %kind, "Registered invalidation handler");
    }

    /// Marks a node reachable or unreachable.
    pub fn set_reachable(&self, node: &NodeId, reachable: bool) {
        if let Some(mut slot) = self.nodes.get_mut(node) {
            slot.reachable = reachable;
        }
    }

    /// Adds an artificial delivery delay for requests sent to `node`.
    pub fn set_latency(&self, node: &NodeId, latency: Duration) {
        if let Some(mut slot) = self.nodes.get_mut(node) {
            slot.latency = latency;
        }
    }

    /// Removes a node from the cluster.
    pub fn leave(&self, node: &NodeId) {
        self.nodes.remove(node);
    }

    fn peers_of(&self, local: &NodeId, kind: StoreKind) -> Vec<NodeId> {
        let mut peers: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|slot| slot.key() != local && slot.handlers.contains_key(&kind))
            .map(|slot| slot.key().clone())
            .collect();
        peers.sort();
        peers
    }

    async fn deliver(&self, node: &NodeId, request: &InvalidationRequest) -> StoreResult<usize> {
        let (handler, latency) = {
            let slot = self
                .nodes
                .get(node)
                .ok_or_else(|| StoreError::transport(node.as_str(), "unknown node"))?;
            if !slot.reachable {
                return Err(StoreError::transport(node.as_str(), "node unreachable"));
            }
            (slot.handlers.get(&request.kind).cloned(), slot.latency)
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let handler = handler
            .and_then(|weak| weak.upgrade())
            .ok_or_else(|| {
                StoreError::transport(node.as_str(), format!("no {} store registered", request.kind))
            })?;
        handler.handle(request.clone()).await
    }
}

impl fmt::Debug for LocalCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCluster")
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

/// One node's view of a [`LocalCluster`].
#[derive(Debug, Clone)]
pub struct LocalTransport {
    node: NodeId,
    cluster: LocalCluster,
}

impl LocalTransport {
    /// Registers a store running on this node.
    pub fn register(&self, kind: StoreKind, handler: &Arc<dyn InvalidationHandler>) {
        self.cluster.register(&self.node, kind, handler);
    }

    #[must_use]
    pub fn cluster(&self) -> &LocalCluster {
        &self.cluster
    }
}

#[async_trait]
impl ClusterTransport for LocalTransport {
    fn local_node(&self) -> NodeId {
        self.node.clone()
    }

    fn peers(&self, kind: StoreKind) -> Vec<NodeId> {
        self.cluster.peers_of(&self.node, kind)
    }

    async fn send(&self, node: &NodeId, request: &InvalidationRequest) -> StoreResult<usize> {
        self.cluster.deliver(node, request).await
    }
}
