//! One cluster node: a roles store and a users store sharing a backing store.

use std::sync::Arc;
use std::time::Duration;

use warden_auth::{
    AdminState, DocumentStore, LocalCluster, NativeRolesStore, NativeStoreConfig,
    NativeUsersStore, NodeId, StoreKind, StoreResult, StoreState,
};

pub struct Node {
    id: NodeId,
    roles: Arc<NativeRolesStore>,
    users: Arc<NativeUsersStore>,
}

impl Node {
    /// Joins `cluster` as `id` and registers both stores for invalidation.
    /// The stores stay `INITIALIZED` until [`Node::start`].
    pub fn new(
        cluster: &LocalCluster,
        id: impl Into<NodeId>,
        backing: Arc<dyn DocumentStore>,
        config: &NativeStoreConfig,
    ) -> Self {
        let id = id.into();
        let transport = cluster.join(id.clone());

        let roles = Arc::new(NativeRolesStore::new(
            Arc::clone(&backing),
            transport.clone(),
            config,
        ));
        let users = Arc::new(NativeUsersStore::new(backing, transport.clone(), config));

        transport.register(StoreKind::Roles, &roles.invalidation_handler());
        transport.register(StoreKind::Users, &users.invalidation_handler());

        Self { id, roles, users }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn roles(&self) -> &Arc<NativeRolesStore> {
        &self.roles
    }

    pub fn users(&self) -> &Arc<NativeUsersStore> {
        &self.users
    }

    /// Starts both stores. A store that fails to start is left `FAILED`.
    pub async fn start(&self) -> StoreResult<()> {
        let (roles, users) = tokio::join!(self.roles.start(), self.users.start());
        roles.and(users)?;
        tracing::info!(node = %self.id, "Native stores started");
        Ok(())
    }

    /// Stops both stores and waits for a concurrent stop to settle.
    pub async fn stop(&self) {
        let (roles, users) = tokio::join!(self.roles.stop(), self.users.stop());
        for (kind, state) in [(StoreKind::Roles, roles), (StoreKind::Users, users)] {
            if state == StoreState::Stopping {
                let settled = match kind {
                    StoreKind::Roles => {
                        self.roles
                            .wait_for_state(|s| s.is_settled(), Duration::from_secs(30))
                            .await
                    }
                    StoreKind::Users => {
                        self.users
                            .wait_for_state(|s| s.is_settled(), Duration::from_secs(30))
                            .await
                    }
                };
                if settled.is_none() {
                    tracing::warn!(node = %self.id, kind = %kind, "Store did not settle after stop");
                }
            }
        }
        tracing::info!(
            node = %self.id,
            roles = %self.roles.state(),
            users = %self.users.state(),
            "Native stores stopped"
        );
    }

    pub fn admin_state(&self) -> AdminState {
        AdminState::new()
            .with_store(self.roles.clone())
            .with_store(self.users.clone())
    }
}
