use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use warden_auth::{DocumentStore, LocalCluster, StoreState, admin_router};
use warden_db_memory::InMemoryDocumentStore;

use crate::config::AppConfig;
use crate::node::Node;

pub fn build_app(node: Arc<Node>, cfg: &AppConfig) -> Router {
    let health = Router::new()
        .route("/healthz", get(healthz))
        .with_state(node.clone());

    admin_router(node.admin_state())
        .merge(health)
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http.request",
                    http.method = %req.method(),
                    http.target = %req.uri(),
                )
            }),
        )
        .layer(axum::extract::DefaultBodyLimit::max(cfg.server.body_limit_bytes))
}

/// Reports `ok` only while both stores are `STARTED`.
async fn healthz(State(node): State<Arc<Node>>) -> Json<Value> {
    let roles = node.roles().state();
    let users = node.users().state();
    let status = if roles == StoreState::Started && users == StoreState::Started {
        "ok"
    } else {
        "degraded"
    };
    Json(json!({
        "status": status,
        "node": node.id(),
        "roles": roles,
        "users": users,
    }))
}

pub struct WardenServer {
    addr: SocketAddr,
    app: Router,
    node: Arc<Node>,
}

pub struct ServerBuilder {
    config: AppConfig,
    backing: Option<Arc<dyn DocumentStore>>,
    cluster: Option<LocalCluster>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
            backing: None,
            cluster: None,
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    pub fn with_backing_store(mut self, backing: Arc<dyn DocumentStore>) -> Self {
        self.backing = Some(backing);
        self
    }

    pub fn with_cluster(mut self, cluster: LocalCluster) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Creates the node and starts its stores.
    pub async fn build(self) -> anyhow::Result<WardenServer> {
        let backing = self
            .backing
            .unwrap_or_else(|| Arc::new(InMemoryDocumentStore::new()));
        let cluster = self.cluster.unwrap_or_default();

        let node = Arc::new(Node::new(
            &cluster,
            self.config.cluster.node_id.as_str(),
            backing,
            &self.config.native,
        ));
        node.start().await?;

        Ok(WardenServer {
            addr: self.config.addr(),
            app: build_app(node.clone(), &self.config),
            node,
        })
    }
}

impl WardenServer {
    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        self.node.stop().await;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
