pub mod config;
pub mod node;
pub mod observability;
pub mod server;

pub use config::{AppConfig, ClusterConfig, LoggingConfig, ServerConfig};
pub use node::Node;
pub use observability::{apply_logging_level, init_tracing};
pub use server::{ServerBuilder, WardenServer, build_app};
