//! Forge controller binary.

use std::sync::Arc;

use forge_core::cluster::ClusterBackend;
use forge_core::{LogFormat, MemoryCluster, init_logging};

use forge_api::{BootstrapError, ClusterMode, Config, Server};

#[tokio::main]
async fn main() -> Result<(), BootstrapError> {
    let config = Config::from_env()?;

    init_logging(if config.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    });

    let backend: Arc<dyn ClusterBackend> = match config.cluster_mode {
        ClusterMode::Memory => Arc::new(MemoryCluster::new()),
        ClusterMode::External => {
            // The cluster transport is a deployment concern; an external
            // backend is linked in behind the ClusterBackend seam.
            return Err(BootstrapError::new(
                "external cluster mode requires a transport backend; \
                 build with one or run with FORGE_CLUSTER_MODE=memory",
            ));
        }
    };

    Server::new(config, backend).serve().await
}
