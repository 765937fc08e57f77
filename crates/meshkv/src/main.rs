use log::{error, info, logger, Level};
use meshkv_cluster::Node;
use meshkv_log::MeshLogger;
use tokio::time::{Duration, Instant};

pub mod config;

const LOG_BUFFER_SIZE: usize = 1024;

#[tokio::main]
async fn main() {
    let start_time = Instant::now();

    let config = match config::handle() {
        Ok(config) => config,
        Err(e) => {
            MeshLogger::init(None, Level::Info, LOG_BUFFER_SIZE).expect("logger already installed");
            error!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    MeshLogger::init(Some(config.node_id.clone()), Level::Info, LOG_BUFFER_SIZE)
        .expect("logger already installed");

    let node = Node::with_intervals(
        config.node_id.clone(),
        config.bind_port,
        Duration::from_secs(config.sync_interval_secs),
        Duration::from_secs(config.heartbeat_interval_secs),
        Duration::from_secs(config.peer_timeout_secs),
    );

    for addr in config.bootstrap_addrs() {
        node.add_bootstrap_peer(addr);
    }

    if let Err(e) = node.start().await {
        error!("failed to start node '{}': {e}", config.node_id);
        std::process::exit(1);
    }

    info!(
        "node '{}' listening on port {} ({:.2}s startup)",
        config.node_id,
        node.status().port,
        start_time.elapsed().as_secs_f64()
    );
    logger().flush();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }

    info!("shutting down node '{}'", config.node_id);
    node.stop().await;
    logger().flush();
}
