mod config;
mod coordinates;
mod distance;
mod error;
mod fare_model;
mod features;
mod locator;
mod osm_loader;
mod pipeline;
mod polyline;
mod road_graph;
mod router;
mod server;
mod timestamp;

use std::sync::Arc;

use anyhow::Result;
use log::{info, warn};

use config::ServiceConfig;
use fare_model::{FareModel, XgbFareModel};
use server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .target(env_logger::Target::Stderr)
        .init();
    info!("Starting farecast");

    let config = ServiceConfig::load()?;

    // Either dependency may be missing; the service then runs degraded
    let graph_config = config.clone();
    let graph = match tokio::task::spawn_blocking(move || osm_loader::load_or_build(&graph_config))
        .await?
    {
        Ok(graph) => {
            info!(
                "Road graph ready: {} nodes, {} edges",
                graph.node_count(),
                graph.edge_count()
            );
            Some(Arc::new(graph))
        }
        Err(e) => {
            warn!("Error loading graph: {:#}", e);
            None
        }
    };

    let model = match XgbFareModel::from_path(&config.model_path) {
        Ok(model) => Some(Arc::new(model) as Arc<dyn FareModel>),
        Err(e) => {
            warn!("Error loading model: {:#}", e);
            None
        }
    };

    server::serve(AppState {
        config,
        graph,
        model,
    })
    .await
}
