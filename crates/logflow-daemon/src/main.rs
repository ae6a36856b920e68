//! The logflow daemon.
//!
//! Loads agent and pipeline configuration from the configuration directory
//! (overridable via the `logflow_sys_conf_dir` environment variable for
//! platforms where the executable directory is unwritable), starts every
//! pipeline, and runs until interrupted.
//!
//! Exit codes: `0` on a normal shutdown, `1` when configuration fails to
//! load, `2` on an unrecoverable internal error.

use std::sync::Arc;

use tracing::{error, info};

use logflow_agent::config::{self, AgentConfig};
use logflow_agent::pipeline::{Pipeline, PipelineContext, RunningPipeline};
use logflow_agent::tail::checkpoint::CheckpointStore;
use logflow_agent::{logger, AGENT_VERSION};

const EXIT_CONFIG_FAILURE: i32 = 1;
const EXIT_INTERNAL_ERROR: i32 = 2;

#[tokio::main]
async fn main() {
    logger::init();
    info!("logflow {} starting", AGENT_VERSION);

    let conf_dir = config::resolve_conf_dir();
    info!("using configuration directory {:?}", conf_dir);

    let agent = match AgentConfig::load(&conf_dir) {
        Ok(agent) => Arc::new(agent),
        Err(e) => {
            error!("failed to load agent configuration: {}", e);
            std::process::exit(EXIT_CONFIG_FAILURE);
        }
    };
    let pipeline_configs = match config::load_pipelines(&conf_dir) {
        Ok(configs) => configs,
        Err(e) => {
            error!("failed to load pipeline configuration: {}", e);
            std::process::exit(EXIT_CONFIG_FAILURE);
        }
    };
    if pipeline_configs.is_empty() {
        error!("no pipelines configured under {:?}", conf_dir.join("pipelines"));
        std::process::exit(EXIT_CONFIG_FAILURE);
    }

    let ctx = PipelineContext {
        agent: Arc::clone(&agent),
        checkpoints: Arc::new(CheckpointStore::load(agent.checkpoint_path())),
    };

    let mut running: Vec<RunningPipeline> = Vec::new();
    for pipeline_config in &pipeline_configs {
        let pipeline = match Pipeline::build(pipeline_config) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                error!("pipeline {}: rejected: {}", pipeline_config.name, e);
                std::process::exit(EXIT_CONFIG_FAILURE);
            }
        };
        match pipeline.start(&ctx) {
            Ok(handle) => running.push(handle),
            Err(e) => {
                error!("pipeline {}: failed to start: {}", pipeline_config.name, e);
                std::process::exit(EXIT_INTERNAL_ERROR);
            }
        }
    }
    info!("{} pipeline(s) running", running.len());

    if tokio::signal::ctrl_c().await.is_err() {
        error!("failed to install the interrupt handler");
        std::process::exit(EXIT_INTERNAL_ERROR);
    }
    info!("interrupt received, shutting down");

    for pipeline in running {
        pipeline.stop().await;
    }
    info!("logflow stopped");
}
