use anyhow::{Context, Result};
use clap::Args;
use std::sync::Arc;
use tracing::warn;

use rma_core::broker::Broker;
use rma_server::Orchestration;

use crate::settings::{AgentArgs, BrokerArgs};

#[derive(Args, Debug)]
pub struct OrchestratorArgs {
    #[arg(long, env = "SERVICE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "SERVICE_PORT", default_value_t = 5002)]
    pub port: u16,

    #[command(flatten)]
    pub broker: BrokerArgs,

    #[command(flatten)]
    pub agents: AgentArgs,
}

pub fn run(args: OrchestratorArgs) -> Result<()> {
    let config = args.agents.runtime_config()?;
    let broker_settings = args.broker.settings();
    if broker_settings.redis.is_none() {
        warn!("REDIS_HOST not set; no session manager outside this process can reach the workers");
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let broker = Broker::connect(&broker_settings)
            .await
            .context("failed to connect to broker")?;
        let orchestration = Arc::new(Orchestration::new(broker, args.agents.backend()?, config));

        let addr = format!("{}:{}", args.host, args.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        rma_server::serve_orchestrator(listener, orchestration, &args.agents.worker_settings())
            .await
    })
}
