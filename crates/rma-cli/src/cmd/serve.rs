//! Session manager and workers sharing one process and one broker.

use anyhow::{Context, Result};
use clap::Args;
use std::sync::Arc;

use rma_core::broker::Broker;
use rma_server::{AppState, Orchestration, WorkerPool};

use crate::settings::{AgentArgs, BrokerArgs, SessionArgs};

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[arg(long, env = "SERVICE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "SERVICE_PORT", default_value_t = 5000)]
    pub port: u16,

    #[command(flatten)]
    pub broker: BrokerArgs,

    #[command(flatten)]
    pub session: SessionArgs,

    #[command(flatten)]
    pub agents: AgentArgs,
}

pub fn run(args: ServeArgs) -> Result<()> {
    let config = args.agents.runtime_config()?;
    let broker_settings = args.broker.settings();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let broker = Broker::connect(&broker_settings)
            .await
            .context("failed to connect to broker")?;

        let orchestration = Arc::new(Orchestration::new(
            broker.clone(),
            args.agents.backend()?,
            config,
        ));
        let pool = WorkerPool::spawn(orchestration, &args.agents.worker_settings());

        let state = AppState::new(broker, args.session.settings());
        let addr = format!("{}:{}", args.host, args.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let result = rma_server::serve_session_manager(listener, state).await;

        pool.shutdown().await;
        result
    })
}
