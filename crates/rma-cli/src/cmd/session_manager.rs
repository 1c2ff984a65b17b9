use anyhow::{Context, Result};
use clap::Args;
use tracing::warn;

use rma_core::broker::Broker;
use rma_server::AppState;

use crate::settings::{BrokerArgs, SessionArgs};

#[derive(Args, Debug)]
pub struct SessionManagerArgs {
    #[arg(long, env = "SERVICE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "SERVICE_PORT", default_value_t = 5000)]
    pub port: u16,

    #[command(flatten)]
    pub broker: BrokerArgs,

    #[command(flatten)]
    pub session: SessionArgs,
}

pub fn run(args: SessionManagerArgs) -> Result<()> {
    let broker_settings = args.broker.settings();
    if broker_settings.redis.is_none() {
        warn!("REDIS_HOST not set; no orchestrator outside this process can answer");
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let broker = Broker::connect(&broker_settings)
            .await
            .context("failed to connect to broker")?;
        let state = AppState::new(broker, args.session.settings());

        let addr = format!("{}:{}", args.host, args.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        rma_server::serve_session_manager(listener, state).await
    })
}
