//! LinkPilot - Uplink Failover Daemon

use anyhow::Context;
use linkpilot_agent::{
    config_path, load_config, CycleOrchestrator, ElasticsearchSink, LogSink, MtrProber, NetBoxPolicyStore,
    TelemetrySink,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("LinkPilot v{}", env!("CARGO_PKG_VERSION"));

    let path = config_path();
    let config = load_config(&path).with_context(|| format!("loading config from {}", path))?;

    let prober = Arc::new(MtrProber::new(config.probe.clone()));
    let store = Arc::new(NetBoxPolicyStore::new(&config.policy_store).context("building policy store client")?);

    let telemetry: Arc<dyn TelemetrySink> = if config.telemetry.enabled {
        let sink = ElasticsearchSink::new(&config.telemetry).context("building telemetry client")?;
        sink.verify().await;
        Arc::new(sink)
    } else {
        tracing::info!("Telemetry disabled, logging cycle records only");
        Arc::new(LogSink)
    };

    let mut orchestrator = CycleOrchestrator::new(config, prober, store, telemetry)?;
    orchestrator.run().await?;

    Ok(())
}
