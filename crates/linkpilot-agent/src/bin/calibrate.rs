//! LinkPilot calibration tool
//!
//! Measures every catalog provider for a number of rounds and recommends
//! thresholds, probe parameters and a cycle interval.
//!
//! # Usage
//!
//! ```bash
//! linkpilot-calibrate --cycles 10 --interval 30
//! linkpilot-calibrate --cycles 20 --output /etc/linkpilot/linkpilot.json
//! ```

use anyhow::Context;
use clap::{Parser, ValueEnum};
use linkpilot_agent::{config_path, load_config, probe_with_timeout, MtrProber, PathProber, ProbeTarget};
use linkpilot_core::calibrate::{recommend, BaselineCollector, ProviderBaseline, Recommendation};
use linkpilot_core::extract::extract;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "linkpilot-calibrate")]
#[command(version)]
#[command(about = "Measure provider baselines and recommend failover thresholds", long_about = None)]
struct Cli {
    /// Measurement rounds
    #[arg(long, default_value_t = 10)]
    cycles: u32,

    /// Seconds between rounds
    #[arg(long, default_value_t = 30)]
    interval: u64,

    /// Config file with the provider catalog
    #[arg(long, env = "LINKPILOT_CONFIG")]
    config: Option<PathBuf>,

    /// Write the config with recommendations merged in
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(long, short, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let path = cli.config.clone().unwrap_or_else(|| PathBuf::from(config_path()));
    let mut config = load_config(&path).with_context(|| format!("loading config from {}", path.display()))?;

    let prober = MtrProber::new(config.probe.clone());
    let timeout = config.probe.timeout();
    let mut collectors: Vec<BaselineCollector> =
        config.providers.iter().map(|p| BaselineCollector::new(p.name.clone())).collect();

    for round in 1..=cli.cycles {
        tracing::info!("Round {}/{}", round, cli.cycles);

        for (provider, collector) in config.providers.iter().zip(collectors.iter_mut()) {
            let target = ProbeTarget::from(provider);
            match measure(&prober, &target, timeout, provider).await {
                Ok(metrics) => {
                    tracing::info!(
                        provider = %provider.name,
                        peer_ms = metrics.peer_avg_ms,
                        dest_ms = metrics.dest_avg_ms,
                        "measured"
                    );
                    collector.record(&metrics);
                }
                Err(e) => {
                    tracing::warn!(provider = %provider.name, "measurement failed: {}", e);
                    collector.record_failure();
                }
            }
        }

        if round < cli.cycles {
            tokio::time::sleep(Duration::from_secs(cli.interval)).await;
        }
    }

    let baselines: Vec<ProviderBaseline> = collectors.iter().map(BaselineCollector::finish).collect();
    let recommendation = recommend(&baselines);

    match cli.format {
        OutputFormat::Table => print_table(&baselines, &recommendation),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "baselines": baselines,
                "recommendation": recommendation,
            }))?
        ),
    }

    if let Some(output) = cli.output {
        recommendation.apply_to(&mut config);
        config.validate().context("recommended config failed validation")?;
        config
            .save(&output)
            .with_context(|| format!("writing {}", output.display()))?;
        tracing::info!("Config written to {}", output.display());
    }

    Ok(())
}

async fn measure(
    prober: &dyn PathProber,
    target: &ProbeTarget,
    timeout: Duration,
    provider: &linkpilot_core::ProviderConfig,
) -> anyhow::Result<linkpilot_core::LatencyMetrics> {
    let report = probe_with_timeout(prober, target, timeout).await?;
    Ok(extract(&report, provider)?)
}

fn print_table(baselines: &[ProviderBaseline], rec: &Recommendation) {
    println!();
    println!(
        "{:<12} {:>8} {:>8} {:>8} {:>8} {:>10} {:>8} {:>8}",
        "PROVIDER", "PEER", "PEER SD", "DEST", "DEST SD", "JITTER", "LOSS", "OK %"
    );
    for b in baselines {
        println!(
            "{:<12} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>10.2} {:>8.1} {:>8.1}",
            b.provider.as_str(),
            b.peer_latency.avg,
            b.peer_latency.std,
            b.dest_latency.avg,
            b.dest_latency.std,
            b.peer_jitter_avg,
            b.peer_loss_max.max(b.dest_loss_max),
            b.success_rate,
        );
    }

    let t = &rec.thresholds;
    println!();
    println!("Recommended thresholds:");
    println!("  peer_warning_ms      {:.0}", t.peer_warning_ms);
    println!("  peer_critical_ms     {:.0}", t.peer_critical_ms);
    println!("  dest_warning_ms      {:.0}", t.dest_warning_ms);
    println!("  dest_critical_ms     {:.0}", t.dest_critical_ms);
    println!("  switch_margin        {:.0}", t.switch_margin);
    println!("  probe count          {}", rec.probe_count);
    println!("  probe interval (s)   {}", rec.probe_interval_secs);
    println!("  cycle interval (s)   {}", rec.cycle_interval_secs);
}
