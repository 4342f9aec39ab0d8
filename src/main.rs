//! Outpost delivery tool.
//!
//! Reads one payload from stdin, posts it once to every configured output and
//! prints the resulting counters in the Prometheus text format. Exits with an
//! error when any output rejected the payload.

use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use outpost_delivery::{Config, DeliveryClient, PromStatistics, Statistics};
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Arc::new(Config::load().context("Failed to load configuration")?);
    init_tracing(&config.log_level);

    info!(
        outputs = config.outputs.len(),
        mutual_tls_files_path = %config.mutual_tls_files_path.display(),
        "Configuration loaded"
    );

    if config.outputs.is_empty() {
        warn!("No outputs configured, nothing to deliver");
        return Ok(());
    }

    let stats = Arc::new(Statistics::new());
    let prom_stats = Arc::new(PromStatistics::new());

    let mut clients = Vec::with_capacity(config.outputs.len());
    for output in &config.outputs {
        let client =
            DeliveryClient::from_output(output, Arc::clone(&config), stats.clone(), prom_stats.clone())
                .with_context(|| format!("Failed to initialize output {:?}", output.kind))?;
        info!(output = %output.kind, endpoint = %client.endpoint(), "Output initialized");
        clients.push(client);
    }

    let mut payload = Vec::new();
    tokio::io::stdin().read_to_end(&mut payload).await.context("Failed to read payload")?;
    let payload = Bytes::from(payload);

    let mut failed = 0usize;
    for client in &clients {
        if let Err(e) = client.post(payload.clone()).await {
            failed += 1;
            error!(
                output = client.output_kind(),
                outcome = %e.outcome(),
                retryable = e.is_retryable(),
                error = %e,
                "Delivery failed"
            );
        }
    }

    print!("{}", prom_stats.render());

    if failed > 0 {
        anyhow::bail!("{failed} of {} outputs failed", clients.len());
    }
    info!(outputs = clients.len(), "Payload delivered to every output");
    Ok(())
}

/// Initializes tracing, preferring `RUST_LOG` over the configured level.
fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer().with_target(true).with_writer(std::io::stderr);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}
