//! carbonwatch agent entry point: start the monitor and collector, serve the HTTP API.

use carbonwatch_agent::{
    api,
    calculator::{CarbonCalculator, SysinfoUsage},
    config::AgentConfig,
    monitor::{ActivityMonitor, KernelProbe, PollingSource},
    sampler::spawn_collector,
    state::AppState,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cfg = match AgentConfig::from_env(std::env::args()) {
        Ok(c) => c,
        Err(msg) => {
            println!("{msg}");
            return Ok(());
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    let res = rt.block_on(run(cfg));
    // a trace_pipe read may still be parked on the blocking pool
    rt.shutdown_timeout(Duration::from_secs(1));
    res
}

async fn run(cfg: AgentConfig) -> anyhow::Result<()> {
    info!("carbonwatch agent v{} starting", env!("CARGO_PKG_VERSION"));

    let probe = if cfg.kernel_probe {
        KernelProbe::new(cfg.tracefs.clone())
    } else {
        KernelProbe::disabled()
    };
    let monitor = Arc::new(ActivityMonitor::new(
        Box::new(probe),
        Box::new(PollingSource::new()),
    ));
    if !monitor.start_monitoring() {
        info!("running in polling-only mode");
    }
    let calculator = Arc::new(CarbonCalculator::new(Arc::new(SysinfoUsage::new())));
    let state = AppState::new(monitor.clone(), calculator);

    let (stop_tx, stop_rx) = watch::channel(false);
    let collector = spawn_collector(state.clone(), cfg.collect_interval, stop_rx);

    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(SocketAddr::new(cfg.bind, cfg.port)).await?;
    info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

    let _ = stop_tx.send(true);
    let _ = collector.await;
    monitor.stop_monitoring();
    Ok(())
}
