use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use hm_bus::Broadcaster;
use hm_core::config::Config;
use hm_daemon::Orchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hm_telemetry::init_logging("hm-daemon", "info");

    let config_path = Config::default_path();
    let config = Config::load_or_default(&config_path);
    info!(
        config = %config_path.display(),
        agents = config.agents.len(),
        "starting hivemind daemon"
    );

    let orchestrator =
        Orchestrator::from_config(&config).context("assembling orchestrator components")?;

    // snapshot fan-out to clients (the transport subscribes to this)
    let broadcaster = Broadcaster::new();
    tokio::spawn(
        broadcaster
            .clone()
            .run(orchestrator.bus(), Arc::new(orchestrator.clone())),
    );

    // dispatch + recharge ticks
    let ticks = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run().await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");
    ticks.abort();

    // in-flight pipelines persist as they settle; flush once more on the
    // way out so the newest entries survive the restart
    orchestrator.memory().save().ok();
    Ok(())
}
