use anyhow::Context;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use towwatch_engine::{AlertDispatcher, StandReconciler, TowRegistry};
use towwatch_service::{settings, MonitorError, TowMonitor};
use towwatch_store::app_config::Config;
use towwatch_store::{AmsClient, KafkaNotifications};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing(json: bool) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "towwatch=info,towwatch_service=info,towwatch_engine=info,towwatch_store=info".into()
            }),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

/// Log, give the operator a moment to see it, and stop with status 1
async fn exit_fatally(error: &dyn Display, guidance: &str, delay: Duration) -> ! {
    tracing::error!("Fatal error: {}", error);
    tracing::error!("{}", guidance);
    tracing::error!("Exiting in {} seconds", delay.as_secs());
    tokio::time::sleep(delay).await;
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("Failed to load config")?;
    init_tracing(config.logging.json);
    tracing::info!(
        "Starting towwatch {} for airport {}",
        env!("CARGO_PKG_VERSION"),
        config.ams.airport_code
    );

    let exit_delay = settings::fatal_exit_delay(&config);
    let retry = settings::retry_policy(&config);

    let ams = Arc::new(AmsClient::new(&config.ams, &config.stands).context("Failed to build AMS client")?);

    let notifications = match KafkaNotifications::new(&config.kafka) {
        Ok(n) => Arc::new(n),
        Err(e) => {
            let guidance = format!(
                "Check the brokers at {} are reachable and topic {} exists",
                config.kafka.brokers, config.kafka.topic
            );
            exit_fatally(&e, &guidance, exit_delay).await
        }
    };

    let mut dispatcher = AlertDispatcher::new(ams.clone(), config.ams.flight_alert_field.clone(), retry.clone());
    if config.stands.enabled {
        tracing::info!("Stand alerts enabled");
        dispatcher = dispatcher.with_stands(StandReconciler::new(ams.clone(), ams.clone()));
    }
    let registry = TowRegistry::new(Arc::new(dispatcher), settings::scheduler_settings(&config));

    let monitor_settings = settings::monitor_settings(&config).context("Invalid monitor settings")?;
    let monitor = TowMonitor::new(registry.clone(), ams, notifications, retry, monitor_settings);

    let mut handles = match monitor.start().await {
        Ok(handles) => handles,
        Err(e) => exit_fatally(&e, e.remediation(), exit_delay).await,
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested");
        }
        stopped = &mut handles.refresh => {
            let error: MonitorError = stopped.context("Refresh loop panicked")?;
            exit_fatally(&error, error.remediation(), exit_delay).await;
        }
    }

    handles.abort();
    let cancelled = registry.clear();
    tracing::info!(cancelled, "Tow monitor stopped");
    Ok(())
}
