use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sumika::Catalog;
use sumika::Config;
use sumika::Engine;
use sumika::api;
use sumika::automation::AutomationStore;
use sumika::automation::MemoryAutomationStore;
use sumika::config::BrokerMode;
use sumika::dispatch::SceneLibrary;
use sumika::dispatch::ZoneRegistry;
use sumika::hub;
use sumika::router::Bridge;
use sumika::router::BrokerClient;
use sumika::router::EmbeddedBroker;
use sumika::router::MqttListener;
use sumika::router::RumqttcClient;
use sumika::router::TopicRouter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Zigbee home-automation hub
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(default_value = "sumika.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_found = args.config.exists();
    let mut config = if config_found {
        Config::from_file(&args.config)
            .with_context(|| format!("failed to load {}", args.config.display()))?
    } else {
        Config::default()
    };
    config
        .broker
        .apply_env(|key| std::env::var(key).ok())
        .context("invalid broker environment")?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(config.logging.filter())
        .init();

    tracing::info!("sumika starting");
    if config_found {
        tracing::info!("Loaded config from: {}", args.config.display());
    } else {
        tracing::warn!("{} not found, using defaults", args.config.display());
    }

    let mut listener_task = None;
    let client: Box<dyn BrokerClient> = match config.broker.mode {
        BrokerMode::Embedded => {
            tracing::info!("Using embedded broker");
            let broker = EmbeddedBroker::new();
            if config.broker.listen.is_empty() {
                tracing::warn!("Embedded broker has no listen address, bus is in-process only");
            } else {
                let listener = MqttListener::bind(broker.clone(), &config.broker.listen)
                    .await
                    .context("failed to start the embedded broker")?;
                listener_task = Some(tokio::spawn(listener.run()));
            }
            Box::new(broker.client(&config.broker.client_id))
        }
        BrokerMode::External => {
            tracing::info!(
                "Connecting to broker at {}:{}",
                config.broker.host,
                config.broker.port
            );
            Box::new(RumqttcClient::new(&config.broker))
        }
    };
    let (router, router_task) = TopicRouter::start(client)
        .await
        .context("failed to connect to the message broker")?;

    let scenes = Arc::new(SceneLibrary::new());
    for scene in config.scenes {
        scenes.add(&scene.name, scene.lights, scene.order);
    }
    let automations = MemoryAutomationStore::with_automations(config.automations)
        .context("invalid automation in config")?;
    tracing::info!(
        "Seeded {} zones, {} scenes, {} automations",
        config.zones.len(),
        scenes.list().len(),
        automations.list().len()
    );

    let (hub, hub_task) = hub::spawn();
    let engine = Engine::start(
        Bridge::new(router, &config.broker.namespace),
        hub,
        &config.buttons,
        Catalog {
            zones: Arc::new(ZoneRegistry::from_map(config.zones)),
            scenes,
            automations: Arc::new(automations),
        },
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let state = api::AppState::new(engine.clone(), config.hub);
    let api_config = config.api;
    let mut api_task = tokio::spawn(async move {
        api::serve(&api_config.listen, api_config.port, state, shutdown_rx).await
    });

    tracing::info!("Press Ctrl+C to exit");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => tracing::info!("Received shutdown signal"),
                Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
            }
            let _ = shutdown_tx.send(());
            match (&mut api_task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("HTTP API server error: {:#}", e),
                Err(e) => tracing::error!("HTTP API task failed: {}", e),
            }
        }
        result = &mut api_task => {
            match result {
                Ok(Ok(())) => tracing::warn!("HTTP API server stopped"),
                Ok(Err(e)) => tracing::error!("HTTP API server error: {:#}", e),
                Err(e) => tracing::error!("HTTP API task failed: {}", e),
            }
        }
    }

    engine.shutdown();
    router_task.abort();
    hub_task.abort();
    if let Some(task) = listener_task {
        task.abort();
    }

    tracing::info!("sumika shutdown complete");

    Ok(())
}
