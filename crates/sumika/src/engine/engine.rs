use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::automation::AutomationError;
use crate::automation::AutomationStore;
use crate::automation::Evaluator;
use crate::buttons::PressDetector;
use crate::buttons::PressEvent;
use crate::config::ButtonsConfig;
use crate::dispatch::Directory;
use crate::dispatch::Dispatcher;
use crate::dispatch::SceneLibrary;
use crate::dispatch::ZoneRegistry;
use crate::hub::HubHandle;
use crate::router::Bridge;
use crate::store::Device;
use crate::store::DeviceStore;

/// Capacity of the bus→engine channel
const INGEST_CHANNEL_SIZE: usize = 1024;

/// Bus message accepted by one of the engine's handlers
#[derive(Debug)]
enum Inbound {
    Roster(Vec<u8>),
    State { device: String, payload: Vec<u8> },
}

/// Shared catalogs the engine resolves against
pub struct Catalog {
    pub zones: Arc<ZoneRegistry>,
    pub scenes: Arc<SceneLibrary>,
    pub automations: Arc<dyn AutomationStore>,
}

/// sumika engine
///
/// Owns the device cache and wires bus traffic through it: every state
/// message is applied by a single ingestion task, non-empty diffs go to the
/// broadcast hub and every transition goes to the evaluator.
pub struct Engine {
    devices: Arc<DeviceStore>,
    zones: Arc<ZoneRegistry>,
    scenes: Arc<SceneLibrary>,
    evaluator: Arc<Evaluator>,
    presses: PressDetector,
    hub: HubHandle,
    bridge: Bridge,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Build the pipeline, subscribe to the bridge topics and spawn the
    /// ingestion and press tasks
    pub fn start(
        bridge: Bridge,
        hub: HubHandle,
        buttons: &ButtonsConfig,
        catalog: Catalog,
    ) -> Arc<Self> {
        let devices = Arc::new(DeviceStore::default());
        let (presses, press_rx) = PressDetector::new(buttons);

        let dispatcher = Dispatcher::new(
            Arc::new(Directory::new(catalog.zones.clone(), devices.clone())),
            catalog.scenes.clone(),
            Arc::new(bridge.clone()),
        );
        let evaluator = Arc::new(Evaluator::new(
            catalog.automations,
            presses.clone(),
            Arc::new(dispatcher),
        ));

        let engine = Arc::new(Self {
            devices,
            zones: catalog.zones,
            scenes: catalog.scenes,
            evaluator,
            presses,
            hub,
            bridge,
            tasks: Mutex::new(Vec::new()),
        });

        let (ingest_tx, ingest_rx) = mpsc::channel(INGEST_CHANNEL_SIZE);
        engine.subscribe(ingest_tx);

        let ingestion = tokio::spawn(engine.clone().ingest_loop(ingest_rx));
        let press_loop = tokio::spawn(engine.clone().press_loop(press_rx));
        engine
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([ingestion, press_loop]);

        info!("Engine started");
        engine
    }

    fn subscribe(&self, tx: mpsc::Sender<Inbound>) {
        let router = self.bridge.router();

        let roster_tx = tx.clone();
        router.subscribe(&self.bridge.devices_topic(), move |_topic, payload| {
            enqueue(&roster_tx, Inbound::Roster(payload.to_vec()));
        });

        let bridge = self.bridge.clone();
        router.subscribe(&self.bridge.state_filter(), move |topic, payload| {
            let Some(device) = bridge.device_of(topic) else {
                return;
            };
            enqueue(
                &tx,
                Inbound::State {
                    device: device.to_string(),
                    payload: payload.to_vec(),
                },
            );
        });
    }

    async fn ingest_loop(self: Arc<Self>, mut rx: mpsc::Receiver<Inbound>) {
        while let Some(message) = rx.recv().await {
            self.ingest(message);
        }
        debug!("Ingestion task exiting");
    }

    async fn press_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<PressEvent>) {
        while let Some(event) = rx.recv().await {
            self.evaluator.on_press(&event);
        }
        debug!("Press task exiting");
    }

    fn ingest(&self, message: Inbound) {
        match message {
            Inbound::Roster(raw) => {
                if let Err(e) = self.devices.apply_roster(&raw) {
                    warn!("Ignoring roster: {}", e);
                }
            }
            Inbound::State { device, payload } => {
                let update = match self.devices.apply_update(&device, &payload) {
                    Ok(update) => update,
                    Err(e) => {
                        warn!("Ignoring state message: {}", e);
                        return;
                    }
                };
                if update.created {
                    info!("Discovered {} from a state message", device);
                }
                if !update.diff.is_empty() {
                    self.hub.broadcast(&update.device, &update.diff);
                }
                self.evaluator
                    .evaluate(&update.device, &update.old, &update.new);
            }
        }
    }

    /// Snapshot of every device with its zone memberships
    pub fn devices(&self) -> Vec<Device> {
        self.devices
            .list()
            .into_iter()
            .map(|mut device| {
                device.zones = self.zones.zones_of(&device.friendly_name);
                device
            })
            .collect()
    }

    pub fn device_store(&self) -> &Arc<DeviceStore> {
        &self.devices
    }

    pub fn zones(&self) -> &Arc<ZoneRegistry> {
        &self.zones
    }

    pub fn scenes(&self) -> &Arc<SceneLibrary> {
        &self.scenes
    }

    pub fn automations(&self) -> &Arc<dyn AutomationStore> {
        self.evaluator.automations()
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    pub fn run_automation(&self, id: &str) -> Result<(), AutomationError> {
        self.evaluator.run(id)
    }

    pub fn permit_join(&self) {
        self.bridge.permit_join();
    }

    pub fn refresh_device(&self, device: &str) {
        self.bridge.refresh(device);
    }

    pub fn restart_bridge(&self) {
        self.bridge.restart();
    }

    /// Ask the bridge to remove `device` and forget everything about it
    pub fn remove_device(&self, device: &str) -> Option<Device> {
        self.bridge.remove_device(device);
        self.zones.remove_device(device);
        self.presses.forget_device(device);
        self.devices.remove(device)
    }

    /// Stop the ingestion and press tasks
    pub fn shutdown(&self) {
        for task in self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
        info!("Engine stopped");
    }
}

fn enqueue(tx: &mpsc::Sender<Inbound>, message: Inbound) {
    match tx.try_send(message) {
        Ok(()) => {}
        Err(TrySendError::Full(message)) => warn!("Engine backlog full, dropping {:?}", message),
        Err(TrySendError::Closed(_)) => debug!("Engine stopped, dropping bus message"),
    }
}
