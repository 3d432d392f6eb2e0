use std::collections::BTreeSet;
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::client::BackendError;
use super::client::PrinterBackend;
use super::reconcile::reconcile;
use super::reconcile::PrinterRecord;
use super::reconcile::SuffixStyle;
use super::switch::requested_unique_id;
use super::switch::PrinterSwitch;
use super::AmsConfig;
use super::DOMAIN;
use crate::engine::EntityHandle;
use crate::engine::Entity;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;
use crate::engine::Integration;
use crate::engine::ToIntegrationMessage;
use crate::entries::ConfigEntry;

pub const DUPLICATE_TITLE: &str = "Duplicate printer ID detected";

type SwitchHandle = Arc<Mutex<PrinterSwitch>>;

#[derive(Debug, thiserror::Error)]
pub enum SwitchError {
    #[error("Switch not found: {0}")]
    UnknownSwitch(String),

    #[error("Backend request for {0} failed: {1}")]
    Backend(String, #[source] BackendError),
}

fn boxed(e: impl Error + Send + 'static) -> Box<dyn Error + Send> {
    Box::new(e)
}

/// Switches and poll tasks created for one config entry
struct LoadedEntry {
    /// (entity id, unique id) in printer order
    switches: Vec<(String, String)>,
    poll_tasks: Vec<JoinHandle<()>>,
}

/// Printer monitoring integration
///
/// Turns every config entry into one switch per selected printer, polls the
/// backend for their state, and forwards switch commands to it.
pub struct AmsIntegration<B: PrinterBackend + ?Sized> {
    backend: Arc<B>,
    config: AmsConfig,

    /// Entries that existed at startup, loaded during setup
    startup_entries: Vec<ConfigEntry>,

    /// Switches by entity id
    switches: HashMap<String, SwitchHandle>,

    /// Loaded entries by entry id
    loaded: HashMap<String, LoadedEntry>,

    to_engine: Option<FromIntegrationSender>,
}

impl<B: PrinterBackend + ?Sized + 'static> AmsIntegration<B> {
    pub fn new(backend: Arc<B>, config: AmsConfig, entries: Vec<ConfigEntry>) -> Self {
        Self {
            backend,
            config,
            startup_entries: entries,
            switches: HashMap::new(),
            loaded: HashMap::new(),
            to_engine: None,
        }
    }

    /// Unique ids registered by every loaded entry except `exclude`
    fn used_unique_ids(&self, exclude: &str) -> BTreeSet<String> {
        self.loaded
            .iter()
            .filter(|(entry_id, _)| entry_id.as_str() != exclude)
            .flat_map(|(_, loaded)| loaded.switches.iter().map(|(_, uid)| uid.clone()))
            .collect()
    }

    async fn send(&self, msg: FromIntegrationMessage) {
        let Some(tx) = &self.to_engine else {
            warn!("Integration not set up, dropping {:?}", msg);
            return;
        };
        if let Err(e) = tx.send(msg).await {
            warn!("Failed to send message to engine: {}", e);
        }
    }

    /// Create, register and start polling the switches of an entry.
    async fn load_entry(&mut self, entry: &ConfigEntry) {
        // Renames already reported for this entry are not reported again.
        let previous: BTreeSet<String> = self
            .loaded
            .get(&entry.entry_id)
            .map(|loaded| loaded.switches.iter().map(|(_, uid)| uid.clone()).collect())
            .unwrap_or_default();
        if self.loaded.contains_key(&entry.entry_id) {
            self.unload_entry(&entry.entry_id).await;
        }

        let requested: Vec<PrinterRecord> = entry
            .data
            .printers
            .iter()
            .map(|p| PrinterRecord::new(requested_unique_id(&p.id), p.name.clone()))
            .collect();
        let used = self.used_unique_ids(&entry.entry_id);
        let reconciliation = reconcile(&requested, &used, SuffixStyle::Silent);

        let mut loaded = LoadedEntry {
            switches: Vec::with_capacity(requested.len()),
            poll_tasks: Vec::with_capacity(requested.len()),
        };

        for (printer, rename) in entry.data.printers.iter().zip(&reconciliation.renames) {
            if rename.is_changed() && previous.contains(&rename.new) {
                debug!(
                    "Printer {} keeps its suffixed unique id {}",
                    printer.id, rename.new
                );
            } else if rename.is_changed() {
                info!(
                    "Unique id {} is taken, registering printer {} as {}",
                    rename.old, printer.id, rename.new
                );
                self.send(FromIntegrationMessage::Notification {
                    title: DUPLICATE_TITLE.to_string(),
                    message: format!(
                        "Printer ID {} was already in use. Its switch was registered as {}.",
                        printer.id, rename.new
                    ),
                })
                .await;
            }

            let mut switch = PrinterSwitch::new(
                &entry.entry_id,
                &entry.data.base_url,
                printer.clone(),
                rename.new.clone(),
            );

            // Fetch the initial state before the switch is announced.
            match switch.target().monitoring_enabled(&*self.backend).await {
                Ok(on) => {
                    switch.set_on(on);
                }
                Err(e) => debug!(
                    "Initial status of {} unavailable, starting off: {}",
                    switch.entity_id(),
                    e
                ),
            }

            let entity_id = switch.entity_id().to_string();
            let on = switch.is_on();
            let handle: SwitchHandle = Arc::new(Mutex::new(switch));
            let entity: EntityHandle = handle.clone();

            self.send(FromIntegrationMessage::EntityDiscovered {
                entity_id: entity_id.clone(),
                entity,
                integration_name: DOMAIN.to_string(),
            })
            .await;
            self.send(FromIntegrationMessage::SwitchStateChanged {
                entity_id: entity_id.clone(),
                on,
            })
            .await;

            if let Some(tx) = self.to_engine.clone() {
                let backend = self.backend.clone();
                let interval = self.config.poll_interval();
                let switch = handle.clone();
                loaded.poll_tasks.push(tokio::spawn(async move {
                    poll_switch(backend, switch, interval, tx).await;
                }));
            }

            self.switches.insert(entity_id.clone(), handle);
            loaded.switches.push((entity_id, rename.new.clone()));
        }

        info!(
            "Loaded entry {} with {} switch(es)",
            entry.entry_id,
            loaded.switches.len()
        );
        self.loaded.insert(entry.entry_id.clone(), loaded);
    }

    /// Stop polling and remove the switches of an entry.
    async fn unload_entry(&mut self, entry_id: &str) {
        let Some(loaded) = self.loaded.remove(entry_id) else {
            debug!("Entry {} is not loaded", entry_id);
            return;
        };

        for task in &loaded.poll_tasks {
            task.abort();
        }
        for (entity_id, _) in loaded.switches {
            self.switches.remove(&entity_id);
            self.send(FromIntegrationMessage::EntityRemoved { entity_id })
                .await;
        }
        info!("Unloaded entry {}", entry_id);
    }

    /// Turn a switch on or off through the backend
    pub async fn set_switch(&mut self, entity_id: &str, on: bool) -> Result<(), SwitchError> {
        let handle = self
            .switches
            .get(entity_id)
            .cloned()
            .ok_or_else(|| SwitchError::UnknownSwitch(entity_id.to_string()))?;

        let target = handle.lock().await.target().clone();
        target
            .set_monitoring(&*self.backend, on)
            .await
            .map_err(|e| SwitchError::Backend(entity_id.to_string(), e))?;

        handle.lock().await.set_on(on);
        info!("Switch {} turned {}", entity_id, if on { "on" } else { "off" });
        self.send(FromIntegrationMessage::SwitchStateChanged {
            entity_id: entity_id.to_string(),
            on,
        })
        .await;
        Ok(())
    }
}

/// Fetch a switch's status once. Returns the new state if it changed.
///
/// Failures keep the last known state. There is no retry: the next poll is
/// the only recovery.
pub async fn refresh_switch<B: PrinterBackend + ?Sized>(
    backend: &B,
    switch: &Mutex<PrinterSwitch>,
) -> Option<bool> {
    let (entity_id, target) = {
        let s = switch.lock().await;
        (s.entity_id().to_string(), s.target().clone())
    };

    match target.monitoring_enabled(backend).await {
        Ok(on) => switch.lock().await.set_on(on).then_some(on),
        Err(e) => {
            debug!("Status poll for {} failed, keeping last state: {}", entity_id, e);
            None
        }
    }
}

async fn poll_switch<B: PrinterBackend + ?Sized>(
    backend: Arc<B>,
    switch: SwitchHandle,
    interval: Duration,
    tx: FromIntegrationSender,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately and the state was just fetched.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if let Some(on) = refresh_switch(&*backend, &switch).await {
            let entity_id = switch.lock().await.entity_id().to_string();
            let msg = FromIntegrationMessage::SwitchStateChanged { entity_id, on };
            if tx.send(msg).await.is_err() {
                debug!("Engine channel closed, stopping poll task");
                return;
            }
        }
    }
}

#[async_trait]
impl<B: PrinterBackend + ?Sized + 'static> Integration for AmsIntegration<B> {
    fn name(&self) -> &str {
        DOMAIN
    }

    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>> {
        self.to_engine = Some(tx);

        let entries = std::mem::take(&mut self.startup_entries);
        info!(
            "Printer monitoring integration loading {} entries",
            entries.len()
        );
        for entry in &entries {
            self.load_entry(entry).await;
        }
        Ok(())
    }

    async fn handle_message(
        &mut self,
        msg: ToIntegrationMessage,
    ) -> Result<(), Box<dyn Error + Send>> {
        match msg {
            ToIntegrationMessage::SwitchCommand { entity_id, on } => {
                self.set_switch(&entity_id, on).await.map_err(boxed)?;
            }
            ToIntegrationMessage::EntryAdded(entry) | ToIntegrationMessage::EntryUpdated(entry) => {
                self.load_entry(&entry).await;
            }
            ToIntegrationMessage::EntryRemoved { entry_id } => {
                self.unload_entry(&entry_id).await;
            }
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
        info!("Printer monitoring integration shutting down");
        for loaded in self.loaded.values() {
            for task in &loaded.poll_tasks {
                task.abort();
            }
        }
        Ok(())
    }
}
