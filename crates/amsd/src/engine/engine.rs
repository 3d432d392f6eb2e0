use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::event::Event;
use super::integration::FromIntegrationReceiver;
use super::integration::FromIntegrationSender;
use super::integration::Integration;
use super::integration::ToIntegrationSender;
use super::message::EntityHandle;
use super::message::FromIntegrationMessage;
use super::message::ToIntegrationMessage;
use super::state::Notification;
use super::state::State;
use super::state::SwitchState;
use crate::engine::IntegrationContext;
use crate::entries::ConfigEntry;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("No integration found for entity: {0}")]
    UnknownEntity(String),

    #[error("Integration channel not found: {0}")]
    UnknownIntegration(String),

    #[error("Integration {0} is no longer running")]
    ChannelClosed(String),
}

/// Entity known to the engine
struct RegisteredEntity {
    integration_name: String,
    handle: EntityHandle,
}

/// amsd engine
///
/// This structure handles the flow of events, sending commands to the correct
/// integration, and maintaining a view of the world with State.
pub struct Engine {
    /// Centralized state snapshot (readers load the Arc, writer stores a new one)
    state: ArcSwap<State>,

    /// Map of entity_id -> owning integration and entity handle
    entities: std::sync::Mutex<HashMap<String, RegisteredEntity>>,

    /// Communication channels to integrations (for commands)
    integration_channels: std::sync::Mutex<HashMap<String, ToIntegrationSender>>,

    /// Receive messages from integrations (events)
    message_rx: Mutex<FromIntegrationReceiver>,

    /// Sender for integrations to report events back to the engine
    message_tx: FromIntegrationSender,

    /// Fan-out of processed events
    events: broadcast::Sender<Event>,

    /// Handles for integration tasks
    integration_handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

/// Capacity for the integration→engine message channel
/// Provides backpressure when integrations send faster than the engine can process
const FROM_INTEGRATION_CHANNEL_SIZE: usize = 1024;

/// Capacity of the event broadcast; slow subscribers lose the oldest events
const EVENT_CHANNEL_SIZE: usize = 256;

/// How long shutdown waits for an integration task to finish
const INTEGRATION_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

impl Engine {
    /// Create a new Engine instance
    pub fn new() -> Self {
        let (message_tx, message_rx) = mpsc::channel(FROM_INTEGRATION_CHANNEL_SIZE);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            state: ArcSwap::new(Arc::default()),
            entities: std::sync::Mutex::new(HashMap::new()),
            integration_channels: std::sync::Mutex::new(HashMap::new()),
            message_rx: Mutex::new(message_rx),
            message_tx,
            events,
            integration_handles: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Register integrations from configuration
    ///
    /// Runs every registered integration factory; factories decide themselves
    /// whether their integration is enabled.
    pub fn register_integrations_from_config(
        &self,
        cfg: &crate::config::Config,
        entries: &[ConfigEntry],
    ) {
        let ctx = IntegrationContext {
            config: cfg,
            entries,
        };
        for constr in super::integration::REGISTRY {
            let integration = match constr(&ctx) {
                Ok(Some(i)) => i,
                Err(e) => {
                    error!("failed to setup integration: {:#}", e);
                    continue;
                }
                Ok(None) => continue,
            };
            let name = integration.name().to_string();
            self.register_integration(name, integration);
        }
    }

    /// Register an integration with the engine
    ///
    /// This spawns the integration in a background task, wires up channels,
    /// and starts its setup process.
    pub fn register_integration(&self, name: String, mut integration: Box<dyn Integration>) {
        let (to_integration_tx, mut to_integration_rx) = mpsc::unbounded_channel();
        let from_integration_tx = self.message_tx.clone();

        if let Ok(mut channels) = self.integration_channels.lock() {
            channels.insert(name.clone(), to_integration_tx);
        }

        // Spawn integration task
        let handle = tokio::spawn(async move {
            // Setup integration (gives it the sender for events)
            if let Err(e) = integration.setup(from_integration_tx).await {
                warn!("Integration '{}' setup failed: {}", name, e);
                return;
            }

            // Process commands from engine
            while let Some(msg) = to_integration_rx.recv().await {
                if let Err(e) = integration.handle_message(msg).await {
                    warn!("Integration '{}' failed to handle message: {}", name, e);
                }
            }

            if let Err(e) = integration.shutdown().await {
                warn!("Integration '{}' shutdown failed: {}", name, e);
            }
        });

        if let Ok(mut handles) = self.integration_handles.lock() {
            handles.push(handle);
        }
    }

    /// Send a message to an integration by name
    pub fn send_to_integration(
        &self,
        integration_name: &str,
        msg: ToIntegrationMessage,
    ) -> Result<(), EngineError> {
        let channels = self
            .integration_channels
            .lock()
            .map_err(|_| EngineError::ChannelClosed(integration_name.to_string()))?;

        let tx = channels
            .get(integration_name)
            .ok_or_else(|| EngineError::UnknownIntegration(integration_name.to_string()))?;

        tx.send(msg)
            .map_err(|_| EngineError::ChannelClosed(integration_name.to_string()))
    }

    /// Send a command to an integration
    ///
    /// Routes the command to the appropriate integration based on entity_id.
    pub fn send_command(&self, msg: ToIntegrationMessage) -> Result<(), EngineError> {
        // Extract entity_id from command for routing
        let entity_id = match &msg {
            ToIntegrationMessage::SwitchCommand { entity_id, .. } => entity_id.clone(),
            ToIntegrationMessage::EntryAdded(_)
            | ToIntegrationMessage::EntryUpdated(_)
            | ToIntegrationMessage::EntryRemoved { .. } => {
                return Err(EngineError::UnknownEntity(
                    "entry messages are routed by integration".to_string(),
                ))
            }
        };

        // Route to the integration that owns this entity
        let integration_name = self
            .entities
            .lock()
            .ok()
            .and_then(|map| map.get(&entity_id).map(|e| e.integration_name.clone()))
            .ok_or_else(|| EngineError::UnknownEntity(entity_id.clone()))?;

        self.send_to_integration(&integration_name, msg)
    }

    /// Send a switch command to control a switch entity
    pub fn send_switch_command(&self, entity_id: String, on: bool) -> Result<(), EngineError> {
        self.send_command(ToIntegrationMessage::SwitchCommand { entity_id, on })
    }

    /// Run the engine's main event loop
    ///
    /// Processes incoming events from integrations and updates state.
    pub async fn run(&self) -> Result<(), Box<dyn Error + Send>> {
        info!("Engine starting");

        // Main event loop - only receives FromIntegration messages
        let mut rx = self.message_rx.lock().await;
        while let Some(msg) = rx.recv().await {
            self.handle_event(msg);
        }

        info!("Engine shutting down");
        Ok(())
    }

    /// Close all integration channels and wait for the integration tasks to finish
    pub async fn shutdown(&self) {
        if let Ok(mut channels) = self.integration_channels.lock() {
            channels.clear();
        }

        let handles: Vec<JoinHandle<()>> = match self.integration_handles.lock() {
            Ok(mut handles) => handles.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            match tokio::time::timeout(INTEGRATION_SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Integration task failed: {}", e),
                Err(_) => warn!("Integration task did not stop in time"),
            }
        }
    }

    /// Get a snapshot of the current engine state.
    ///
    /// Clones the `Arc` (atomic refcount bump), essentially free.
    pub fn state_snapshot(&self) -> Arc<State> {
        self.state.load_full()
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Full JSON description of every registered entity, sorted by entity_id
    pub async fn entity_states(&self) -> Vec<serde_json::Value> {
        let mut handles: Vec<(String, EntityHandle)> = match self.entities.lock() {
            Ok(map) => map
                .iter()
                .map(|(id, e)| (id.clone(), e.handle.clone()))
                .collect(),
            Err(_) => Vec::new(),
        };
        handles.sort_by(|a, b| a.0.cmp(&b.0));

        let mut states = Vec::with_capacity(handles.len());
        for (_, handle) in handles {
            states.push(handle.lock().await.state_json());
        }
        states
    }

    fn update_state(&self, f: impl FnOnce(&mut State)) {
        let mut state = State::clone(&self.state.load());
        f(&mut state);
        self.state.store(Arc::new(state));
    }

    fn publish(&self, event: Event) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Handle an event from an integration
    fn handle_event(&self, msg: FromIntegrationMessage) {
        match msg {
            FromIntegrationMessage::EntityDiscovered {
                entity_id,
                entity,
                integration_name,
            } => {
                info!(
                    "Entity discovered: {} (from {})",
                    entity_id, integration_name
                );

                // Record which integration owns this entity for command routing.
                // State is not populated until the first state-change message arrives.
                if let Ok(mut map) = self.entities.lock() {
                    map.insert(
                        entity_id.clone(),
                        RegisteredEntity {
                            integration_name,
                            handle: entity,
                        },
                    );
                }
                self.publish(Event::EntityAdded { entity_id });
            }
            FromIntegrationMessage::EntityRemoved { entity_id } => {
                info!("Entity removed: {}", entity_id);

                self.update_state(|state| {
                    state.switches.remove(&entity_id);
                });

                // Remove from routing map
                if let Ok(mut map) = self.entities.lock() {
                    map.remove(&entity_id);
                }
                self.publish(Event::EntityRemoved { entity_id });
            }
            FromIntegrationMessage::SwitchStateChanged { entity_id, on } => {
                let switch_state = SwitchState { on };
                info!("Switch state changed: {} -> on={}", entity_id, on);

                self.update_state(|state| {
                    state.switches.insert(entity_id.clone(), switch_state.clone());
                });

                self.publish(Event::SwitchStateChanged {
                    entity_id,
                    state: switch_state,
                });
            }
            FromIntegrationMessage::Notification { title, message } => {
                info!("Notification: {}: {}", title, message);
                let notification = Notification { title, message };

                self.update_state(|state| {
                    state.notifications.push(notification.clone());
                });

                self.publish(Event::NotificationCreated(notification));
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
