//! Type-safe message system for amsd
//!
//! Messages are split by direction to enforce correct usage at compile time:
//! - `FromIntegrationMessage`: Events from integrations to the engine
//! - `ToIntegrationMessage`: Commands from the engine to integrations

use std::sync::Arc;

use tokio::sync::Mutex;

use super::Entity;
use crate::entries::ConfigEntry;

/// Shared handle to an entity owned by an integration
pub type EntityHandle = Arc<Mutex<dyn Entity>>;

/// Messages FROM integrations TO the engine (events/state updates)
pub enum FromIntegrationMessage {
    /// An entity was discovered and registered
    EntityDiscovered {
        entity_id: String,
        entity: EntityHandle,
        integration_name: String,
    },

    /// An entity was removed (entry unloaded, printer deselected, etc.)
    EntityRemoved { entity_id: String },

    /// A switch's state changed
    SwitchStateChanged { entity_id: String, on: bool },

    /// Informational notification for the user
    Notification { title: String, message: String },
}

impl std::fmt::Debug for FromIntegrationMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FromIntegrationMessage::EntityDiscovered {
                entity_id,
                integration_name,
                ..
            } => f
                .debug_struct("EntityDiscovered")
                .field("entity_id", entity_id)
                .field("integration_name", integration_name)
                .field("entity", &"<entity>")
                .finish(),
            FromIntegrationMessage::EntityRemoved { entity_id } => f
                .debug_struct("EntityRemoved")
                .field("entity_id", entity_id)
                .finish(),
            FromIntegrationMessage::SwitchStateChanged { entity_id, on } => f
                .debug_struct("SwitchStateChanged")
                .field("entity_id", entity_id)
                .field("on", on)
                .finish(),
            FromIntegrationMessage::Notification { title, message } => f
                .debug_struct("Notification")
                .field("title", title)
                .field("message", message)
                .finish(),
        }
    }
}

/// Messages FROM the engine TO integrations (commands)
#[derive(Debug, Clone)]
pub enum ToIntegrationMessage {
    /// Command to turn a switch on or off
    SwitchCommand { entity_id: String, on: bool },

    /// A config entry was created by a setup flow
    EntryAdded(ConfigEntry),

    /// A config entry's data was changed by an options flow
    EntryUpdated(ConfigEntry),

    /// A config entry was deleted
    EntryRemoved { entry_id: String },
}
