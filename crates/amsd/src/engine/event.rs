use super::state::Notification;
use super::state::SwitchState;

/// Engine-level events.
///
/// Distinct from `FromIntegrationMessage` (transport-level). The engine converts
/// `FromIntegrationMessage` into `Event` at the boundary and broadcasts it to
/// subscribers once the state snapshot has been updated.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    EntityAdded {
        entity_id: String,
    },
    EntityRemoved {
        entity_id: String,
    },
    SwitchStateChanged {
        entity_id: String,
        state: SwitchState,
    },
    NotificationCreated(Notification),
}
