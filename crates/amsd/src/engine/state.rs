use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

/// State of a switch entity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SwitchState {
    /// Whether the switch is on or off.
    pub on: bool,
}

/// A user-visible, informational notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
}

/// Centralized snapshot of the entire engine state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct State {
    pub switches: HashMap<String, SwitchState>,
    pub notifications: Vec<Notification>,
}
