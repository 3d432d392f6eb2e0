/// Entity abstraction for amsd
///
/// All entities (switches for now) implement the Entity trait.
///
/// Base trait that all entities must implement
pub trait Entity: Send + Sync {
    /// Entity ID, e.g. `switch.ams_monitoring_p1`
    fn entity_id(&self) -> &str;

    /// Serialize current state to JSON for Engine storage
    fn state_json(&self) -> serde_json::Value;

    /// Return the platform type of this entity (e.g. "switch")
    fn platform(&self) -> &'static str;
}
