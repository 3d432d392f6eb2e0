use serde::Serialize;

/// A device in the amsd system.
///
/// A device represents a physical or logical device that contains one or more entities.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub identifiers: Vec<(String, String)>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub entity_ids: Vec<String>,
}

impl Device {
    pub fn new(name: String) -> Self {
        Self {
            identifiers: Vec::new(),
            name,
            manufacturer: None,
            model: None,
            entity_ids: Vec::new(),
        }
    }

    pub fn with_identifier(mut self, domain: &str, id: &str) -> Self {
        self.identifiers.push((domain.to_string(), id.to_string()));
        self
    }

    pub fn with_manufacturer(mut self, manufacturer: &str) -> Self {
        self.manufacturer = Some(manufacturer.to_string());
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }

    pub fn add_entity(&mut self, entity_id: String) {
        if !self.entity_ids.contains(&entity_id) {
            self.entity_ids.push(entity_id);
        }
    }
}
