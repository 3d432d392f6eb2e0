use super::client::BackendError;
use super::client::PrinterBackend;
use super::reconcile::PrinterRecord;
use super::DOMAIN;
use crate::engine::Device;
use crate::engine::Entity;

pub const MANUFACTURER: &str = "Rdiger-36";
pub const MODEL: &str = "Bambu AMS Monitoring";

/// Unique id a printer's switch asks for before collisions are resolved
pub fn requested_unique_id(printer_id: &str) -> String {
    format!("{}_{}", DOMAIN, printer_id)
}

pub fn entity_id_for(unique_id: &str) -> String {
    format!("switch.{}", unique_id)
}

/// Backend address of one printer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    pub base_url: String,
    pub printer_id: String,
}

impl BackendTarget {
    /// POST start or stop monitoring
    pub async fn set_monitoring<B: PrinterBackend + ?Sized>(
        &self,
        backend: &B,
        on: bool,
    ) -> Result<(), BackendError> {
        if on {
            backend.start_monitoring(&self.base_url, &self.printer_id).await
        } else {
            backend.stop_monitoring(&self.base_url, &self.printer_id).await
        }
    }

    pub async fn monitoring_enabled<B: PrinterBackend + ?Sized>(
        &self,
        backend: &B,
    ) -> Result<bool, BackendError> {
        Ok(backend
            .status(&self.base_url, &self.printer_id)
            .await?
            .monitoring_enabled)
    }
}

/// Monitoring on/off switch for one printer
///
/// The switch only holds the last known state. Backend calls go through a
/// [`BackendTarget`] so the entity lock is not held while a request runs.
#[derive(Debug, Clone)]
pub struct PrinterSwitch {
    entity_id: String,
    unique_id: String,
    entry_id: String,
    printer: PrinterRecord,
    target: BackendTarget,
    is_on: bool,
    device: Device,
}

impl PrinterSwitch {
    pub fn new(entry_id: &str, base_url: &str, printer: PrinterRecord, unique_id: String) -> Self {
        let entity_id = entity_id_for(&unique_id);
        let mut device = Device::new(format!("{} ({})", printer.name, unique_id))
            .with_identifier(DOMAIN, &unique_id)
            .with_manufacturer(MANUFACTURER)
            .with_model(MODEL);
        device.add_entity(entity_id.clone());

        let target = BackendTarget {
            base_url: base_url.to_string(),
            printer_id: printer.backend_id().to_string(),
        };

        Self {
            entity_id,
            unique_id,
            entry_id: entry_id.to_string(),
            printer,
            target,
            is_on: false,
            device,
        }
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    pub fn name(&self) -> String {
        format!("{} {} - {}", MODEL, self.printer.name, self.unique_id)
    }

    pub fn target(&self) -> &BackendTarget {
        &self.target
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn is_on(&self) -> bool {
        self.is_on
    }

    /// Record a new state. Returns whether it changed.
    pub fn set_on(&mut self, on: bool) -> bool {
        let changed = self.is_on != on;
        self.is_on = on;
        changed
    }
}

impl Entity for PrinterSwitch {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn state_json(&self) -> serde_json::Value {
        serde_json::json!({
            "entity_id": self.entity_id,
            "unique_id": self.unique_id,
            "name": self.name(),
            "state": if self.is_on { "on" } else { "off" },
            "entry_id": self.entry_id,
            "printer_id": self.printer.id,
            "device": self.device,
        })
    }

    fn platform(&self) -> &'static str {
        "switch"
    }
}
