//! Bambu AMS printer monitoring.
//!
//! Talks to a monitoring backend over HTTP and exposes one on/off switch per
//! selected printer. Printers are selected through the setup flow, which
//! also keeps printer ids unique across config entries.

#[allow(clippy::module_inception)]
mod ams;
mod client;
mod config;
mod config_flow;
mod flows;
mod options_flow;
mod reconcile;
mod switch;

use std::sync::Arc;

use anyhow::Context;
use linkme::distributed_slice;
use tracing::info;

pub use ams::refresh_switch;
pub use ams::AmsIntegration;
pub use ams::SwitchError;
pub use ams::DUPLICATE_TITLE;
pub use client::BackendError;
#[cfg(test)]
pub(crate) use client::MockBackend;
pub use client::HttpBackend;
pub use client::PrinterBackend;
pub use client::PrinterStatus;
pub use config::Config as AmsConfig;
pub use config_flow::ConfigFlow;
pub use config_flow::SetupSession;
pub use config_flow::StepId;
pub use flows::FlowManager;
pub use flows::FlowResponse;
pub use options_flow::OptionsFlow;
pub use options_flow::OptionsSession;
pub use reconcile::base_id;
pub use reconcile::reconcile;
pub use reconcile::PrinterRecord;
pub use reconcile::Reconciliation;
pub use reconcile::Rename;
pub use reconcile::SuffixStyle;
pub use switch::PrinterSwitch;

use crate::engine;

/// Integration name, config entry domain and unique id prefix
pub const DOMAIN: &str = "ams_monitoring";

pub const CONF_BASE_URL: &str = "base_url";
pub const CONF_PRINTERS: &str = "printers";

pub const ERR_CANNOT_CONNECT: &str = "cannot_connect";
pub const ERR_INVALID_PRINTER: &str = "invalid_printer";

#[distributed_slice(engine::INTEGRATION_REGISTRY)]
fn init_ams(ctx: &engine::IntegrationContext) -> engine::IntegrationFactoryResult {
    let Some(config) = &ctx.config.integrations.ams_monitoring else {
        return Ok(None);
    };
    if !config.enabled {
        info!("Printer monitoring integration is disabled");
        return Ok(None);
    }

    let backend =
        HttpBackend::new(config.request_timeout()).context("Failed to create backend client")?;
    let entries = ctx
        .entries
        .iter()
        .filter(|e| e.domain == DOMAIN)
        .cloned()
        .collect();

    Ok(Some(Box::new(AmsIntegration::new(
        Arc::new(backend),
        config.clone(),
        entries,
    ))))
}
