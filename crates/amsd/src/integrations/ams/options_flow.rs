//! Options flow: change which printers an existing entry monitors.

use std::sync::Arc;

use tracing::info;
use tracing::warn;

use super::client::PrinterBackend;
use super::config_flow::printer_options;
use super::config_flow::resolve_selection;
use super::reconcile::reconcile;
use super::reconcile::PrinterRecord;
use super::reconcile::SuffixStyle;
use super::CONF_PRINTERS;
use super::ERR_CANNOT_CONNECT;
use super::ERR_INVALID_PRINTER;
use crate::entries::ConfigEntry;
use crate::entries::EntryData;
use crate::flow::required_list;
use crate::flow::FlowError;
use crate::flow::FlowResult;
use crate::flow::Form;
use crate::flow::FormField;
use crate::flow::UserInput;
use crate::flow::BASE_ERROR;

pub const STEP_EDIT_PRINTERS: &str = "edit_printers";

/// State of one options flow over an existing entry
#[derive(Debug)]
pub struct OptionsSession {
    entry: ConfigEntry,

    /// Printers offered by the last shown form
    offered: Vec<PrinterRecord>,
    cannot_connect: bool,
}

impl OptionsSession {
    pub fn new(entry: ConfigEntry) -> Self {
        Self {
            entry,
            offered: Vec::new(),
            cannot_connect: false,
        }
    }

    pub fn entry_id(&self) -> &str {
        &self.entry.entry_id
    }

    fn form(&self) -> Form {
        let stored: Vec<String> = self
            .entry
            .data
            .printers
            .iter()
            .map(|p| p.id.clone())
            .collect();
        let form = Form::new(STEP_EDIT_PRINTERS).field(FormField::multi_select(
            CONF_PRINTERS,
            printer_options(&self.offered),
            stored,
        ));
        if self.cannot_connect {
            form.error(BASE_ERROR, ERR_CANNOT_CONNECT)
        } else {
            form
        }
    }
}

pub struct OptionsFlow<B: PrinterBackend + ?Sized> {
    backend: Arc<B>,
}

impl<B: PrinterBackend + ?Sized> OptionsFlow<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Show the printer selection (`input` is `None`) or apply a submission.
    pub async fn handle(
        &self,
        session: &mut OptionsSession,
        input: Option<&UserInput>,
    ) -> Result<FlowResult<EntryData>, FlowError> {
        let Some(input) = input else {
            self.refresh(session).await;
            return Ok(FlowResult::ShowForm(session.form()));
        };

        let selected = required_list(input, CONF_PRINTERS)?;
        let Some(printers) = resolve_selection(&selected, &session.offered) else {
            return Ok(FlowResult::ShowForm(
                session.form().error(CONF_PRINTERS, ERR_INVALID_PRINTER),
            ));
        };

        info!(
            "Entry {} now monitors {} printer(s)",
            session.entry.entry_id,
            printers.len()
        );
        Ok(FlowResult::CreateEntry {
            title: session.entry.title.clone(),
            data: EntryData {
                base_url: session.entry.data.base_url.clone(),
                printers,
            },
        })
    }

    /// Rebuild the offered printers: the backend's printers in its order, then
    /// stored printers it no longer reports. A stored record replaces the
    /// fetched one with the same id.
    async fn refresh(&self, session: &mut OptionsSession) {
        let stored = &session.entry.data.printers;

        let offered = match self.backend.list_printers(&session.entry.data.base_url).await {
            Ok(fetched) => {
                session.cannot_connect = false;
                let fetched =
                    reconcile(&fetched, &Default::default(), SuffixStyle::Silent).apply(&fetched);
                let mut offered: Vec<PrinterRecord> = fetched
                    .into_iter()
                    .map(|f| match stored.iter().find(|s| s.id == f.id) {
                        Some(s) => s.clone(),
                        None => f,
                    })
                    .collect();
                let missing: Vec<PrinterRecord> = stored
                    .iter()
                    .filter(|s| !offered.iter().any(|o| o.id == s.id))
                    .cloned()
                    .collect();
                offered.extend(missing);
                offered
            }
            Err(e) => {
                warn!(
                    "Cannot connect to backend {}: {}",
                    session.entry.data.base_url, e
                );
                session.cannot_connect = true;
                stored.clone()
            }
        };

        session.offered = offered;
    }
}
