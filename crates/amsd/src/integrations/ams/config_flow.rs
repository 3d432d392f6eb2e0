//! Setup wizard: enter base URL, select printers, confirm renames, commit.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::client::normalize_base_url;
use super::client::PrinterBackend;
use super::reconcile::reconcile;
use super::reconcile::PrinterRecord;
use super::reconcile::Reconciliation;
use super::reconcile::SuffixStyle;
use super::CONF_BASE_URL;
use super::CONF_PRINTERS;
use super::ERR_CANNOT_CONNECT;
use super::ERR_INVALID_PRINTER;
use crate::entries::used_ids;
use crate::entries::ConfigEntry;
use crate::entries::EntryData;
use crate::flow::required_list;
use crate::flow::required_str;
use crate::flow::FlowError;
use crate::flow::FlowResult;
use crate::flow::Form;
use crate::flow::FormField;
use crate::flow::SelectOption;
use crate::flow::UserInput;
use crate::flow::BASE_ERROR;

/// Abort reason when the base URL already has an entry
pub const ABORT_ALREADY_CONFIGURED: &str = "already_configured";

/// Steps of the setup wizard
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepId {
    #[default]
    User,
    SelectPrinters,
    FixDuplicates,
}

/// State carried between the steps of one setup flow.
///
/// Created when the flow starts and dropped when it commits or aborts.
#[derive(Debug, Default)]
pub struct SetupSession {
    step: StepId,
    base_url: Option<String>,

    /// Backend printers with backend-level duplicates already resolved
    printers: Vec<PrinterRecord>,

    /// Backend ids that were renamed while resolving duplicates
    backend_corrected: Vec<String>,

    /// Selected printers awaiting rename confirmation
    selection: Vec<PrinterRecord>,
    pending: Option<Reconciliation>,
}

impl SetupSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&self) -> StepId {
        self.step
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }
}

pub fn entry_title(base_url: &str) -> String {
    format!("Bambu AMS Monitoring ({})", base_url)
}

/// Multi-select options for a printer list
pub(super) fn printer_options(printers: &[PrinterRecord]) -> Vec<SelectOption> {
    printers
        .iter()
        .map(|p| SelectOption {
            value: p.id.clone(),
            label: p.label(),
        })
        .collect()
}

/// Resolve submitted ids against the offered printers, keeping submission
/// order and dropping repeats. `None` if any id was not offered.
pub(super) fn resolve_selection(
    selected: &[String],
    offered: &[PrinterRecord],
) -> Option<Vec<PrinterRecord>> {
    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(selected.len());
    for id in selected {
        if !seen.insert(id.as_str()) {
            continue;
        }
        records.push(offered.iter().find(|p| &p.id == id)?.clone());
    }
    Some(records)
}

/// Render the confirmation list shown before renames are applied
pub fn duplicate_list(reconciliation: &Reconciliation) -> String {
    let mut msg = String::new();
    for rename in &reconciliation.renames {
        if rename.is_changed() {
            msg.push_str(&format!("● {} → {}\n", rename.old, rename.new));
        } else {
            msg.push_str(&format!("● {} (unchanged)\n", rename.old));
        }
    }
    msg
}

/// Setup wizard for the printer monitoring integration
pub struct ConfigFlow<B: PrinterBackend + ?Sized> {
    backend: Arc<B>,
}

impl<B: PrinterBackend + ?Sized> ConfigFlow<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Run the session's current step.
    ///
    /// `input` is `None` when the step's form should be shown, and the
    /// submitted form otherwise. `entries` are the config entries that exist
    /// right now.
    pub async fn handle(
        &self,
        session: &mut SetupSession,
        entries: &[ConfigEntry],
        input: Option<&UserInput>,
    ) -> Result<FlowResult<EntryData>, FlowError> {
        debug!("Setup flow step {} (input: {})", session.step, input.is_some());
        match session.step {
            StepId::User => self.step_user(session, entries, input).await,
            StepId::SelectPrinters => Self::step_select_printers(session, entries, input),
            StepId::FixDuplicates => Self::step_fix_duplicates(session, input),
        }
    }

    async fn step_user(
        &self,
        session: &mut SetupSession,
        entries: &[ConfigEntry],
        input: Option<&UserInput>,
    ) -> Result<FlowResult<EntryData>, FlowError> {
        let Some(input) = input else {
            return Ok(FlowResult::ShowForm(user_form(None)));
        };

        let base_url = normalize_base_url(required_str(input, CONF_BASE_URL)?);

        if entries.iter().any(|e| e.data.base_url == base_url) {
            info!("Backend {} is already configured", base_url);
            return Ok(FlowResult::Abort {
                reason: ABORT_ALREADY_CONFIGURED.to_string(),
            });
        }

        let printers = match self.backend.list_printers(&base_url).await {
            Ok(printers) => printers,
            Err(e) => {
                warn!("Cannot connect to backend {}: {}", base_url, e);
                return Ok(FlowResult::ShowForm(
                    user_form(Some(base_url)).error(BASE_ERROR, ERR_CANNOT_CONNECT),
                ));
            }
        };

        let reconciliation = reconcile(&printers, &Default::default(), SuffixStyle::Silent);
        session.backend_corrected = reconciliation.changed().map(|r| r.old.clone()).collect();
        if !session.backend_corrected.is_empty() {
            info!(
                "Corrected duplicate printer ids reported by {}: {}",
                base_url,
                session.backend_corrected.join(", ")
            );
        }
        session.printers = reconciliation.apply(&printers);
        session.base_url = Some(base_url);
        session.step = StepId::SelectPrinters;

        Self::step_select_printers(session, entries, None)
    }

    fn step_select_printers(
        session: &mut SetupSession,
        entries: &[ConfigEntry],
        input: Option<&UserInput>,
    ) -> Result<FlowResult<EntryData>, FlowError> {
        let Some(input) = input else {
            return Ok(FlowResult::ShowForm(select_form(session)));
        };

        let selected = required_list(input, CONF_PRINTERS)?;
        let Some(selection) = resolve_selection(&selected, &session.printers) else {
            return Ok(FlowResult::ShowForm(
                select_form(session).error(CONF_PRINTERS, ERR_INVALID_PRINTER),
            ));
        };

        let used = used_ids(entries, None);
        let reconciliation = reconcile(&selection, &used, SuffixStyle::Confirm);

        if !reconciliation.has_changes() {
            return Ok(Self::commit(session, selection));
        }

        info!(
            "{} selected printer id(s) collide with other entries, asking for confirmation",
            reconciliation.changed().count()
        );
        session.selection = selection;
        session.pending = Some(reconciliation);
        session.step = StepId::FixDuplicates;

        Self::step_fix_duplicates(session, None)
    }

    fn step_fix_duplicates(
        session: &mut SetupSession,
        input: Option<&UserInput>,
    ) -> Result<FlowResult<EntryData>, FlowError> {
        let Some(pending) = &session.pending else {
            return Err(FlowError::OutOfOrder(StepId::FixDuplicates.to_string()));
        };

        if input.is_none() {
            return Ok(FlowResult::ShowForm(
                Form::new(StepId::FixDuplicates.to_string())
                    .placeholder("duplicate_list", duplicate_list(pending)),
            ));
        }

        debug!("Duplicate renames confirmed: {}", pending.new_ids().join(", "));
        let printers = pending.apply(&session.selection);
        Ok(Self::commit(session, printers))
    }

    fn commit(session: &SetupSession, printers: Vec<PrinterRecord>) -> FlowResult<EntryData> {
        let base_url = session.base_url.clone().unwrap_or_default();
        info!(
            "Setup of {} complete with {} printer(s)",
            base_url,
            printers.len()
        );
        FlowResult::CreateEntry {
            title: entry_title(&base_url),
            data: EntryData { base_url, printers },
        }
    }
}

fn user_form(default: Option<String>) -> Form {
    Form::new(StepId::User.to_string()).field(FormField::text(CONF_BASE_URL, default))
}

fn select_form(session: &SetupSession) -> Form {
    let placeholder = if session.backend_corrected.is_empty() {
        String::new()
    } else {
        format!(
            "Automatically corrected duplicate printer IDs: {}",
            session.backend_corrected.join(", ")
        )
    };

    Form::new(StepId::SelectPrinters.to_string())
        .field(FormField::multi_select(
            CONF_PRINTERS,
            printer_options(&session.printers),
            Vec::new(),
        ))
        .placeholder("backend_dup_fixed", placeholder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entries::EntryStore;
    use crate::flow::FieldKind;
    use crate::integrations::ams::client::MockBackend;

    const URL: &str = "http://backend:8000";

    fn input(value: serde_json::Value) -> UserInput {
        value.as_object().cloned().unwrap()
    }

    fn flow(backend: MockBackend) -> ConfigFlow<MockBackend> {
        ConfigFlow::new(Arc::new(backend))
    }

    fn show_form(result: FlowResult<EntryData>) -> Form {
        match result {
            FlowResult::ShowForm(form) => form,
            other => panic!("expected a form, got {other:?}"),
        }
    }

    fn created(result: FlowResult<EntryData>) -> EntryData {
        match result {
            FlowResult::CreateEntry { data, .. } => data,
            other => panic!("expected an entry, got {other:?}"),
        }
    }

    fn select_options(form: &Form) -> Vec<(String, String)> {
        match &form.fields[0].kind {
            FieldKind::MultiSelect { options, .. } => options
                .iter()
                .map(|o| (o.value.clone(), o.label.clone()))
                .collect(),
            other => panic!("expected multi select, got {other:?}"),
        }
    }

    async fn at_selection(
        flow: &ConfigFlow<MockBackend>,
        session: &mut SetupSession,
        entries: &[ConfigEntry],
    ) -> Form {
        let form = show_form(flow.handle(session, entries, None).await.unwrap());
        assert_eq!(form.step_id, "user");
        show_form(
            flow.handle(
                session,
                entries,
                Some(&input(serde_json::json!({"base_url": format!("{URL}/")}))),
            )
            .await
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_happy_path_without_conflicts() {
        let backend = MockBackend::new().with_printers(
            URL,
            vec![PrinterRecord::new("P1", "X1C"), PrinterRecord::new("P2", "P1S")],
        );
        let flow = flow(backend);
        let mut session = SetupSession::new();

        let form = at_selection(&flow, &mut session, &[]).await;
        assert_eq!(form.step_id, "select_printers");
        assert_eq!(form.placeholders["backend_dup_fixed"], "");
        assert_eq!(
            select_options(&form),
            vec![
                ("P1".to_string(), "X1C (P1)".to_string()),
                ("P2".to_string(), "P1S (P2)".to_string()),
            ]
        );

        let data = created(
            flow.handle(
                &mut session,
                &[],
                Some(&input(serde_json::json!({"printers": ["P2"]}))),
            )
            .await
            .unwrap(),
        );
        assert_eq!(data.base_url, URL);
        assert_eq!(data.printers, vec![PrinterRecord::new("P2", "P1S")]);
    }

    #[tokio::test]
    async fn test_backend_duplicates_corrected_silently() {
        let backend = MockBackend::new().with_printers(
            URL,
            vec![PrinterRecord::new("P1", "A"), PrinterRecord::new("P1", "B")],
        );
        let flow = flow(backend);
        let mut session = SetupSession::new();

        let form = at_selection(&flow, &mut session, &[]).await;
        assert_eq!(
            form.placeholders["backend_dup_fixed"],
            "Automatically corrected duplicate printer IDs: P1"
        );
        assert_eq!(
            select_options(&form),
            vec![
                ("P1".to_string(), "A (P1)".to_string()),
                ("P1_2".to_string(), "B (P1_2)".to_string()),
            ]
        );

        let data = created(
            flow.handle(
                &mut session,
                &[],
                Some(&input(serde_json::json!({"printers": ["P1_2"]}))),
            )
            .await
            .unwrap(),
        );
        assert_eq!(data.printers[0].id, "P1_2");
        assert_eq!(data.printers[0].name, "B");
        assert_eq!(data.printers[0].backend_id(), "P1");
    }

    #[tokio::test]
    async fn test_cannot_connect_reshows_url_form() {
        let flow = flow(MockBackend::new());
        let mut session = SetupSession::new();

        let form = show_form(
            flow.handle(
                &mut session,
                &[],
                Some(&input(serde_json::json!({"base_url": URL}))),
            )
            .await
            .unwrap(),
        );
        assert_eq!(form.step_id, "user");
        assert_eq!(form.errors[BASE_ERROR], ERR_CANNOT_CONNECT);
        assert_eq!(
            form.fields[0].kind,
            FieldKind::Text {
                default: Some(URL.to_string())
            }
        );
        assert_eq!(session.step(), StepId::User);
        assert!(session.base_url().is_none());
    }

    #[tokio::test]
    async fn test_already_configured_aborts() {
        let mut store = EntryStore::in_memory("ams_monitoring");
        store
            .add(
                entry_title(URL),
                EntryData {
                    base_url: URL.to_string(),
                    printers: Vec::new(),
                },
            )
            .unwrap();

        let backend = MockBackend::new().with_printers(URL, Vec::new());
        let flow = flow(backend);
        let mut session = SetupSession::new();
        let result = flow
            .handle(
                &mut session,
                store.entries(),
                Some(&input(serde_json::json!({"base_url": format!("{URL}/")}))),
            )
            .await
            .unwrap();
        assert_eq!(
            result,
            FlowResult::Abort {
                reason: ABORT_ALREADY_CONFIGURED.to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_cross_entry_conflict_requires_confirmation() {
        let mut store = EntryStore::in_memory("ams_monitoring");
        store
            .add(
                entry_title("http://other"),
                EntryData {
                    base_url: "http://other".to_string(),
                    printers: vec![PrinterRecord::new("P1", "Elsewhere")],
                },
            )
            .unwrap();

        let backend = MockBackend::new().with_printers(
            URL,
            vec![PrinterRecord::new("P1", "X1C"), PrinterRecord::new("P2", "P1S")],
        );
        let flow = flow(backend);
        let mut session = SetupSession::new();
        at_selection(&flow, &mut session, store.entries()).await;

        let form = show_form(
            flow.handle(
                &mut session,
                store.entries(),
                Some(&input(serde_json::json!({"printers": ["P1", "P2"]}))),
            )
            .await
            .unwrap(),
        );
        assert_eq!(form.step_id, "fix_duplicates");
        assert!(form.fields.is_empty());
        insta::assert_snapshot!(form.placeholders["duplicate_list"].trim_end(), @r"
        ● P1 → P1_2
        ● P2 (unchanged)
        ");

        let data = created(
            flow.handle(&mut session, store.entries(), Some(&UserInput::new()))
                .await
                .unwrap(),
        );
        assert_eq!(data.printers.len(), 2);
        assert_eq!(data.printers[0].id, "P1_2");
        assert_eq!(data.printers[0].name, "X1C");
        assert_eq!(data.printers[1], PrinterRecord::new("P2", "P1S"));
    }

    #[tokio::test]
    async fn test_unknown_printer_is_rejected() {
        let backend = MockBackend::new().with_printers(URL, vec![PrinterRecord::new("P1", "A")]);
        let flow = flow(backend);
        let mut session = SetupSession::new();
        at_selection(&flow, &mut session, &[]).await;

        let form = show_form(
            flow.handle(
                &mut session,
                &[],
                Some(&input(serde_json::json!({"printers": ["P9"]}))),
            )
            .await
            .unwrap(),
        );
        assert_eq!(form.step_id, "select_printers");
        assert_eq!(form.errors[CONF_PRINTERS], ERR_INVALID_PRINTER);
    }

    #[tokio::test]
    async fn test_missing_field_is_an_error() {
        let flow = flow(MockBackend::new());
        let mut session = SetupSession::new();
        let err = flow
            .handle(&mut session, &[], Some(&UserInput::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::MissingField(f) if f == CONF_BASE_URL));
    }

    #[test]
    fn test_resolve_selection_dedupes() {
        let offered = vec![PrinterRecord::new("P1", "A"), PrinterRecord::new("P2", "B")];
        let selected = vec!["P2".to_string(), "P1".to_string(), "P2".to_string()];
        let records = resolve_selection(&selected, &offered).unwrap();
        assert_eq!(records.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(), vec!["P2", "P1"]);
        assert!(resolve_selection(&["P3".to_string()], &offered).is_none());
    }

    #[test]
    fn test_step_id_names() {
        assert_eq!(StepId::SelectPrinters.to_string(), "select_printers");
        assert_eq!("fix_duplicates".parse::<StepId>().unwrap(), StepId::FixDuplicates);
    }
}
