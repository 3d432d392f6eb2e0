//! Session bookkeeping for setup and options flows.
//!
//! Each flow gets an explicit session object keyed by a flow id. A step takes
//! the session out of its map while it runs, so no lock is held across a
//! backend request, and puts it back unless the step finished the flow.
//! Sessions left idle for longer than [`SESSION_IDLE_TIMEOUT`] are dropped
//! when the next flow of the same kind starts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::client::PrinterBackend;
use super::config_flow::ConfigFlow;
use super::config_flow::SetupSession;
use super::config_flow::ABORT_ALREADY_CONFIGURED;
use super::options_flow::OptionsFlow;
use super::options_flow::OptionsSession;
use crate::entries::ConfigEntry;
use crate::entries::EntryData;
use crate::entries::EntryError;
use crate::entries::EntryStore;
use crate::flow::FlowError;
use crate::flow::FlowResult;
use crate::flow::UserInput;

/// Outcome of a flow step, addressed by flow id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowResponse {
    pub flow_id: String,
    pub result: FlowResult<ConfigEntry>,
}

pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// A session waiting for its next submission
struct Parked<S> {
    since: Instant,
    session: S,
}

impl<S> Parked<S> {
    fn new(session: S) -> Self {
        Self {
            since: Instant::now(),
            session,
        }
    }
}

type Sessions<S> = Mutex<HashMap<String, Parked<S>>>;

pub struct FlowManager<B: PrinterBackend + ?Sized> {
    config_flow: ConfigFlow<B>,
    options_flow: OptionsFlow<B>,
    store: Arc<Mutex<EntryStore>>,
    setup_sessions: Sessions<SetupSession>,
    options_sessions: Sessions<OptionsSession>,
}

fn new_flow_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

async fn expire_idle<S>(sessions: &Sessions<S>, kind: &str) {
    let mut sessions = sessions.lock().await;
    sessions.retain(|flow_id, parked| {
        let keep = parked.since.elapsed() < SESSION_IDLE_TIMEOUT;
        if !keep {
            debug!("Dropping idle {} flow {}", kind, flow_id);
        }
        keep
    });
}

impl<B: PrinterBackend + ?Sized> FlowManager<B> {
    pub fn new(backend: Arc<B>, store: Arc<Mutex<EntryStore>>) -> Self {
        Self {
            config_flow: ConfigFlow::new(backend.clone()),
            options_flow: OptionsFlow::new(backend),
            store,
            setup_sessions: Mutex::new(HashMap::new()),
            options_sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> Arc<Mutex<EntryStore>> {
        self.store.clone()
    }

    pub async fn entries(&self) -> Vec<ConfigEntry> {
        self.store.lock().await.entries().to_vec()
    }

    pub async fn remove_entry(&self, entry_id: &str) -> Result<ConfigEntry, FlowError> {
        let removed = self.store.lock().await.remove(entry_id)?;
        info!("Removed config entry {} ({})", removed.entry_id, removed.title);
        Ok(removed)
    }

    /// Start a setup flow and show its first form
    pub async fn start_setup(&self) -> Result<FlowResponse, FlowError> {
        expire_idle(&self.setup_sessions, "setup").await;
        let flow_id = new_flow_id();
        debug!("Starting setup flow {}", flow_id);
        self.run_setup(flow_id, SetupSession::new(), None).await
    }

    pub async fn submit_setup(
        &self,
        flow_id: &str,
        input: UserInput,
    ) -> Result<FlowResponse, FlowError> {
        let session = self
            .setup_sessions
            .lock()
            .await
            .remove(flow_id)
            .map(|parked| parked.session)
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))?;
        self.run_setup(flow_id.to_string(), session, Some(input))
            .await
    }

    pub async fn abort_setup(&self, flow_id: &str) -> Result<(), FlowError> {
        self.setup_sessions
            .lock()
            .await
            .remove(flow_id)
            .map(|_| debug!("Aborted setup flow {}", flow_id))
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))
    }

    /// Start an options flow for an existing entry
    pub async fn start_options(&self, entry_id: &str) -> Result<FlowResponse, FlowError> {
        let entry = self
            .store
            .lock()
            .await
            .get(entry_id)
            .cloned()
            .ok_or_else(|| EntryError::NotFound(entry_id.to_string()))?;
        expire_idle(&self.options_sessions, "options").await;
        let flow_id = new_flow_id();
        debug!("Starting options flow {} for entry {}", flow_id, entry_id);
        self.run_options(flow_id, OptionsSession::new(entry), None)
            .await
    }

    pub async fn submit_options(
        &self,
        flow_id: &str,
        input: UserInput,
    ) -> Result<FlowResponse, FlowError> {
        let session = self
            .options_sessions
            .lock()
            .await
            .remove(flow_id)
            .map(|parked| parked.session)
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))?;
        self.run_options(flow_id.to_string(), session, Some(input))
            .await
    }

    pub async fn abort_options(&self, flow_id: &str) -> Result<(), FlowError> {
        self.options_sessions
            .lock()
            .await
            .remove(flow_id)
            .map(|_| debug!("Aborted options flow {}", flow_id))
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))
    }

    async fn run_setup(
        &self,
        flow_id: String,
        mut session: SetupSession,
        input: Option<UserInput>,
    ) -> Result<FlowResponse, FlowError> {
        let entries = self.entries().await;
        let result = self
            .config_flow
            .handle(&mut session, &entries, input.as_ref())
            .await;

        let result = match result {
            Ok(FlowResult::CreateEntry { title, data }) => self.commit_setup(title, data).await?,
            Ok(FlowResult::ShowForm(form)) => FlowResult::ShowForm(form),
            Ok(FlowResult::Abort { reason }) => FlowResult::Abort { reason },
            Err(e) => {
                // Field errors leave the session on its current step.
                self.setup_sessions
                    .lock()
                    .await
                    .insert(flow_id, Parked::new(session));
                return Err(e);
            }
        };

        if !result.is_terminal() {
            self.setup_sessions
                .lock()
                .await
                .insert(flow_id.clone(), Parked::new(session));
        }
        Ok(FlowResponse { flow_id, result })
    }

    async fn commit_setup(
        &self,
        title: String,
        data: EntryData,
    ) -> Result<FlowResult<ConfigEntry>, FlowError> {
        let mut store = self.store.lock().await;

        // Another flow may have committed since this one read its snapshot.
        let used = store.used_ids(None);
        let overlap: Vec<&str> = data
            .printers
            .iter()
            .map(|p| p.id.as_str())
            .filter(|id| used.contains(*id))
            .collect();
        if !overlap.is_empty() {
            warn!(
                "Committing printer ids already used by another entry: {}",
                overlap.join(", ")
            );
        }

        match store.add(title.clone(), data) {
            Ok(entry) => {
                info!("Created config entry {} ({})", entry.entry_id, entry.title);
                Ok(FlowResult::CreateEntry { title, data: entry })
            }
            Err(EntryError::AlreadyConfigured(url)) => {
                info!("Backend {} was configured by another flow", url);
                Ok(FlowResult::Abort {
                    reason: ABORT_ALREADY_CONFIGURED.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn run_options(
        &self,
        flow_id: String,
        mut session: OptionsSession,
        input: Option<UserInput>,
    ) -> Result<FlowResponse, FlowError> {
        let result = match self.options_flow.handle(&mut session, input.as_ref()).await {
            Ok(FlowResult::CreateEntry { title, data }) => {
                let entry = self
                    .store
                    .lock()
                    .await
                    .update_data(session.entry_id(), data)?;
                info!("Updated config entry {}", entry.entry_id);
                FlowResult::CreateEntry { title, data: entry }
            }
            Ok(FlowResult::ShowForm(form)) => FlowResult::ShowForm(form),
            Ok(FlowResult::Abort { reason }) => FlowResult::Abort { reason },
            Err(e) => {
                self.options_sessions
                    .lock()
                    .await
                    .insert(flow_id, Parked::new(session));
                return Err(e);
            }
        };

        if !result.is_terminal() {
            self.options_sessions
                .lock()
                .await
                .insert(flow_id.clone(), Parked::new(session));
        }
        Ok(FlowResponse { flow_id, result })
    }
}
