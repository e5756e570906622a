//! Session workflow controller: name/language, file registration, sigil
//! validation, collation and result retrieval.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use shared::{
    domain::{CollationResult, ResultKind, TextId, WitnessEntry, WorkflowState},
    protocol::{collate_form, CollationOptions, SetNameLangQuery, StatusResponse, UploadedFile},
};
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::{
    error::{ClientError, ClientResult, Step, SIGLA_NOT_UNIQUE},
    notice::{ErrorConsole, ErrorNotice, DEFAULT_DISMISS_AFTER},
    service::CollationService,
    ClientEvent,
};

pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired; please start again.";

/// Page-lifetime context: where the service lives and what the server said
/// about the session when it was entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub base_url: String,
    pub has_prior_result: bool,
    pub inherited_error: Option<String>,
}

impl SessionContext {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            has_prior_result: false,
            inherited_error: None,
        }
    }

    pub fn with_prior_result(mut self, has_prior_result: bool) -> Self {
        self.has_prior_result = has_prior_result;
        self
    }

    pub fn with_inherited_error(mut self, message: impl Into<String>) -> Self {
        self.inherited_error = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepLocks {
    pub file_registration_locked: bool,
    pub result_display_locked: bool,
    pub registered_texts_visible: bool,
    pub busy: bool,
    pub collate_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct WorkflowSnapshot {
    pub state: WorkflowState,
    pub locks: StepLocks,
    pub name: Option<String>,
    pub language: Option<String>,
    pub entries: Vec<WitnessEntry>,
    pub options: CollationOptions,
    pub notice: Option<ErrorNotice>,
    pub session: SessionContext,
}

/// Returns false when two entries carry the same sigil, whether or not they
/// are included.
pub fn validate_sigla(entries: &[WitnessEntry]) -> bool {
    let mut seen = HashSet::with_capacity(entries.len());
    entries.iter().all(|entry| seen.insert(entry.sigil.as_str()))
}

struct WorkflowInner {
    session: SessionContext,
    state: WorkflowState,
    generation: u64,
    name: Option<String>,
    language: Option<String>,
    entries: Vec<WitnessEntry>,
    options: CollationOptions,
    file_registration_locked: bool,
    result_display_locked: bool,
    registered_texts_visible: bool,
    console: ErrorConsole,
}

impl WorkflowInner {
    fn new(session: SessionContext, dismiss_after: Duration) -> Self {
        Self {
            session,
            state: WorkflowState::NotStarted,
            generation: 0,
            name: None,
            language: None,
            entries: Vec::new(),
            options: CollationOptions::new(),
            file_registration_locked: true,
            result_display_locked: true,
            registered_texts_visible: false,
            console: ErrorConsole::new(dismiss_after),
        }
    }

    fn reset(&mut self) {
        self.state = WorkflowState::NotStarted;
        self.generation += 1;
        self.name = None;
        self.language = None;
        self.entries.clear();
        self.options = CollationOptions::new();
        self.file_registration_locked = true;
        self.result_display_locked = true;
        self.registered_texts_visible = false;
        self.session.has_prior_result = false;
        self.console.dismiss();
    }

    fn entry_mut(&mut self, text_id: &TextId) -> ClientResult<&mut WitnessEntry> {
        self.entries
            .iter_mut()
            .find(|entry| &entry.text_id == text_id)
            .ok_or_else(|| ClientError::UnknownText(text_id.clone()))
    }
}

/// Clears the in-flight flag when the collation request resolves, however it
/// resolves.
struct CollationInFlight<'a> {
    flag: &'a AtomicBool,
    events: &'a broadcast::Sender<ClientEvent>,
}

impl Drop for CollationInFlight<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        let _ = self.events.send(ClientEvent::Busy(false));
    }
}

pub struct WorkflowController {
    service: Arc<dyn CollationService>,
    inner: Mutex<WorkflowInner>,
    collation_in_flight: AtomicBool,
    events: broadcast::Sender<ClientEvent>,
}

impl WorkflowController {
    pub fn new(service: Arc<dyn CollationService>, session: SessionContext) -> Arc<Self> {
        Self::with_dismiss_after(service, session, DEFAULT_DISMISS_AFTER)
    }

    pub fn with_dismiss_after(
        service: Arc<dyn CollationService>,
        session: SessionContext,
        dismiss_after: Duration,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            service,
            inner: Mutex::new(WorkflowInner::new(session, dismiss_after)),
            collation_in_flight: AtomicBool::new(false),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> WorkflowSnapshot {
        let guard = self.inner.lock().await;
        let busy = self.collation_in_flight.load(Ordering::Acquire);
        WorkflowSnapshot {
            state: guard.state,
            locks: StepLocks {
                file_registration_locked: guard.file_registration_locked,
                result_display_locked: guard.result_display_locked,
                registered_texts_visible: guard.registered_texts_visible,
                busy,
                collate_enabled: !busy && guard.state >= WorkflowState::FilesRegistered,
            },
            name: guard.name.clone(),
            language: guard.language.clone(),
            entries: guard.entries.clone(),
            options: guard.options.clone(),
            notice: guard.console.visible().cloned(),
            session: guard.session.clone(),
        }
    }

    pub async fn state(&self) -> WorkflowState {
        self.inner.lock().await.state
    }

    /// Start-up rendering: surfaces an error the server handed over with the
    /// session and exposes a result left over from an earlier collation.
    pub async fn initialize(&self) {
        let mut guard = self.inner.lock().await;
        if guard.session.has_prior_result {
            guard.result_display_locked = false;
        }
        let inherited = guard.session.inherited_error.take();
        if let Some(message) = inherited {
            self.raise(&mut guard, &ClientError::Server(message));
        }
    }

    pub async fn set_name_and_language(
        &self,
        name: &str,
        language: &str,
    ) -> ClientResult<StatusResponse> {
        let generation = self.generation().await;
        let query = SetNameLangQuery {
            name: name.to_string(),
            language: language.to_string(),
        };

        let response = match self.service.set_name_lang(&query).await {
            Ok(response) => response,
            Err(err) => return Err(self.fail(err).await),
        };
        if !response.is_ok() {
            let err = ClientError::Server(format!(
                "name and language were not accepted (status '{}')",
                response.status
            ));
            return Err(self.fail(err).await);
        }

        let mut guard = self.inner.lock().await;
        if guard.generation != generation {
            debug!("workflow: discarding name/language response from before reset");
            return Ok(response);
        }
        guard.name = Some(query.name);
        guard.language = Some(query.language);
        guard.file_registration_locked = false;
        if guard.state < WorkflowState::NameLangSet {
            self.transition(&mut guard, WorkflowState::NameLangSet);
        }
        info!(language, "workflow: name and language set");
        Ok(response)
    }

    pub async fn refresh_registered_texts(&self) -> ClientResult<Vec<WitnessEntry>> {
        let generation = self.generation().await;
        let texts = match self.service.return_texts().await {
            Ok(texts) => texts,
            Err(err) => return Err(self.fail(err).await),
        };
        let entries: Vec<WitnessEntry> = texts.into_iter().map(WitnessEntry::from).collect();

        let mut guard = self.inner.lock().await;
        if guard.generation != generation {
            debug!("workflow: discarding registered texts from before reset");
            return Ok(entries);
        }
        guard.entries = entries.clone();
        guard.registered_texts_visible = !entries.is_empty();
        if guard.state == WorkflowState::NameLangSet && !entries.is_empty() {
            self.transition(&mut guard, WorkflowState::FilesRegistered);
        }
        info!(text_count = entries.len(), "workflow: registered texts refreshed");
        let _ = self.events.send(ClientEvent::TextsRefreshed(entries.clone()));
        Ok(entries)
    }

    /// Loads the files the upload endpoint already holds for this session.
    /// With none, file registration stays hidden; otherwise their texts are
    /// fetched.
    pub async fn list_uploads(&self) -> ClientResult<Vec<UploadedFile>> {
        let files = match self.service.list_uploads().await {
            Ok(files) => files,
            Err(err) => return Err(self.fail(err).await),
        };
        if files.is_empty() {
            self.inner.lock().await.file_registration_locked = true;
        } else {
            self.refresh_registered_texts().await?;
        }
        Ok(files)
    }

    pub async fn upload_witness(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> ClientResult<Vec<WitnessEntry>> {
        self.require_unlocked(Step::FileRegistration).await?;
        if let Err(err) = self.service.upload_file(filename, bytes).await {
            return Err(self.fail(err).await);
        }
        info!(filename, "workflow: witness uploaded");
        self.refresh_registered_texts().await
    }

    pub async fn remove_witness(&self, filename: &str) -> ClientResult<Vec<WitnessEntry>> {
        self.require_unlocked(Step::FileRegistration).await?;
        if let Err(err) = self.service.delete_upload(filename).await {
            return Err(self.fail(err).await);
        }
        info!(filename, "workflow: witness removed");
        self.refresh_registered_texts().await
    }

    pub async fn set_sigil(&self, text_id: &TextId, sigil: impl Into<String>) -> ClientResult<()> {
        let mut guard = self.inner.lock().await;
        guard.entry_mut(text_id)?.sigil = sigil.into();
        Ok(())
    }

    pub async fn set_included(&self, text_id: &TextId, included: bool) -> ClientResult<()> {
        let mut guard = self.inner.lock().await;
        guard.entry_mut(text_id)?.included = included;
        Ok(())
    }

    pub async fn collate(&self, options: CollationOptions) -> ClientResult<serde_json::Value> {
        let _in_flight = self.begin_collation()?;

        let (form, generation) = {
            let mut guard = self.inner.lock().await;
            if guard.state < WorkflowState::FilesRegistered {
                return Err(ClientError::StepLocked(Step::Collation));
            }
            if !validate_sigla(&guard.entries) {
                let err = ClientError::Validation(SIGLA_NOT_UNIQUE.to_string());
                self.raise(&mut guard, &err);
                return Err(err);
            }
            (collate_form(&guard.entries, &options), guard.generation)
        };

        info!(fields = form.len(), "workflow: collation requested");
        let ack = match self.service.collate_sources(&form).await {
            Ok(ack) => ack,
            Err(err) => return Err(self.fail(err).await),
        };

        let mut guard = self.inner.lock().await;
        if guard.generation != generation {
            debug!("workflow: discarding collation ack from before reset");
            return Ok(ack);
        }
        guard.options = options;
        guard.result_display_locked = false;
        self.transition(&mut guard, WorkflowState::Collated);
        Ok(ack)
    }

    pub async fn get_result(&self, kind: ResultKind) -> ClientResult<CollationResult> {
        self.require_unlocked(Step::ResultDisplay).await?;
        match self.service.fetch_result(kind).await {
            Ok(result) => {
                info!(%kind, bytes = result.body.len(), "workflow: result retrieved");
                Ok(result)
            }
            Err(err) => Err(self.fail(err).await),
        }
    }

    pub async fn reset_workflow(&self) {
        let mut guard = self.inner.lock().await;
        guard.reset();
        info!("workflow: reset");
        let _ = self
            .events
            .send(ClientEvent::StateChanged(WorkflowState::NotStarted));
    }

    fn begin_collation(&self) -> ClientResult<CollationInFlight<'_>> {
        self.collation_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ClientError::CollationInFlight)?;
        let _ = self.events.send(ClientEvent::Busy(true));
        Ok(CollationInFlight {
            flag: &self.collation_in_flight,
            events: &self.events,
        })
    }

    async fn generation(&self) -> u64 {
        self.inner.lock().await.generation
    }

    async fn require_unlocked(&self, step: Step) -> ClientResult<()> {
        let guard = self.inner.lock().await;
        let locked = match step {
            Step::FileRegistration => guard.file_registration_locked,
            Step::ResultDisplay => guard.result_display_locked,
            Step::Collation => guard.state < WorkflowState::FilesRegistered,
        };
        if locked {
            Err(ClientError::StepLocked(step))
        } else {
            Ok(())
        }
    }

    fn transition(&self, guard: &mut MutexGuard<'_, WorkflowInner>, next: WorkflowState) {
        if guard.state == next {
            return;
        }
        info!(from = %guard.state, to = %next, "workflow: state changed");
        guard.state = next;
        let _ = self.events.send(ClientEvent::StateChanged(next));
    }

    fn raise(&self, guard: &mut MutexGuard<'_, WorkflowInner>, err: &ClientError) {
        let Some(notice) = ErrorNotice::from_error(err) else {
            return;
        };
        warn!(origin = ?notice.origin, message = %notice.message, "workflow: error notice raised");
        guard.console.show(notice.clone(), Instant::now());
        let _ = self.events.send(ClientEvent::Notice(notice));
    }

    /// Routes a failed service call: session expiry reloads, everything else
    /// raises exactly one notice. The error is handed back to the caller.
    async fn fail(&self, err: ClientError) -> ClientError {
        if err.is_session_expired() {
            self.reload_after_session_expiry().await;
        } else {
            let mut guard = self.inner.lock().await;
            self.raise(&mut guard, &err);
        }
        err
    }

    async fn reload_after_session_expiry(&self) {
        warn!("workflow: session expired; reloading");
        if let Err(err) = self.service.reload_session_expired().await {
            warn!(%err, "workflow: session reload request failed");
        }
        let mut guard = self.inner.lock().await;
        guard.reset();
        guard.session.inherited_error = Some(SESSION_EXPIRED_MESSAGE.to_string());
        let _ = self.events.send(ClientEvent::SessionReloaded);
        let _ = self
            .events
            .send(ClientEvent::StateChanged(WorkflowState::NotStarted));
    }
}


#[cfg(test)]
#[path = "tests/workflow_tests.rs"]
mod tests;
