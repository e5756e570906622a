//! Transcription ("msview") controller: converts marked-up transcriptions via
//! the service and offers the session's XML/JSON exports.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use shared::{
    domain::ExportFormat,
    protocol::{ConvertedTranscription, TranscriptionForm},
};
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::{
    error::{ClientError, ClientResult},
    notice::{ErrorConsole, ErrorNotice, DEFAULT_DISMISS_AFTER},
    service::TranscriptionService,
    ClientEvent,
};

#[derive(Debug, Default)]
struct TranscriptionState {
    form: TranscriptionForm,
    xml_template: Option<String>,
    last_converted: Option<ConvertedTranscription>,
    console: ErrorConsole,
}

pub struct TranscriptionController {
    service: Arc<dyn TranscriptionService>,
    inner: Mutex<TranscriptionState>,
    events: broadcast::Sender<ClientEvent>,
}

impl TranscriptionController {
    pub fn new(service: Arc<dyn TranscriptionService>) -> Arc<Self> {
        Self::with_dismiss_after(service, DEFAULT_DISMISS_AFTER)
    }

    pub fn with_dismiss_after(
        service: Arc<dyn TranscriptionService>,
        dismiss_after: Duration,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            service,
            inner: Mutex::new(TranscriptionState {
                console: ErrorConsole::new(dismiss_after),
                ..TranscriptionState::default()
            }),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn set_markup(&self, markup: impl Into<String>) {
        self.inner.lock().await.form.markup = markup.into();
    }

    pub async fn set_language(&self, language: Option<String>) {
        self.inner.lock().await.form.language = language;
    }

    pub async fn form(&self) -> TranscriptionForm {
        self.inner.lock().await.form.clone()
    }

    pub async fn xml_template(&self) -> Option<String> {
        self.inner.lock().await.xml_template.clone()
    }

    pub async fn last_converted(&self) -> Option<ConvertedTranscription> {
        self.inner.lock().await.last_converted.clone()
    }

    pub async fn visible_notice(&self) -> Option<ErrorNotice> {
        self.inner.lock().await.console.visible().cloned()
    }

    pub async fn convert(&self) -> ClientResult<ConvertedTranscription> {
        let pairs = {
            let mut guard = self.inner.lock().await;
            guard.console.dismiss();
            guard.form.to_pairs()
        };

        let converted = match self.service.convert_transcription(&pairs).await {
            Ok(converted) => converted,
            Err(err) => return Err(self.fail(err).await),
        };
        if let Some(message) = converted.error_message() {
            let err = ClientError::Server(message.to_string());
            return Err(self.fail(err).await);
        }

        info!(
            sigil = %converted.textsigil,
            warnings = converted.warnings.len(),
            "transcription: converted"
        );
        self.inner.lock().await.last_converted = Some(converted.clone());
        let _ = self.events.send(ClientEvent::TranscriptionConverted {
            sigil: converted.textsigil.clone(),
            warnings: converted.warnings.len(),
        });
        Ok(converted)
    }

    /// Clears the server-side session and the local form, returning the fresh
    /// XML template.
    pub async fn clear(&self) -> ClientResult<String> {
        let response = match self.service.reset_all().await {
            Ok(response) => response,
            Err(err) => return Err(self.fail(err).await),
        };

        let mut guard = self.inner.lock().await;
        guard.form.markup.clear();
        guard.form.language = None;
        guard.last_converted = None;
        guard.xml_template = Some(response.xmltemplate.clone());
        info!("transcription: session cleared");
        let _ = self.events.send(ClientEvent::TranscriptionCleared);
        Ok(response.xmltemplate)
    }

    pub async fn download(&self, format: ExportFormat) -> ClientResult<Vec<u8>> {
        match self.service.download_session(format).await {
            Ok(bytes) => Ok(bytes),
            Err(err) => Err(self.fail(err).await),
        }
    }

    async fn fail(&self, err: ClientError) -> ClientError {
        if err.is_session_expired() {
            warn!("transcription: session expired; reloading");
            if let Err(reload_err) = self.service.reload_session_expired().await {
                warn!(%reload_err, "transcription: session reload request failed");
            }
            let mut guard = self.inner.lock().await;
            let dismiss_after = guard.console.dismiss_after();
            *guard = TranscriptionState {
                console: ErrorConsole::new(dismiss_after),
                ..TranscriptionState::default()
            };
            let _ = self.events.send(ClientEvent::SessionReloaded);
        } else if let Some(notice) = ErrorNotice::from_error(&err) {
            warn!(
                origin = ?notice.origin,
                message = %notice.message,
                "transcription: error notice raised"
            );
            self.inner
                .lock()
                .await
                .console
                .show(notice.clone(), Instant::now());
            let _ = self.events.send(ClientEvent::Notice(notice));
        }
        err
    }
}
