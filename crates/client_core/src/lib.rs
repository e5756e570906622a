use shared::domain::{WitnessEntry, WorkflowState};

pub mod cookies;
pub mod error;
pub mod help;
pub mod notice;
pub mod service;
pub mod transcription;
pub mod workflow;

pub use cookies::SessionCookies;
pub use error::{ClientError, ClientResult, Step};
pub use help::HelpTopic;
pub use notice::{ErrorConsole, ErrorNotice, NoticeOrigin};
pub use service::{
    CollationService, HttpCollationService, ServiceEndpoints, SessionReload, TranscriptionService,
};
pub use transcription::TranscriptionController;
pub use workflow::{
    validate_sigla, SessionContext, StepLocks, WorkflowController, WorkflowSnapshot,
};

#[derive(Debug, Clone)]
pub enum ClientEvent {
    StateChanged(WorkflowState),
    TextsRefreshed(Vec<WitnessEntry>),
    Busy(bool),
    Notice(ErrorNotice),
    SessionReloaded,
    TranscriptionConverted { sigil: String, warnings: usize },
    TranscriptionCleared,
}
