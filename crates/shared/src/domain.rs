use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(TextId);

/// Steps of a collation session. Ordered: a later variant means more of the
/// workflow has been completed.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    #[default]
    NotStarted,
    NameLangSet,
    FilesRegistered,
    Collated,
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WorkflowState::NotStarted => "not_started",
            WorkflowState::NameLangSet => "name_lang_set",
            WorkflowState::FilesRegistered => "files_registered",
            WorkflowState::Collated => "collated",
        };
        f.write_str(label)
    }
}

/// One registered witness as the user sees it in the configuration form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessEntry {
    pub text_id: TextId,
    pub title: String,
    pub auto_sigil: String,
    pub sigil: String,
    pub included: bool,
}

impl WitnessEntry {
    pub fn sigil_field_name(&self) -> String {
        format!("sigil_{}", self.text_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Download,
    Display,
}

impl ResultKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultKind::Download => "download",
            ResultKind::Display => "display",
        }
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Xml,
    Json,
}

impl ExportFormat {
    pub fn endpoint(self) -> &'static str {
        match self {
            ExportFormat::Xml => "session_xml",
            ExportFormat::Json => "session_json",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollationResult {
    pub kind: ResultKind,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl CollationResult {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
