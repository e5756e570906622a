use serde::{Deserialize, Serialize};

use crate::domain::{ResultKind, TextId, WitnessEntry};

/// Form field carried by the reload request issued after the server drops a session.
pub const SESSION_EXPIRED_FIELD: &str = "session_expired";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetNameLangQuery {
    pub name: String,
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub status: String,
}

impl StatusResponse {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// A text the server has registered for the current session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredText {
    pub text: TextId,
    pub autosigil: String,
    pub title: String,
}

impl From<RegisteredText> for WitnessEntry {
    fn from(value: RegisteredText) -> Self {
        Self {
            text_id: value.text,
            title: value.title,
            sigil: value.autosigil.clone(),
            auto_sigil: value.autosigil,
            included: true,
        }
    }
}

/// A file held by the upload endpoint, independent of whether the server has
/// parsed it into a registered text yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Algorithm options forwarded verbatim with the collation form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollationOptions(Vec<(String, String)>);

impl CollationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CollationOptions {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Serializes the configuration form the way a browser submits it: a `text`
/// field per checked entry, then every sigil field, then the options.
pub fn collate_form(entries: &[WitnessEntry], options: &CollationOptions) -> Vec<(String, String)> {
    let mut form = Vec::with_capacity(entries.len() * 2);
    for entry in entries {
        if entry.included {
            form.push(("text".to_string(), entry.text_id.to_string()));
        }
        form.push((entry.sigil_field_name(), entry.sigil.clone()));
    }
    form.extend(options.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    form
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultFormRequest {
    pub kind: ResultKind,
}

/// Fields of the transcription form. The controller does not interpret the
/// markup; it only knows which field carries the language.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionForm {
    pub markup: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<(String, String)>,
}

impl TranscriptionForm {
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![("markuptext".to_string(), self.markup.clone())];
        if let Some(language) = &self.language {
            pairs.push(("language".to_string(), language.clone()));
        }
        pairs.extend(self.extra.iter().cloned());
        pairs
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertedTranscription {
    #[serde(default)]
    pub textcontent: String,
    #[serde(default)]
    pub textdescription: String,
    #[serde(default)]
    pub textsigil: String,
    #[serde(default)]
    pub textidentifier: String,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
}

impl ConvertedTranscription {
    pub fn error_message(&self) -> Option<&str> {
        self.error_msg
            .as_deref()
            .map(str::trim)
            .filter(|msg| !msg.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetAllResponse {
    #[serde(default)]
    pub xmltemplate: String,
}
