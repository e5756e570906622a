//! The collation service seen from the client: async traits at the seam and
//! the reqwest-backed implementation.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{cookie::Jar, header::CONTENT_TYPE, multipart, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::{CollationResult, ExportFormat, ResultKind},
    error::{ServerErrorPayload, GENERIC_SERVER_ERROR},
    protocol::{
        ConvertedTranscription, RegisteredText, ResetAllResponse, ResultFormRequest,
        SetNameLangQuery, StatusResponse, UploadedFile, SESSION_EXPIRED_FIELD,
    },
};
use tracing::{debug, warn};
use url::Url;

use crate::error::{ClientError, ClientResult};

pub type FormPairs = [(String, String)];

#[async_trait]
pub trait SessionReload: Send + Sync {
    /// Re-enters the service after it reported the session as expired.
    async fn reload_session_expired(&self) -> ClientResult<()>;
}

#[async_trait]
pub trait CollationService: SessionReload {
    async fn set_name_lang(&self, query: &SetNameLangQuery) -> ClientResult<StatusResponse>;
    async fn return_texts(&self) -> ClientResult<Vec<RegisteredText>>;
    async fn collate_sources(&self, form: &FormPairs) -> ClientResult<serde_json::Value>;
    async fn fetch_result(&self, kind: ResultKind) -> ClientResult<CollationResult>;
    async fn list_uploads(&self) -> ClientResult<Vec<UploadedFile>>;
    async fn upload_file(&self, filename: &str, bytes: Vec<u8>) -> ClientResult<()>;
    async fn delete_upload(&self, filename: &str) -> ClientResult<()>;
}

#[async_trait]
pub trait TranscriptionService: SessionReload {
    async fn convert_transcription(&self, form: &FormPairs)
        -> ClientResult<ConvertedTranscription>;
    async fn reset_all(&self) -> ClientResult<ResetAllResponse>;
    async fn download_session(&self, format: ExportFormat) -> ClientResult<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct ServiceEndpoints {
    pub base_url: Url,
    pub transcription_base_url: Url,
    pub upload_path: String,
    pub download_result_path: String,
    pub display_result_path: String,
}

impl ServiceEndpoints {
    pub fn new(base_url: &str) -> ClientResult<Self> {
        let base_url = normalize_base_url(base_url)?;
        Ok(Self {
            transcription_base_url: base_url.clone(),
            base_url,
            upload_path: "upload".to_string(),
            download_result_path: "result/download".to_string(),
            display_result_path: "result/display".to_string(),
        })
    }

    pub fn with_transcription_base_url(mut self, url: &str) -> ClientResult<Self> {
        self.transcription_base_url = normalize_base_url(url)?;
        Ok(self)
    }

    pub fn with_upload_path(mut self, path: impl Into<String>) -> Self {
        self.upload_path = path.into();
        self
    }

    pub fn collate(&self, path: &str) -> ClientResult<Url> {
        join_endpoint(&self.base_url, path)
    }

    pub fn transcription(&self, path: &str) -> ClientResult<Url> {
        join_endpoint(&self.transcription_base_url, path)
    }

    fn result_path(&self, kind: ResultKind) -> &str {
        match kind {
            ResultKind::Download => &self.download_result_path,
            ResultKind::Display => &self.display_result_path,
        }
    }
}

/// Parses a base URL and makes sure relative endpoints resolve beneath it
/// rather than replacing its last path segment.
pub fn normalize_base_url(raw: &str) -> ClientResult<Url> {
    let mut url = Url::parse(raw.trim())
        .map_err(|err| ClientError::Validation(format!("invalid base url '{raw}': {err}")))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn join_endpoint(base: &Url, path: &str) -> ClientResult<Url> {
    base.join(path.trim_start_matches('/'))
        .map_err(|err| ClientError::Validation(format!("invalid endpoint '{path}': {err}")))
}

pub struct HttpCollationService {
    http: Client,
    endpoints: ServiceEndpoints,
}

impl HttpCollationService {
    pub fn new(endpoints: ServiceEndpoints) -> ClientResult<Self> {
        Self::with_timeout(endpoints, None)
    }

    pub fn with_timeout(
        endpoints: ServiceEndpoints,
        timeout: Option<Duration>,
    ) -> ClientResult<Self> {
        Self::with_cookie_jar(endpoints, timeout, Arc::new(Jar::default()))
    }

    /// Builds a client that reads and writes session cookies through `jar`.
    pub fn with_cookie_jar(
        endpoints: ServiceEndpoints,
        timeout: Option<Duration>,
        jar: Arc<Jar>,
    ) -> ClientResult<Self> {
        let mut builder = Client::builder().cookie_provider(jar);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;
        Ok(Self { http, endpoints })
    }

    pub fn endpoints(&self) -> &ServiceEndpoints {
        &self.endpoints
    }
}

/// Rejects responses that are not 2xx. 401/403, or a body carrying the
/// `session_expired` code, mean the session is gone.
async fn check_status(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ClientError::SessionExpired);
    }
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if ServerErrorPayload::signals_session_expired(&body) {
        return Err(ClientError::SessionExpired);
    }
    let message = ServerErrorPayload::message_from_body(&body)
        .unwrap_or_else(|| format!("{GENERIC_SERVER_ERROR} (HTTP {status})"));
    Err(ClientError::Server(message))
}

async fn read_json<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let response = check_status(response).await?;
    let url = response.url().clone();
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|err| {
        if ServerErrorPayload::signals_session_expired(&body) {
            return ClientError::SessionExpired;
        }
        warn!(%url, %err, "service: response body is not the expected json");
        ClientError::Server(GENERIC_SERVER_ERROR.to_string())
    })
}

#[async_trait]
impl SessionReload for HttpCollationService {
    async fn reload_session_expired(&self) -> ClientResult<()> {
        let response = self
            .http
            .post(self.endpoints.base_url.clone())
            .form(&[(SESSION_EXPIRED_FIELD, "1")])
            .send()
            .await?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "service: session reload was not accepted");
        }
        Ok(())
    }
}

#[async_trait]
impl CollationService for HttpCollationService {
    async fn set_name_lang(&self, query: &SetNameLangQuery) -> ClientResult<StatusResponse> {
        let response = self
            .http
            .get(self.endpoints.collate("setNameLang")?)
            .query(query)
            .send()
            .await?;
        read_json(response).await
    }

    async fn return_texts(&self) -> ClientResult<Vec<RegisteredText>> {
        let response = self
            .http
            .get(self.endpoints.collate("return_texts")?)
            .send()
            .await?;
        read_json(response).await
    }

    async fn collate_sources(&self, form: &FormPairs) -> ClientResult<serde_json::Value> {
        debug!(fields = form.len(), "service: posting collation form");
        let response = self
            .http
            .post(self.endpoints.collate("collate_sources")?)
            .form(form)
            .send()
            .await?;
        read_json(response).await
    }

    async fn fetch_result(&self, kind: ResultKind) -> ClientResult<CollationResult> {
        let response = self
            .http
            .post(self.endpoints.collate(self.endpoints.result_path(kind))?)
            .form(&ResultFormRequest { kind })
            .send()
            .await?;
        let response = check_status(response).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();
        Ok(CollationResult {
            kind,
            content_type,
            body,
        })
    }

    async fn list_uploads(&self) -> ClientResult<Vec<UploadedFile>> {
        let response = self
            .http
            .get(self.endpoints.collate(&self.endpoints.upload_path)?)
            .send()
            .await?;
        read_json(response).await
    }

    async fn upload_file(&self, filename: &str, bytes: Vec<u8>) -> ClientResult<()> {
        let part = multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = multipart::Form::new().part("files[]", part);
        let response = self
            .http
            .post(self.endpoints.collate(&self.endpoints.upload_path)?)
            .multipart(form)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn delete_upload(&self, filename: &str) -> ClientResult<()> {
        let response = self
            .http
            .delete(self.endpoints.collate(&self.endpoints.upload_path)?)
            .query(&[("file", filename)])
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

#[async_trait]
impl TranscriptionService for HttpCollationService {
    async fn convert_transcription(
        &self,
        form: &FormPairs,
    ) -> ClientResult<ConvertedTranscription> {
        let response = self
            .http
            .post(self.endpoints.transcription("convert_transcription")?)
            .form(form)
            .send()
            .await?;
        read_json(response).await
    }

    async fn reset_all(&self) -> ClientResult<ResetAllResponse> {
        let response = self
            .http
            .post(self.endpoints.transcription("reset_all")?)
            .send()
            .await?;
        read_json(response).await
    }

    async fn download_session(&self, format: ExportFormat) -> ClientResult<Vec<u8>> {
        let response = self
            .http
            .get(self.endpoints.transcription(format.endpoint())?)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
#[path = "tests/service_tests.rs"]
mod tests;
