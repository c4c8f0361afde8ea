//! HTTP client for the Kali-E backend: token issuance and file uploads.

use crate::{config::ClientConfig, error::SessionError, session::TokenGrant};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, multipart};
use serde::Deserialize;
use tracing::{debug, error};
use uuid::Uuid;

/// Issues room credentials.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Requests a credential for the given display name.
    async fn fetch_token(&self, display_name: &str) -> Result<TokenGrant, SessionError>;
}

/// A file picked by the user for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Metadata for a file the backend accepted.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct UploadedFile {
    pub id: Uuid,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
    pub file: String,
}

/// Uploads user files into a room's context.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileUploader: Send + Sync {
    async fn upload(
        &self,
        room: &str,
        files: Vec<UploadFile>,
    ) -> Result<Vec<UploadedFile>, SessionError>;
}

/// `reqwest` implementation of [`TokenSource`] and [`FileUploader`].
#[derive(Clone)]
pub struct BackendClient {
    http: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(config: &ClientConfig) -> Result<Self, SessionError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SessionError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl TokenSource for BackendClient {
    async fn fetch_token(&self, display_name: &str) -> Result<TokenGrant, SessionError> {
        let url = self.endpoint("get_token/");
        debug!(%url, display_name, "Requesting room token");
        let response = self
            .http
            .get(&url)
            .query(&[("name", display_name)])
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Token request failed");
                SessionError::TokenFetch(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, %body, "Token endpoint returned an error");
            return Err(SessionError::TokenFetch(format!("status {}", status)));
        }

        response
            .json::<TokenGrant>()
            .await
            .map_err(|e| SessionError::TokenFetch(format!("malformed token response: {}", e)))
    }
}

#[async_trait]
impl FileUploader for BackendClient {
    async fn upload(
        &self,
        room: &str,
        files: Vec<UploadFile>,
    ) -> Result<Vec<UploadedFile>, SessionError> {
        let mut form = multipart::Form::new();
        for file in files {
            let part = multipart::Part::bytes(file.bytes)
                .file_name(file.name)
                .mime_str(&file.mime_type)
                .map_err(|e| SessionError::Upload(e.to_string()))?;
            form = form.part("files", part);
        }

        let url = self.endpoint(&format!("rooms/{}/files/", room));
        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| SessionError::Upload(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::Upload(format!("status {}", status)));
        }
        response
            .json::<Vec<UploadedFile>>()
            .await
            .map_err(|e| SessionError::Upload(format!("malformed upload response: {}", e)))
    }
}
