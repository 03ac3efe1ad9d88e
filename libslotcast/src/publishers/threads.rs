//! Threads publisher
//!
//! Publishing is two-step: create a media container, wait until Threads
//! has processed it, then publish it. The token travels as the
//! `access_token` query parameter. Threads has no thumbnail upload, so
//! link previews are attached as `link_attachment` and rendered by Threads.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::credentials::Credential;
use crate::error::{PlatformError, Result};
use crate::publishers::{decode_error, error_for_status, transport_error, Publisher};
use crate::types::{Platform, PreviewDescriptor};

pub const DEFAULT_API_BASE: &str = "https://graph.threads.net";
const API_VERSION: &str = "v1.0";
const CHARACTER_LIMIT: usize = 500;
const STATUS_POLL_ATTEMPTS: u32 = 10;
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct ThreadsPublisher {
    client: reqwest::Client,
    api_base: String,
    poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ContainerStatus {
    status: Option<String>,
    error_message: Option<String>,
}

impl ThreadsPublisher {
    /// `api_base` defaults to the public Graph API host
    pub fn new(client: reqwest::Client, api_base: Option<String>) -> Self {
        let api_base = api_base
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();
        Self {
            client,
            api_base,
            poll_interval: STATUS_POLL_INTERVAL,
        }
    }

    #[cfg(test)]
    fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn url(&self, path: &str, params: &[(&str, &str)]) -> Result<reqwest::Url> {
        let base = format!("{}/{}/{}", self.api_base, API_VERSION, path);
        reqwest::Url::parse_with_params(&base, params).map_err(|e| {
            PlatformError::Posting(format!("Invalid Threads URL {}: {}", base, e)).into()
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(status, &body).into());
        }
        Ok(response)
    }

    async fn create_container(
        &self,
        content: &str,
        preview: Option<&PreviewDescriptor>,
        token: &str,
    ) -> Result<String> {
        let mut params = vec![
            ("media_type", "TEXT"),
            ("text", content),
            ("access_token", token),
        ];
        if let Some(preview) = preview {
            params.push(("link_attachment", preview.source_url.as_str()));
        }

        let url = self.url("me/threads", &params)?;
        let response = self.send(self.client.post(url)).await?;
        let created: IdResponse = response
            .json()
            .await
            .map_err(|e| decode_error("container response", e))?;
        Ok(created.id)
    }

    /// Wait for the container to finish processing
    ///
    /// Gives up waiting after a bounded number of polls and lets the publish
    /// call decide; `ERROR`, `EXPIRED` and `PUBLISHED` fail immediately.
    async fn wait_for_container(&self, container_id: &str, token: &str) -> Result<()> {
        let url = self.url(
            container_id,
            &[("fields", "status,error_message"), ("access_token", token)],
        )?;

        for attempt in 1..=STATUS_POLL_ATTEMPTS {
            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(transport_error)?;

            if response.status().is_success() {
                let status: ContainerStatus = response
                    .json()
                    .await
                    .map_err(|e| decode_error("container status", e))?;

                match status.status.as_deref() {
                    Some("FINISHED") => {
                        debug!(container_id, attempt, "Threads container ready");
                        return Ok(());
                    }
                    Some("ERROR") => {
                        return Err(PlatformError::Posting(
                            status
                                .error_message
                                .unwrap_or_else(|| "Container processing failed".to_string()),
                        )
                        .into());
                    }
                    Some("EXPIRED") => {
                        return Err(PlatformError::Posting(
                            "Container expired before publishing".to_string(),
                        )
                        .into());
                    }
                    Some("PUBLISHED") => {
                        return Err(
                            PlatformError::Posting("Container already published".to_string())
                                .into(),
                        );
                    }
                    other => {
                        debug!(container_id, status = ?other, "Threads container not ready");
                    }
                }
            } else {
                warn!(container_id, status = %response.status(), "Failed to check container status");
            }

            tokio::time::sleep(self.poll_interval).await;
        }

        warn!(
            container_id,
            attempts = STATUS_POLL_ATTEMPTS,
            "Container not ready, publishing anyway"
        );
        Ok(())
    }
}

#[async_trait]
impl Publisher for ThreadsPublisher {
    fn platform(&self) -> Platform {
        Platform::Threads
    }

    fn character_limit(&self) -> Option<usize> {
        Some(CHARACTER_LIMIT)
    }

    async fn publish(
        &self,
        content: &str,
        preview: Option<&PreviewDescriptor>,
        credential: &Credential,
    ) -> Result<String> {
        use secrecy::ExposeSecret;

        self.validate_content(content)?;
        let token = credential.access_token.expose_secret();

        let container_id = self.create_container(content, preview, token).await?;
        self.wait_for_container(&container_id, token).await?;

        let url = self.url(
            "me/threads_publish",
            &[("creation_id", container_id.as_str()), ("access_token", token)],
        )?;
        let response = self.send(self.client.post(url)).await?;
        let published: IdResponse = response
            .json()
            .await
            .map_err(|e| decode_error("publish response", e))?;

        Ok(published.id)
    }
}
