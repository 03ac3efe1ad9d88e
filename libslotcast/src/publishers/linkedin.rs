//! LinkedIn publisher
//!
//! Uses the versioned REST API (`/rest/posts`, `/rest/images`). Posts are
//! authored as the URN carried on the credential's `account`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::credentials::Credential;
use crate::error::{PlatformError, Result};
use crate::publishers::{decode_error, error_for_status, transport_error, Publisher};
use crate::types::{ImageMimeType, MediaPayload, Platform, PreviewDescriptor};

pub const DEFAULT_API_BASE: &str = "https://api.linkedin.com";
pub const API_VERSION: &str = "202601";
const CHARACTER_LIMIT: usize = 3000;
const ARTICLE_DESCRIPTION_LIMIT: usize = 200;
const SUPPORTED_MIME_TYPES: [ImageMimeType; 3] =
    [ImageMimeType::Jpeg, ImageMimeType::Png, ImageMimeType::Gif];

pub struct LinkedInPublisher {
    client: reqwest::Client,
    api_base: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeUploadValue {
    upload_url: String,
    image: String,
}

#[derive(Debug, Deserialize)]
struct InitializeUploadResponse {
    value: InitializeUploadValue,
}

impl LinkedInPublisher {
    /// `api_base` defaults to the public API host
    pub fn new(client: reqwest::Client, api_base: Option<String>) -> Self {
        let api_base = api_base
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();
        Self { client, api_base }
    }

    fn author<'a>(&self, credential: &'a Credential) -> Result<&'a str> {
        credential.account.as_deref().ok_or_else(|| {
            PlatformError::Authentication(
                "LinkedIn credential has no author URN (set linkedin.author_urn)".to_string(),
            )
            .into()
        })
    }

    fn request(
        &self,
        method: reqwest::Method,
        url: &str,
        credential: &Credential,
    ) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", credential.bearer())
            .header("LinkedIn-Version", API_VERSION)
            .header("X-Restli-Protocol-Version", "2.0.0")
    }

    fn post_body(
        author: &str,
        content: &str,
        preview: Option<&PreviewDescriptor>,
    ) -> serde_json::Value {
        let mut body = json!({
            "author": author,
            "commentary": content,
            "visibility": "PUBLIC",
            "distribution": {
                "feedDistribution": "MAIN_FEED",
                "targetEntities": [],
                "thirdPartyDistributionChannels": [],
            },
            "lifecycleState": "PUBLISHED",
            "isReshareDisabledByAuthor": false,
        });

        if let Some(preview) = preview {
            let mut article = json!({
                "source": preview.source_url,
                "title": preview.title,
            });
            if let Some(description) = &preview.description {
                let truncated: String = description
                    .chars()
                    .take(ARTICLE_DESCRIPTION_LIMIT)
                    .collect();
                article["description"] = json!(truncated);
            }
            if let Some(thumbnail) = &preview.thumbnail {
                article["thumbnail"] = json!(thumbnail);
            }
            body["content"] = json!({ "article": article });
        }

        body
    }
}

#[async_trait]
impl Publisher for LinkedInPublisher {
    fn platform(&self) -> Platform {
        Platform::LinkedIn
    }

    fn character_limit(&self) -> Option<usize> {
        Some(CHARACTER_LIMIT)
    }

    fn supports_media_upload(&self) -> bool {
        true
    }

    fn supported_mime_types(&self) -> &[ImageMimeType] {
        &SUPPORTED_MIME_TYPES
    }

    async fn upload_media(&self, media: &MediaPayload, credential: &Credential) -> Result<String> {
        if !SUPPORTED_MIME_TYPES.contains(&media.mime_type) {
            return Err(PlatformError::UnsupportedMedia(format!(
                "LinkedIn does not accept {}",
                media.mime_type
            ))
            .into());
        }
        let owner = self.author(credential)?;

        let init_url = format!("{}/rest/images?action=initializeUpload", self.api_base);
        let response = self
            .request(reqwest::Method::POST, &init_url, credential)
            .json(&json!({ "initializeUploadRequest": { "owner": owner } }))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(status, &body).into());
        }

        let init: InitializeUploadResponse = response
            .json()
            .await
            .map_err(|e| decode_error("initializeUpload response", e))?;

        let upload = self
            .client
            .put(&init.value.upload_url)
            .header("Authorization", credential.bearer())
            .header("Content-Type", media.mime_type.as_str())
            .body(media.bytes.clone())
            .send()
            .await
            .map_err(transport_error)?;

        let status = upload.status();
        if !status.is_success() {
            let body = upload.text().await.unwrap_or_default();
            return Err(error_for_status(status, &body).into());
        }

        debug!(image = %init.value.image, bytes = media.bytes.len(), "Uploaded LinkedIn image");
        Ok(init.value.image)
    }

    async fn publish(
        &self,
        content: &str,
        preview: Option<&PreviewDescriptor>,
        credential: &Credential,
    ) -> Result<String> {
        self.validate_content(content)?;
        let author = self.author(credential)?;

        let url = format!("{}/rest/posts", self.api_base);
        let response = self
            .request(reqwest::Method::POST, &url, credential)
            .json(&Self::post_body(author, content, preview))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(status, &body).into());
        }

        let post_id = response
            .headers()
            .get("x-restli-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                PlatformError::Posting("LinkedIn response carried no x-restli-id".to_string())
            })?;

        Ok(post_id)
    }
}
