//! Platform publishers
//!
//! One [`Publisher`] per platform. A publisher knows its platform's content
//! rules, builds authenticated requests from a [`Credential`] and translates
//! the remote API's failures into [`PlatformError`] kinds. Publishers never
//! retry; that is a decision for the dispatch loop or the user.
//!
//! # Examples
//!
//! ```no_run
//! use libslotcast::credentials::Credential;
//! use libslotcast::publishers::{threads::ThreadsPublisher, Publisher};
//!
//! # async fn example() -> libslotcast::Result<()> {
//! let publisher = ThreadsPublisher::new(reqwest::Client::new(), None);
//! let credential = Credential::new("token");
//!
//! publisher.validate_content("Hello from the queue")?;
//! let post_id = publisher
//!     .publish("Hello from the queue", None, &credential)
//!     .await?;
//! println!("Posted: {}", post_id);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::credentials::Credential;
use crate::error::{PlatformError, Result};
use crate::types::{ImageMimeType, MediaPayload, Platform, PreviewDescriptor};

pub mod linkedin;
pub mod threads;

// Mock publisher is available for all builds (not just tests) to support integration tests
pub mod mock;

/// Publishing capability of one platform
#[async_trait]
pub trait Publisher: Send + Sync {
    fn platform(&self) -> Platform;

    /// Maximum post length in characters, `None` if unbounded
    fn character_limit(&self) -> Option<usize>;

    /// Check content against platform rules before any network call
    ///
    /// # Errors
    ///
    /// - `PlatformError::Validation` for empty content
    /// - `PlatformError::ContentTooLong` past the character limit
    fn validate_content(&self, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            return Err(PlatformError::Validation("Content cannot be empty".to_string()).into());
        }

        if let Some(limit) = self.character_limit() {
            let actual = content.chars().count();
            if actual > limit {
                return Err(PlatformError::ContentTooLong { limit, actual }.into());
            }
        }

        Ok(())
    }

    /// Whether preview thumbnails can be uploaded to this platform
    fn supports_media_upload(&self) -> bool {
        false
    }

    fn supported_mime_types(&self) -> &[ImageMimeType] {
        &[]
    }

    /// Upload an image and return the platform's media reference
    async fn upload_media(&self, media: &MediaPayload, _credential: &Credential) -> Result<String> {
        Err(PlatformError::UnsupportedMedia(format!(
            "{} does not accept media uploads ({})",
            self.platform(),
            media.mime_type
        ))
        .into())
    }

    /// Publish content, with an optional link preview, and return the post id
    async fn publish(
        &self,
        content: &str,
        preview: Option<&PreviewDescriptor>,
        credential: &Credential,
    ) -> Result<String>;
}

/// Publishers keyed by platform
#[derive(Clone, Default)]
pub struct Publishers {
    by_platform: HashMap<Platform, Arc<dyn Publisher>>,
}

impl Publishers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.insert(publisher);
        self
    }

    pub fn insert(&mut self, publisher: Arc<dyn Publisher>) {
        self.by_platform.insert(publisher.platform(), publisher);
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn Publisher>> {
        self.by_platform.get(&platform).cloned()
    }

    /// Platforms with a publisher, in `Platform` order
    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.by_platform.keys().copied().collect();
        platforms.sort();
        platforms
    }

    /// Build publishers for every enabled platform in the configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.scheduling.publish_timeout())
            .build()
            .map_err(|e| PlatformError::Network(format!("Failed to build HTTP client: {}", e)))?;

        let mut publishers = Self::new();

        if let Some(linkedin) = config.linkedin.as_ref().filter(|c| c.enabled) {
            publishers.insert(Arc::new(linkedin::LinkedInPublisher::new(
                client.clone(),
                linkedin.api_base.clone(),
            )));
        }
        if let Some(threads) = config.threads.as_ref().filter(|c| c.enabled) {
            publishers.insert(Arc::new(threads::ThreadsPublisher::new(
                client,
                threads.api_base.clone(),
            )));
        }

        Ok(publishers)
    }
}

/// Translate a non-success HTTP status into an error kind
pub(crate) fn error_for_status(status: reqwest::StatusCode, body: &str) -> PlatformError {
    let detail = format!("HTTP {}: {}", status.as_u16(), body.trim());
    match status.as_u16() {
        401 | 403 => PlatformError::Authentication(detail),
        400 | 413 | 422 => PlatformError::Validation(detail),
        429 => PlatformError::RateLimit(detail),
        500..=599 => PlatformError::Network(detail),
        _ => PlatformError::Posting(detail),
    }
}

/// Transport failures (connect, timeout, body read) are network errors
///
/// The request URL is stripped from the message: Threads carries the access
/// token in the query string, and these messages are stored and logged.
pub(crate) fn transport_error(e: reqwest::Error) -> PlatformError {
    let timed_out = e.is_timeout();
    let e = e.without_url();
    if timed_out {
        PlatformError::Network(format!("Request timed out: {}", e))
    } else {
        PlatformError::Network(format!("Request failed: {}", e))
    }
}

/// A response body that does not match the expected shape
pub(crate) fn decode_error(what: &str, e: reqwest::Error) -> PlatformError {
    PlatformError::Posting(format!("Unexpected {}: {}", what, e.without_url()))
}
