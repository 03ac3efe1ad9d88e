//! Mock publisher implementation for testing
//!
//! A configurable publisher that can simulate successes, failures, slow
//! platforms and media uploads. Clones share their call records, so a test
//! can hand one clone to the dispatcher and inspect another.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::sleep;

use crate::credentials::Credential;
use crate::error::{PlatformError, Result};
use crate::publishers::Publisher;
use crate::types::{ImageMimeType, MediaPayload, Platform, PreviewDescriptor};

/// Configuration for mock publisher behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub platform: Platform,

    /// Error returned by `publish`; `None` means success
    pub publish_error: Option<PlatformError>,

    /// Error returned by `upload_media`; `None` means success
    pub upload_error: Option<PlatformError>,

    /// Delay before `publish` completes (simulates network latency)
    pub delay: Duration,

    pub character_limit: Option<usize>,

    /// Whether `upload_media` is available
    pub media_upload: bool,

    /// Number of times publish has been called
    pub publish_call_count: Arc<Mutex<usize>>,

    /// Content that was successfully published, in order
    pub posted_content: Arc<Mutex<Vec<String>>>,

    /// Preview passed along with each publish call
    pub previews: Arc<Mutex<Vec<Option<PreviewDescriptor>>>>,

    /// Media uploads received (source URL of each)
    pub uploads: Arc<Mutex<Vec<String>>>,
}

impl MockConfig {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            publish_error: None,
            upload_error: None,
            delay: Duration::from_millis(0),
            character_limit: None,
            media_upload: false,
            publish_call_count: Arc::new(Mutex::new(0)),
            posted_content: Arc::new(Mutex::new(Vec::new())),
            previews: Arc::new(Mutex::new(Vec::new())),
            uploads: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// Mock publisher for testing
#[derive(Debug, Clone)]
pub struct MockPublisher {
    config: MockConfig,
}

impl MockPublisher {
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// Create a mock publisher that always succeeds
    pub fn success(platform: Platform) -> Self {
        Self::new(MockConfig::new(platform))
    }

    /// Create a mock publisher whose publish call fails with `error`
    pub fn failure(platform: Platform, error: PlatformError) -> Self {
        Self::new(MockConfig {
            publish_error: Some(error),
            ..MockConfig::new(platform)
        })
    }

    /// Create a mock publisher that takes `delay` to publish
    pub fn with_delay(platform: Platform, delay: Duration) -> Self {
        Self::new(MockConfig {
            delay,
            ..MockConfig::new(platform)
        })
    }

    pub fn with_character_limit(mut self, limit: usize) -> Self {
        self.config.character_limit = Some(limit);
        self
    }

    /// Accept thumbnail uploads, optionally failing them
    pub fn with_media_upload(mut self, error: Option<PlatformError>) -> Self {
        self.config.media_upload = true;
        self.config.upload_error = error;
        self
    }

    pub fn publish_call_count(&self) -> usize {
        *self
            .config
            .publish_call_count
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn posted_content(&self) -> Vec<String> {
        self.config
            .posted_content
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn previews(&self) -> Vec<Option<PreviewDescriptor>> {
        self.config
            .previews
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn uploads(&self) -> Vec<String> {
        self.config
            .uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    fn platform(&self) -> Platform {
        self.config.platform
    }

    fn character_limit(&self) -> Option<usize> {
        self.config.character_limit
    }

    fn supports_media_upload(&self) -> bool {
        self.config.media_upload
    }

    fn supported_mime_types(&self) -> &[ImageMimeType] {
        if self.config.media_upload {
            &[ImageMimeType::Jpeg, ImageMimeType::Png, ImageMimeType::Gif]
        } else {
            &[]
        }
    }

    async fn upload_media(&self, media: &MediaPayload, _credential: &Credential) -> Result<String> {
        if !self.config.media_upload {
            return Err(PlatformError::UnsupportedMedia(media.mime_type.to_string()).into());
        }

        self.config
            .uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(media.source_url.clone());

        match &self.config.upload_error {
            Some(error) => Err(error.clone().into()),
            None => Ok(format!("mock-media-{}", uuid::Uuid::new_v4())),
        }
    }

    async fn publish(
        &self,
        content: &str,
        preview: Option<&PreviewDescriptor>,
        _credential: &Credential,
    ) -> Result<String> {
        *self
            .config
            .publish_call_count
            .lock()
            .unwrap_or_else(PoisonError::into_inner) += 1;
        self.config
            .previews
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(preview.cloned());

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        if let Some(error) = &self.config.publish_error {
            return Err(error.clone().into());
        }

        self.config
            .posted_content
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(content.to_string());

        Ok(format!("{}:mock-{}", self.config.platform, uuid::Uuid::new_v4()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SlotcastError;

    #[tokio::test]
    async fn test_mock_success() {
        let publisher = MockPublisher::success(Platform::LinkedIn);
        let credential = Credential::new("t");

        assert_eq!(publisher.platform(), Platform::LinkedIn);
        assert_eq!(publisher.character_limit(), None);

        let post_id = publisher.publish("Test content", None, &credential).await.unwrap();
        assert!(post_id.starts_with("linkedin:mock-"));
        assert_eq!(publisher.publish_call_count(), 1);
        assert_eq!(publisher.posted_content(), vec!["Test content"]);
        assert_eq!(publisher.previews(), vec![None]);
    }

    #[tokio::test]
    async fn test_mock_failure() {
        let publisher =
            MockPublisher::failure(Platform::Threads, PlatformError::Network("reset".into()));

        let result = publisher.publish("x", None, &Credential::new("t")).await;
        assert!(matches!(
            result,
            Err(SlotcastError::Platform(PlatformError::Network(_)))
        ));
        assert_eq!(publisher.publish_call_count(), 1);
        assert!(publisher.posted_content().is_empty());
    }

    #[tokio::test]
    async fn test_mock_with_delay() {
        let publisher = MockPublisher::with_delay(Platform::Threads, Duration::from_millis(50));

        let start = std::time::Instant::now();
        publisher.publish("x", None, &Credential::new("t")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_mock_clones_share_records() {
        let publisher = MockPublisher::success(Platform::Threads);
        let handle = publisher.clone();

        publisher.publish("shared", None, &Credential::new("t")).await.unwrap();
        assert_eq!(handle.publish_call_count(), 1);
        assert_eq!(handle.posted_content(), vec!["shared"]);
    }

    #[tokio::test]
    async fn test_mock_media_upload() {
        let media = MediaPayload {
            bytes: vec![0xFF, 0xD8],
            mime_type: ImageMimeType::Jpeg,
            source_url: "https://example.com/a.jpg".into(),
        };
        let credential = Credential::new("t");

        let without = MockPublisher::success(Platform::Threads);
        assert!(!without.supports_media_upload());
        assert!(without.upload_media(&media, &credential).await.is_err());

        let with = MockPublisher::success(Platform::LinkedIn).with_media_upload(None);
        assert!(with.supports_media_upload());
        let reference = with.upload_media(&media, &credential).await.unwrap();
        assert!(reference.starts_with("mock-media-"));
        assert_eq!(with.uploads(), vec!["https://example.com/a.jpg"]);

        let rejecting = MockPublisher::success(Platform::LinkedIn)
            .with_media_upload(Some(PlatformError::Validation("too big".into())));
        assert!(rejecting.upload_media(&media, &credential).await.is_err());
    }
}
