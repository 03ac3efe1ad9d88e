//! Core types for Slotcast

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;

/// Target platforms a queue can publish to
///
/// Each platform owns an independent Pending sequence; entries for different
/// platforms never share positions or slot occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    LinkedIn,
    Threads,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::LinkedIn, Platform::Threads];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::LinkedIn => "linkedin",
            Platform::Threads => "threads",
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "linkedin" => Ok(Platform::LinkedIn),
            "threads" => Ok(Platform::Threads),
            other => Err(format!(
                "Unsupported platform: '{}'. Valid options: linkedin, threads",
                other
            )),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a queue entry
///
/// `Pending -> InFlight -> Posted | Failed`, `Pending -> Cancelled`.
/// An interrupted `InFlight` entry goes back to `Pending` at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Pending,
    InFlight,
    Posted,
    Failed,
    Cancelled,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Pending => "pending",
            PostStatus::InFlight => "in_flight",
            PostStatus::Posted => "posted",
            PostStatus::Failed => "failed",
            PostStatus::Cancelled => "cancelled",
        }
    }

    /// Posted, Failed and Cancelled entries are history and never change again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PostStatus::Posted | PostStatus::Failed | PostStatus::Cancelled
        )
    }
}

impl std::str::FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(PostStatus::Pending),
            "in_flight" | "in-flight" => Ok(PostStatus::InFlight),
            "posted" => Ok(PostStatus::Posted),
            "failed" => Ok(PostStatus::Failed),
            "cancelled" | "canceled" => Ok(PostStatus::Cancelled),
            other => Err(format!(
                "Invalid status: '{}'. Valid options: pending, in_flight, posted, failed, cancelled",
                other
            )),
        }
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the last attempt on an entry did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

/// Caller-supplied hints for link preview enrichment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewHint {
    /// Link to preview instead of the first URL found in the content
    pub url: Option<String>,
    /// Title to use when the page carries no title metadata
    pub title: Option<String>,
}

/// Page metadata plus an uploaded thumbnail, attached to an entry at publish time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewDescriptor {
    pub source_url: String,
    pub title: String,
    pub description: Option<String>,
    /// Platform media id of the uploaded thumbnail (e.g. `urn:li:image:...`)
    pub thumbnail: Option<String>,
}

/// One post in a platform queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostEntry {
    pub id: String,
    pub platform: Platform,
    pub content: String,
    pub preview_hint: Option<PreviewHint>,
    pub preview: Option<PreviewDescriptor>,
    pub status: PostStatus,
    pub scheduled_at: i64,
    pub position: i64,
    pub created_at: i64,
    pub posted_at: Option<i64>,
    pub platform_post_id: Option<String>,
    pub failure: Option<Failure>,
    pub attempt_count: i64,
    pub idempotency_key: Option<String>,
    pub requeued_from: Option<String>,
}

impl PostEntry {
    /// Create a new pending entry with auto-generated ID and timestamp
    pub fn new_pending(
        platform: Platform,
        content: String,
        scheduled_at: i64,
        position: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            platform,
            content,
            preview_hint: None,
            preview: None,
            status: PostStatus::Pending,
            scheduled_at,
            position,
            created_at: chrono::Utc::now().timestamp(),
            posted_at: None,
            platform_post_id: None,
            failure: None,
            attempt_count: 0,
            idempotency_key: None,
            requeued_from: None,
        }
    }
}

// ============================================================================
// Media Types
// ============================================================================

/// Supported image MIME types for preview thumbnails
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ImageMimeType {
    Jpeg,
    Png,
    Gif,
    WebP,
}

impl ImageMimeType {
    /// Parse MIME type from a Content-Type value (e.g., "image/jpeg; charset=binary")
    pub fn from_mime_str(s: &str) -> Option<Self> {
        let essence = s.split(';').next().unwrap_or("").trim().to_lowercase();
        match essence.as_str() {
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::WebP),
            _ => None,
        }
    }

    /// Detect MIME type from a URL or file path extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::WebP),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::WebP => "image/webp",
        }
    }
}

impl std::fmt::Display for ImageMimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Raw image bytes ready for a platform media endpoint
#[derive(Debug, Clone)]
pub struct MediaPayload {
    pub bytes: Vec<u8>,
    pub mime_type: ImageMimeType,
    pub source_url: String,
}
