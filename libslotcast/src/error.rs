//! Error types for Slotcast

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Platform;

pub type Result<T> = std::result::Result<T, SlotcastError>;

#[derive(Error, Debug)]
pub enum SlotcastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Scheduling error: {0}")]
    Scheduling(#[from] SchedulingError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Link preview error: {0}")]
    Preview(#[from] PreviewError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl SlotcastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            SlotcastError::InvalidInput(_) => 3,
            SlotcastError::State(_) => 3,
            SlotcastError::Config(_) => 2,
            SlotcastError::Database(_) => 2,
            SlotcastError::Platform(_) => 1,
            SlotcastError::Scheduling(_) => 1,
            SlotcastError::Preview(_) => 1,
        }
    }

    /// Classify the error into the kind recorded on failed entries
    pub fn kind(&self) -> ErrorKind {
        match self {
            SlotcastError::Config(_) => ErrorKind::Config,
            SlotcastError::Database(_) => ErrorKind::Internal,
            SlotcastError::Platform(e) => e.kind(),
            SlotcastError::Scheduling(_) => ErrorKind::CapacityExhausted,
            SlotcastError::State(_) => ErrorKind::State,
            SlotcastError::Preview(PreviewError::FetchFailed { .. }) => ErrorKind::Network,
            SlotcastError::Preview(_) => ErrorKind::Content,
            SlotcastError::InvalidInput(_) => ErrorKind::Content,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("No enabled time slots configured for {0}")]
    NoSlotsConfigured(Platform),

    #[error("An enabled {platform} slot already exists for {recurrence} at {time}")]
    DuplicateSlot {
        platform: Platform,
        recurrence: String,
        time: String,
    },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Content exceeds the {limit} character limit ({actual} characters)")]
    ContentTooLong { limit: usize, actual: usize },

    #[error("Unsupported media: {0}")]
    UnsupportedMedia(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Posting failed: {0}")]
    Posting(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),
}

impl PlatformError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlatformError::Authentication(_) => ErrorKind::Auth,
            PlatformError::ContentTooLong { .. }
            | PlatformError::UnsupportedMedia(_)
            | PlatformError::Validation(_) => ErrorKind::Content,
            PlatformError::Posting(_) => ErrorKind::Rejected,
            PlatformError::Network(_) => ErrorKind::Network,
            PlatformError::RateLimit(_) => ErrorKind::RateLimited,
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum SchedulingError {
    #[error("No free {platform} slot within {horizon_days} days")]
    CapacityExhausted { platform: Platform, horizon_days: i64 },
}

#[derive(Error, Debug, Clone)]
pub enum StateError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Cannot {action} entry {id}: it is {status}")]
    InvalidTransition {
        id: String,
        status: String,
        action: &'static str,
    },

    #[error("Entry {0} is already being published")]
    AlreadyInFlight(String),

    #[error("Position {requested} is outside the pending range {first}..={last}")]
    PositionOutOfRange { requested: i64, first: i64, last: i64 },
}

#[derive(Error, Debug, Clone)]
pub enum PreviewError {
    #[error("Failed to fetch {url}: {reason}")]
    FetchFailed { url: String, reason: String },

    #[error("No preview metadata found at {0}")]
    NoMetadata(String),

    #[error("Thumbnail upload failed: {0}")]
    MediaUploadFailed(String),
}

/// Failure classification persisted on entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Auth,
    Content,
    Network,
    RateLimited,
    Rejected,
    State,
    CapacityExhausted,
    Interrupted,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Auth => "auth",
            ErrorKind::Content => "content",
            ErrorKind::Network => "network",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Rejected => "rejected",
            ErrorKind::State => "state",
            ErrorKind::CapacityExhausted => "capacity_exhausted",
            ErrorKind::Interrupted => "interrupted",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "config" => Ok(ErrorKind::Config),
            "auth" => Ok(ErrorKind::Auth),
            "content" => Ok(ErrorKind::Content),
            "network" => Ok(ErrorKind::Network),
            "rate_limited" => Ok(ErrorKind::RateLimited),
            "rejected" => Ok(ErrorKind::Rejected),
            "state" => Ok(ErrorKind::State),
            "capacity_exhausted" => Ok(ErrorKind::CapacityExhausted),
            "interrupted" => Ok(ErrorKind::Interrupted),
            "internal" => Ok(ErrorKind::Internal),
            other => Err(format!("unknown error kind: {}", other)),
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_invalid_input() {
        let error = SlotcastError::InvalidInput("Empty content".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_state_error() {
        let error = SlotcastError::State(StateError::AlreadyInFlight("abc".to_string()));
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_config_error() {
        let error = SlotcastError::Config(ConfigError::NoSlotsConfigured(Platform::LinkedIn));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_platform_error() {
        let error = SlotcastError::Platform(PlatformError::Network("timeout".to_string()));
        assert_eq!(error.exit_code(), 1);
    }

    #[test]
    fn test_error_message_formatting_no_slots() {
        let error = SlotcastError::Config(ConfigError::NoSlotsConfigured(Platform::Threads));
        assert_eq!(
            error.to_string(),
            "Configuration error: No enabled time slots configured for threads"
        );
    }

    #[test]
    fn test_error_message_formatting_content_too_long() {
        let error = PlatformError::ContentTooLong {
            limit: 500,
            actual: 612,
        };
        assert_eq!(
            error.to_string(),
            "Content exceeds the 500 character limit (612 characters)"
        );
    }

    #[test]
    fn test_platform_error_kinds() {
        assert_eq!(
            PlatformError::Authentication("expired".into()).kind(),
            ErrorKind::Auth
        );
        assert_eq!(
            PlatformError::UnsupportedMedia("image/bmp".into()).kind(),
            ErrorKind::Content
        );
        assert_eq!(
            PlatformError::Network("reset".into()).kind(),
            ErrorKind::Network
        );
        assert_eq!(
            PlatformError::RateLimit("slow down".into()).kind(),
            ErrorKind::RateLimited
        );
        assert_eq!(
            PlatformError::Posting("duplicate".into()).kind(),
            ErrorKind::Rejected
        );
    }

    #[test]
    fn test_slotcast_error_kind_passes_through_platform() {
        let error: SlotcastError = PlatformError::Network("timed out".into()).into();
        assert_eq!(error.kind(), ErrorKind::Network);

        let error: SlotcastError = SchedulingError::CapacityExhausted {
            platform: Platform::LinkedIn,
            horizon_days: 365,
        }
        .into();
        assert_eq!(error.kind(), ErrorKind::CapacityExhausted);
    }

    #[test]
    fn test_error_kind_string_round_trip() {
        for kind in [
            ErrorKind::Config,
            ErrorKind::Auth,
            ErrorKind::Content,
            ErrorKind::Network,
            ErrorKind::RateLimited,
            ErrorKind::Rejected,
            ErrorKind::State,
            ErrorKind::CapacityExhausted,
            ErrorKind::Interrupted,
            ErrorKind::Internal,
        ] {
            assert_eq!(kind.as_str().parse::<ErrorKind>().unwrap(), kind);
        }
        assert!("bogus".parse::<ErrorKind>().is_err());
    }

    #[test]
    fn test_error_message_formatting_invalid_transition() {
        let error = StateError::InvalidTransition {
            id: "abc".to_string(),
            status: "posted".to_string(),
            action: "reorder",
        };
        assert_eq!(error.to_string(), "Cannot reorder entry abc: it is posted");
    }

    #[test]
    fn test_error_conversion_from_state_error() {
        let error: SlotcastError = StateError::NotFound("x".to_string()).into();
        match error {
            SlotcastError::State(StateError::NotFound(id)) => assert_eq!(id, "x"),
            _ => panic!("Expected SlotcastError::State"),
        }
    }
}
