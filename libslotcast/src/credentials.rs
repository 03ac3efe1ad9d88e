//! Access credentials for platform publishers
//!
//! Token acquisition and refresh belong to an outside collaborator; this
//! module only asks for a currently valid token at publish time. Tokens are
//! held as [`SecretString`] so they are zeroed on drop and never show up in
//! `Debug` output.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;

use crate::config::Config;
use crate::error::{PlatformError, Result};
use crate::types::Platform;

/// A token a publisher can authenticate with
#[derive(Debug)]
pub struct Credential {
    pub access_token: SecretString,
    /// Account the token belongs to, when the platform needs it (e.g. an author URN)
    pub account: Option<String>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            account: None,
        }
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token.expose_secret())
    }
}

/// Source of credentials, consulted on every publish attempt
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Return a currently valid credential or an `Authentication` error
    async fn credential_for(&self, platform: Platform) -> Result<Credential>;
}

/// Reads each platform's token file named in the configuration
///
/// The file is re-read on every call so an external refresher can rotate
/// tokens without restarting the daemon.
pub struct TokenFileCredentials {
    token_files: HashMap<Platform, (String, Option<String>)>,
}

impl TokenFileCredentials {
    pub fn from_config(config: &Config) -> Self {
        let mut token_files = HashMap::new();

        if let Some(linkedin) = config.linkedin.as_ref().filter(|c| c.enabled) {
            token_files.insert(
                Platform::LinkedIn,
                (linkedin.token_file.clone(), linkedin.author_urn.clone()),
            );
        }
        if let Some(threads) = config.threads.as_ref().filter(|c| c.enabled) {
            token_files.insert(Platform::Threads, (threads.token_file.clone(), None));
        }

        Self { token_files }
    }
}

#[async_trait]
impl CredentialProvider for TokenFileCredentials {
    async fn credential_for(&self, platform: Platform) -> Result<Credential> {
        let (path, account) = self.token_files.get(&platform).ok_or_else(|| {
            PlatformError::Authentication(format!("{} is not configured", platform))
        })?;

        let expanded = shellexpand::tilde(path).to_string();
        let token = tokio::fs::read_to_string(&expanded).await.map_err(|e| {
            PlatformError::Authentication(format!(
                "Failed to read {} token file {}: {}",
                platform, expanded, e
            ))
        })?;

        let token = token.trim();
        if token.is_empty() {
            return Err(PlatformError::Authentication(format!(
                "{} token file {} is empty",
                platform, expanded
            ))
            .into());
        }

        let mut credential = Credential::new(token);
        credential.account = account.clone();
        Ok(credential)
    }
}

/// Fixed tokens, for tests and dry runs
#[derive(Default)]
pub struct StaticCredentials {
    tokens: HashMap<Platform, (String, Option<String>)>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, platform: Platform, token: &str) -> Self {
        self.tokens.insert(platform, (token.to_string(), None));
        self
    }

    pub fn with_account(mut self, platform: Platform, token: &str, account: &str) -> Self {
        self.tokens
            .insert(platform, (token.to_string(), Some(account.to_string())));
        self
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credential_for(&self, platform: Platform) -> Result<Credential> {
        let (token, account) = self.tokens.get(&platform).ok_or_else(|| {
            PlatformError::Authentication(format!("No credential for {}", platform))
        })?;

        let mut credential = Credential::new(token.clone());
        credential.account = account.clone();
        Ok(credential)
    }
}
