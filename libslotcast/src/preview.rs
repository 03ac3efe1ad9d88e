//! Link preview enrichment
//!
//! Turns the first link in a post into a [`PreviewDescriptor`]: the page is
//! fetched (bounded in time and size), its Open Graph metadata extracted,
//! and the thumbnail uploaded through the target publisher when the
//! platform accepts media.

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

use crate::config::PreviewConfig;
use crate::credentials::Credential;
use crate::error::{PreviewError, Result};
use crate::publishers::Publisher;
use crate::types::{ImageMimeType, MediaPayload, PreviewDescriptor, PreviewHint};

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"')\]]+"#).unwrap());

static META_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<meta\b[^>]*>").unwrap());

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
});

static TITLE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());

static ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|[A-Za-z]+);").unwrap());

/// Body of a bounded HTTP GET
#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    /// URL after redirects, used to resolve relative references
    pub final_url: String,
    /// The body was cut off at the size limit
    pub truncated: bool,
}

/// Bounded HTTP GET used by the enricher
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedResource>;
}

/// [`Fetcher`] backed by reqwest
pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpFetcher {
    pub fn new(config: &PreviewConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| PreviewError::FetchFailed {
                url: String::new(),
                reason: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            max_bytes: config.max_bytes,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedResource> {
        let failed = |reason: String| PreviewError::FetchFailed {
            url: url.to_string(),
            reason,
        };

        let parsed = reqwest::Url::parse(url).map_err(|e| failed(format!("invalid URL: {}", e)))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(failed(format!("unsupported scheme '{}'", parsed.scheme())).into());
        }

        let mut response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("HTTP {}", status.as_u16())).into());
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let final_url = response.url().to_string();

        let mut bytes = Vec::new();
        let mut truncated = false;
        while let Some(chunk) = response.chunk().await.map_err(|e| failed(e.to_string()))? {
            let room = self.max_bytes - bytes.len();
            if chunk.len() > room {
                bytes.extend_from_slice(&chunk[..room]);
                truncated = true;
                break;
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(FetchedResource {
            bytes,
            content_type,
            final_url,
            truncated,
        })
    }
}

/// Metadata found in a page head
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
}

/// First http(s) URL in `text`, without trailing sentence punctuation
pub fn extract_first_url(text: &str) -> Option<String> {
    URL_PATTERN
        .find(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']))
        .filter(|url| !url.is_empty())
        .map(str::to_string)
}

/// URL to preview for a post: the hinted one, else the first in the content
pub fn preview_url(content: &str, hint: Option<&PreviewHint>) -> Option<String> {
    hint.and_then(|h| h.url.clone())
        .filter(|url| !url.trim().is_empty())
        .or_else(|| extract_first_url(content))
}

/// Extract Open Graph metadata, falling back to `<title>` and the
/// `description` meta tag
pub fn parse_metadata(html: &str) -> PageMetadata {
    let mut og: HashMap<String, String> = HashMap::new();
    let mut description = None;

    for tag in META_TAG.find_iter(html) {
        let attributes = parse_attributes(tag.as_str());
        let Some(content) = attributes.get("content") else {
            continue;
        };

        if let Some(property) = attributes.get("property").or_else(|| attributes.get("name")) {
            let property = property.to_lowercase();
            if property.starts_with("og:") {
                og.entry(property).or_insert_with(|| content.clone());
            } else if property == "description" && description.is_none() {
                description = Some(content.clone());
            }
        }
    }

    let title = og.remove("og:title").or_else(|| {
        TITLE_TAG
            .captures(html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    });

    PageMetadata {
        title: title.map(|t| clean_text(&t)).filter(|t| !t.is_empty()),
        description: og
            .remove("og:description")
            .or(description)
            .map(|d| clean_text(&d))
            .filter(|d| !d.is_empty()),
        image: og
            .remove("og:image")
            .map(|i| decode_entities(i.trim()))
            .filter(|i| !i.is_empty()),
    }
}

fn parse_attributes(tag: &str) -> HashMap<String, String> {
    ATTRIBUTE
        .captures_iter(tag)
        .filter_map(|c| {
            let name = c.get(1)?.as_str().to_lowercase();
            let value = c.get(2).or_else(|| c.get(3))?.as_str().to_string();
            Some((name, value))
        })
        .collect()
}

fn clean_text(s: &str) -> String {
    decode_entities(&s.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Decode the named entities that show up in titles plus numeric references
pub fn decode_entities(s: &str) -> String {
    ENTITY
        .replace_all(s, |caps: &regex::Captures| {
            let entity = &caps[1];
            let decoded = if let Some(hex) = entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = entity.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match entity {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some(' '),
                    _ => None,
                }
            };
            decoded
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Builds preview descriptors for links in posts
pub struct LinkPreviewEnricher {
    fetcher: Arc<dyn Fetcher>,
}

impl LinkPreviewEnricher {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }

    /// Enricher over [`HttpFetcher`], or `None` when previews are disabled
    pub fn from_config(config: &PreviewConfig) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        Ok(Some(Self::new(Arc::new(HttpFetcher::new(config)?))))
    }

    /// Fetch `url` and build its preview for `publisher`'s platform
    ///
    /// `hint_title` stands in when the page has no title of its own. A
    /// thumbnail that cannot be downloaded, is too large or is of a type the
    /// platform does not accept is left out; one the platform rejects fails
    /// the enrichment.
    ///
    /// # Errors
    ///
    /// - `PreviewError::FetchFailed` if the page cannot be retrieved
    /// - `PreviewError::NoMetadata` if neither page nor hint supplies a title
    /// - `PreviewError::MediaUploadFailed` if the thumbnail upload is rejected
    pub async fn enrich(
        &self,
        url: &str,
        hint_title: Option<&str>,
        publisher: &dyn Publisher,
        credential: &Credential,
    ) -> Result<PreviewDescriptor> {
        let page = self.fetcher.fetch(url).await?;
        let html = String::from_utf8_lossy(&page.bytes);
        let metadata = parse_metadata(&html);

        let title = metadata
            .title
            .or_else(|| hint_title.map(str::to_string).filter(|t| !t.trim().is_empty()))
            .ok_or_else(|| PreviewError::NoMetadata(url.to_string()))?;

        let thumbnail = match metadata.image {
            Some(image) if publisher.supports_media_upload() => {
                self.upload_thumbnail(&page.final_url, &image, publisher, credential)
                    .await?
            }
            _ => None,
        };

        debug!(
            platform = %publisher.platform(),
            url,
            has_thumbnail = thumbnail.is_some(),
            "Built link preview"
        );

        Ok(PreviewDescriptor {
            source_url: url.to_string(),
            title,
            description: metadata.description,
            thumbnail,
        })
    }

    async fn upload_thumbnail(
        &self,
        page_url: &str,
        image: &str,
        publisher: &dyn Publisher,
        credential: &Credential,
    ) -> Result<Option<String>> {
        let image_url = match reqwest::Url::parse(page_url).and_then(|base| base.join(image)) {
            Ok(resolved) => resolved.to_string(),
            Err(e) => {
                debug!(image, error = %e, "Unresolvable thumbnail URL");
                return Ok(None);
            }
        };

        let fetched = match self.fetcher.fetch(&image_url).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(image_url = %image_url, error = %e, "Thumbnail download failed, continuing without it");
                return Ok(None);
            }
        };

        if fetched.truncated {
            debug!(image_url = %image_url, "Thumbnail exceeds size limit, skipping");
            return Ok(None);
        }

        let mime_type = fetched
            .content_type
            .as_deref()
            .and_then(ImageMimeType::from_mime_str)
            .or_else(|| mime_from_url(&image_url));
        let mime_type = match mime_type {
            Some(m) if publisher.supported_mime_types().contains(&m) => m,
            other => {
                debug!(image_url = %image_url, mime = ?other, "Thumbnail type not accepted, skipping");
                return Ok(None);
            }
        };

        let media = MediaPayload {
            bytes: fetched.bytes,
            mime_type,
            source_url: image_url,
        };

        let reference = publisher
            .upload_media(&media, credential)
            .await
            .map_err(|e| PreviewError::MediaUploadFailed(e.to_string()))?;
        Ok(Some(reference))
    }
}

fn mime_from_url(url: &str) -> Option<ImageMimeType> {
    let path = reqwest::Url::parse(url).ok()?.path().to_string();
    let ext = path.rsplit_once('.')?.1;
    ImageMimeType::from_extension(ext)
}
