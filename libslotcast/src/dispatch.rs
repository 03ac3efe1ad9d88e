//! Dispatch loop
//!
//! Each cycle walks every configured platform's due entries in position
//! order: claim, enrich, publish, record. Platforms run concurrently;
//! within a platform one entry resolves before the next is claimed. The
//! platform lock is held only for the claim and record steps, never across
//! the network calls.

use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::credentials::{Credential, CredentialProvider};
use crate::error::{ErrorKind, Result, SlotcastError};
use crate::preview::{preview_url, LinkPreviewEnricher};
use crate::publishers::{Publisher, Publishers};
use crate::scheduler::{PublishOutcome, Scheduler};
use crate::service::events::{Event, EventBus};
use crate::types::{Failure, Platform, PostEntry, PostStatus, PreviewDescriptor};

const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_PREVIEW_TIMEOUT: Duration = Duration::from_secs(30);

/// Counts from one dispatch cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub posted: usize,
    pub failed: usize,
}

impl CycleReport {
    pub fn total(&self) -> usize {
        self.posted + self.failed
    }

    fn merge(&mut self, other: CycleReport) {
        self.posted += other.posted;
        self.failed += other.failed;
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    scheduler: Scheduler,
    publishers: Publishers,
    credentials: Arc<dyn CredentialProvider>,
    enricher: Option<Arc<LinkPreviewEnricher>>,
    publish_timeout: Duration,
    preview_timeout: Duration,
    events: EventBus,
}

impl Dispatcher {
    pub fn new(
        scheduler: Scheduler,
        publishers: Publishers,
        credentials: Arc<dyn CredentialProvider>,
        events: EventBus,
    ) -> Self {
        Self {
            scheduler,
            publishers,
            credentials,
            enricher: None,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            preview_timeout: DEFAULT_PREVIEW_TIMEOUT,
            events,
        }
    }

    pub fn with_enricher(mut self, enricher: LinkPreviewEnricher) -> Self {
        self.enricher = Some(Arc::new(enricher));
        self
    }

    pub fn with_publish_timeout(mut self, publish_timeout: Duration) -> Self {
        self.publish_timeout = publish_timeout;
        self
    }

    pub fn with_preview_timeout(mut self, preview_timeout: Duration) -> Self {
        self.preview_timeout = preview_timeout;
        self
    }

    /// Publish every entry due at `now` on every configured platform
    ///
    /// Failed publishes are recorded on their entries and counted; only
    /// store errors are returned, after every platform has had its turn.
    pub async fn run_cycle(&self, now: i64) -> Result<CycleReport> {
        let platforms = self.publishers.platforms();
        let results = join_all(
            platforms
                .iter()
                .map(|&platform| self.dispatch_platform(platform, now)),
        )
        .await;

        let mut report = CycleReport::default();
        let mut first_error = None;
        for (platform, result) in platforms.into_iter().zip(results) {
            match result {
                Ok(platform_report) => report.merge(platform_report),
                Err(e) => {
                    error!(platform = %platform, error = %e, "Dispatch cycle failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    async fn dispatch_platform(&self, platform: Platform, now: i64) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        while let Some(entry) = self.scheduler.claim_next_due(platform, now).await? {
            let resolved = self.publish_claimed(entry).await?;
            match resolved.status {
                PostStatus::Posted => report.posted += 1,
                _ => report.failed += 1,
            }
        }

        if report.total() > 0 {
            info!(
                platform = %platform,
                posted = report.posted,
                failed = report.failed,
                "Dispatched due entries"
            );
        }
        Ok(report)
    }

    /// Publish an entry already claimed (InFlight) and record the outcome
    ///
    /// Publish failures never surface as `Err`; they come back as a Failed
    /// entry. No retry is attempted.
    pub async fn publish_claimed(&self, entry: PostEntry) -> Result<PostEntry> {
        let outcome = self.attempt(&entry).await;
        let resolved = self
            .scheduler
            .record_outcome(&entry, outcome, chrono::Utc::now().timestamp())
            .await?;

        match (&resolved.status, &resolved.failure) {
            (PostStatus::Posted, _) => {
                let post_id = resolved.platform_post_id.clone().unwrap_or_default();
                info!(
                    platform = %resolved.platform,
                    entry_id = %resolved.id,
                    post_id = %post_id,
                    "Posted entry"
                );
                self.events.emit(Event::Published {
                    entry_id: resolved.id.clone(),
                    platform: resolved.platform,
                    post_id,
                });
            }
            (_, Some(failure)) => {
                warn!(
                    platform = %resolved.platform,
                    entry_id = %resolved.id,
                    kind = %failure.kind,
                    error = %failure.message,
                    "Publish failed"
                );
                self.events.emit(Event::Failed {
                    entry_id: resolved.id.clone(),
                    platform: resolved.platform,
                    kind: failure.kind,
                    message: failure.message.clone(),
                });
            }
            _ => {}
        }

        Ok(resolved)
    }

    async fn attempt(&self, entry: &PostEntry) -> PublishOutcome {
        let publisher = match self.publishers.get(entry.platform) {
            Some(publisher) => publisher,
            None => {
                return failed(
                    Failure {
                        kind: ErrorKind::Config,
                        message: format!("No publisher configured for {}", entry.platform),
                    },
                    None,
                )
            }
        };

        let credential = match self.credentials.credential_for(entry.platform).await {
            Ok(credential) => credential,
            Err(e) => return failed(failure_from(&e), None),
        };

        if let Err(e) = publisher.validate_content(&entry.content) {
            return failed(failure_from(&e), None);
        }

        let preview = self.enrich(entry, publisher.as_ref(), &credential).await;

        debug!(platform = %entry.platform, entry_id = %entry.id, "Publishing entry");
        match timeout(
            self.publish_timeout,
            publisher.publish(&entry.content, preview.as_ref(), &credential),
        )
        .await
        {
            Ok(Ok(post_id)) => PublishOutcome::Posted { post_id, preview },
            Ok(Err(e)) => failed(failure_from(&e), preview),
            Err(_) => failed(
                Failure {
                    kind: ErrorKind::Network,
                    message: format!(
                        "Publish timed out after {}",
                        humanize(self.publish_timeout)
                    ),
                },
                preview,
            ),
        }
    }

    /// Build a link preview, or `None` when there is nothing to preview or
    /// enrichment fails
    async fn enrich(
        &self,
        entry: &PostEntry,
        publisher: &dyn Publisher,
        credential: &Credential,
    ) -> Option<PreviewDescriptor> {
        let enricher = self.enricher.as_ref()?;
        let url = preview_url(&entry.content, entry.preview_hint.as_ref())?;
        let hint_title = entry.preview_hint.as_ref().and_then(|h| h.title.as_deref());

        let reason = match timeout(
            self.preview_timeout,
            enricher.enrich(&url, hint_title, publisher, credential),
        )
        .await
        {
            Ok(Ok(preview)) => return Some(preview),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("Link preview timed out after {}", humanize(self.preview_timeout)),
        };

        warn!(
            platform = %entry.platform,
            entry_id = %entry.id,
            url = %url,
            reason = %reason,
            "Link preview failed, publishing without it"
        );
        self.events.emit(Event::PreviewDegraded {
            entry_id: entry.id.clone(),
            platform: entry.platform,
            reason,
        });
        None
    }

    /// Return abandoned in-flight entries to their queues and announce them
    pub async fn recover_interrupted(&self, now: i64) -> Result<Vec<PostEntry>> {
        let recovered = self.scheduler.recover_interrupted(now).await?;
        for entry in &recovered {
            self.events.emit(Event::Recovered {
                entry_id: entry.id.clone(),
                platform: entry.platform,
                attempt_count: entry.attempt_count,
            });
        }
        Ok(recovered)
    }

    /// Run cycles every `poll_interval` until `shutdown` is set
    ///
    /// Each cycle first reclaims in-flight entries whose claim has expired,
    /// such as a `post now` whose process died. A failed cycle is logged and
    /// the loop carries on. Shutdown is checked every second while sleeping
    /// and between cycles, never mid-publish.
    pub async fn run(&self, poll_interval: Duration, shutdown: Arc<AtomicBool>) {
        let poll_secs = poll_interval.as_secs().max(1);

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("Shutdown requested, stopping dispatch loop");
                break;
            }

            let now = chrono::Utc::now().timestamp();
            if let Err(e) = self.recover_interrupted(now).await {
                error!("Error recovering interrupted entries: {}", e);
            }
            if let Err(e) = self.run_cycle(now).await {
                error!("Error dispatching due entries: {}", e);
            }

            for _ in 0..poll_secs {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

fn failed(failure: Failure, preview: Option<PreviewDescriptor>) -> PublishOutcome {
    PublishOutcome::Failed { failure, preview }
}

fn failure_from(error: &SlotcastError) -> Failure {
    Failure {
        kind: error.kind(),
        message: error.to_string(),
    }
}

fn humanize(duration: Duration) -> String {
    humantime::format_duration(duration).to_string()
}
