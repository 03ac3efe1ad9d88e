//! Service layer for Slotcast
//!
//! `QueueService` is the single entry point the binaries (and any other
//! surface) use. It wires the shared database into the slot registry, the
//! scheduler and the dispatch loop, stamps operations with the current
//! time and announces what happened on the [`EventBus`].
//!
//! # Example
//!
//! ```no_run
//! use libslotcast::scheduler::EnqueueRequest;
//! use libslotcast::service::QueueService;
//! use libslotcast::Platform;
//!
//! # async fn example() -> libslotcast::Result<()> {
//! let service = QueueService::new().await?;
//!
//! let entry = service
//!     .enqueue(EnqueueRequest::new(Platform::LinkedIn, "Shipping today!"))
//!     .await?;
//! println!("Queued {} for {}", entry.id, entry.scheduled_at);
//! # Ok(())
//! # }
//! ```

pub mod events;

use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use self::events::{Event, EventBus, EventReceiver};
use crate::credentials::{CredentialProvider, TokenFileCredentials};
use crate::dispatch::{CycleReport, Dispatcher};
use crate::error::{Result, StateError};
use crate::preview::LinkPreviewEnricher;
use crate::publishers::Publishers;
use crate::scheduler::{EnqueueRequest, PlatformLocks, QueueEdge, Scheduler};
use crate::slots::{NewSlot, SlotRegistry, SlotUpdate, TimeSlot};
use crate::types::{Platform, PostEntry, PostStatus};
use crate::{Config, Database};

/// Per-platform queue summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformStats {
    pub platform: Platform,
    pub pending: i64,
    pub in_flight: i64,
    pub posted: i64,
    pub failed: i64,
    pub cancelled: i64,
    /// Earliest scheduled time among pending entries
    pub next_scheduled: Option<i64>,
    pub enabled_slots: usize,
    pub daily_limit: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub platforms: Vec<PlatformStats>,
}

impl QueueStats {
    pub fn total(&self, status: PostStatus) -> i64 {
        self.platforms
            .iter()
            .map(|p| match status {
                PostStatus::Pending => p.pending,
                PostStatus::InFlight => p.in_flight,
                PostStatus::Posted => p.posted,
                PostStatus::Failed => p.failed,
                PostStatus::Cancelled => p.cancelled,
            })
            .sum()
    }
}

/// Main service facade
///
/// All parts share one `Arc<Database>` and one set of platform locks, so a
/// service embedded in the daemon and another in the CLI still serialise
/// through the database's compare-and-set claim.
pub struct QueueService {
    db: Arc<Database>,
    config: Arc<Config>,
    scheduler: Scheduler,
    publishers: Publishers,
    dispatcher: Dispatcher,
    event_bus: EventBus,
}

impl QueueService {
    /// Create a service from the default configuration file
    pub async fn new() -> Result<Self> {
        let config = Config::load()?;
        Self::from_config(config).await
    }

    /// Create a service with real publishers and token-file credentials
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated, or the
    /// configuration holds an invalid UTC offset.
    pub async fn from_config(config: Config) -> Result<Self> {
        let db = Arc::new(Database::new(&config.database.path).await?);
        let publishers = Publishers::from_config(&config)?;
        let credentials = Arc::new(TokenFileCredentials::from_config(&config));
        Self::from_parts(config, db, publishers, credentials)
    }

    /// Assemble a service from explicit parts (tests, dry runs)
    pub fn from_parts(
        config: Config,
        db: Arc<Database>,
        publishers: Publishers,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        let registry = SlotRegistry::new(Arc::clone(&db), &config.scheduling)?;
        let scheduler = Scheduler::new(Arc::clone(&db), registry, PlatformLocks::new())
            .with_claim_expiry(config.claim_expiry());
        let event_bus = EventBus::default();

        let mut dispatcher = Dispatcher::new(
            scheduler.clone(),
            publishers.clone(),
            credentials,
            event_bus.clone(),
        )
        .with_publish_timeout(config.scheduling.publish_timeout())
        .with_preview_timeout(config.preview.enrich_timeout());
        if let Some(enricher) = LinkPreviewEnricher::from_config(&config.preview)? {
            dispatcher = dispatcher.with_enricher(enricher);
        }

        Ok(Self {
            db,
            config: Arc::new(config),
            scheduler,
            publishers,
            dispatcher,
            event_bus,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn registry(&self) -> &SlotRegistry {
        self.scheduler.registry()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Subscribe to queue events
    pub fn subscribe(&self) -> EventReceiver {
        self.event_bus.subscribe()
    }

    // ------------------------------------------------------------------
    // Queue
    // ------------------------------------------------------------------

    /// Add content to its platform queue at the next free slot
    ///
    /// Content is checked against the platform's rules first when a
    /// publisher is configured, so an entry that can never be published is
    /// rejected up front.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<PostEntry> {
        self.enqueue_at(request, now()).await
    }

    pub async fn enqueue_at(&self, request: EnqueueRequest, now: i64) -> Result<PostEntry> {
        if let Some(publisher) = self.publishers.get(request.platform) {
            publisher.validate_content(&request.content)?;
        }

        let entry = self.scheduler.enqueue(request, now).await?;
        self.event_bus.emit(Event::Enqueued {
            entry_id: entry.id.clone(),
            platform: entry.platform,
            scheduled_at: entry.scheduled_at,
            position: entry.position,
        });
        Ok(entry)
    }

    pub async fn list_queue(
        &self,
        platform: Option<Platform>,
        status: Option<PostStatus>,
    ) -> Result<Vec<PostEntry>> {
        self.db.list_entries(platform, status).await
    }

    pub async fn get(&self, id: &str) -> Result<PostEntry> {
        self.db
            .get_entry(id)
            .await?
            .ok_or_else(|| StateError::NotFound(id.to_string()).into())
    }

    /// Publish a pending entry immediately and pull the rest forward
    ///
    /// Returns the resolved entry; a failed publish is reported through its
    /// status, not as an error.
    pub async fn post_now(&self, id: &str) -> Result<PostEntry> {
        let entry = self.scheduler.promote(id, now()).await?;
        let platform = entry.platform;
        let resolved = self.dispatcher.publish_claimed(entry).await?;
        self.announce_redistribution(platform).await?;
        Ok(resolved)
    }

    /// Move a pending entry to an absolute queue position
    pub async fn reorder(&self, id: &str, position: i64) -> Result<Vec<PostEntry>> {
        let entries = self.scheduler.reorder(id, position, now()).await?;
        if let Some(first) = entries.first() {
            self.event_bus.emit(Event::Redistributed {
                platform: first.platform,
                pending: entries.len(),
            });
        }
        Ok(entries)
    }

    /// Move entries to the head or tail of their queues
    pub async fn move_to_edge(&self, ids: &[String], edge: QueueEdge) -> Result<usize> {
        let platforms = self.platforms_of(ids).await?;
        let moved = self.scheduler.move_to_edge(ids, edge, now()).await?;
        for platform in platforms {
            self.announce_redistribution(platform).await?;
        }
        Ok(moved)
    }

    /// Cancel pending entries; unknown and finished ids are skipped
    pub async fn cancel(&self, ids: &[String]) -> Result<usize> {
        let platforms = self.platforms_of(ids).await?;
        let cancelled = self.scheduler.cancel(ids, now()).await?;
        for platform in platforms {
            self.announce_redistribution(platform).await?;
        }
        Ok(cancelled)
    }

    pub async fn cancel_all(&self, platform: Option<Platform>) -> Result<usize> {
        self.scheduler.cancel_all(platform).await
    }

    /// Queue a fresh copy of a finished entry
    pub async fn requeue(&self, id: &str) -> Result<PostEntry> {
        let entry = self.scheduler.requeue(id, now()).await?;
        self.event_bus.emit(Event::Enqueued {
            entry_id: entry.id.clone(),
            platform: entry.platform,
            scheduled_at: entry.scheduled_at,
            position: entry.position,
        });
        Ok(entry)
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let counts = self.db.status_counts().await?;
        let next = self.scheduler.next_scheduled().await?;

        let mut platforms = Vec::with_capacity(Platform::ALL.len());
        for platform in Platform::ALL {
            let mut stats = PlatformStats {
                platform,
                pending: 0,
                in_flight: 0,
                posted: 0,
                failed: 0,
                cancelled: 0,
                next_scheduled: next.get(&platform).copied(),
                enabled_slots: self
                    .registry()
                    .list_slots(Some(platform))
                    .await?
                    .iter()
                    .filter(|s| s.enabled)
                    .count(),
                daily_limit: self.registry().daily_limit(platform).await?,
            };
            for (_, status, n) in counts.iter().filter(|(p, _, _)| *p == platform) {
                match status {
                    PostStatus::Pending => stats.pending = *n,
                    PostStatus::InFlight => stats.in_flight = *n,
                    PostStatus::Posted => stats.posted = *n,
                    PostStatus::Failed => stats.failed = *n,
                    PostStatus::Cancelled => stats.cancelled = *n,
                }
            }
            platforms.push(stats);
        }

        Ok(QueueStats { platforms })
    }

    // ------------------------------------------------------------------
    // Slots
    // ------------------------------------------------------------------
    //
    // Every slot or limit change re-times the platform's pending entries
    // so they follow the new calendar straight away.

    pub async fn list_slots(&self, platform: Option<Platform>) -> Result<Vec<TimeSlot>> {
        self.registry().list_slots(platform).await
    }

    pub async fn add_slot(&self, new: NewSlot) -> Result<TimeSlot> {
        let slot = self.registry().add_slot(new).await?;
        self.redistribute(slot.platform).await?;
        Ok(slot)
    }

    pub async fn update_slot(&self, id: &str, update: SlotUpdate) -> Result<TimeSlot> {
        let before = self.registry().get_slot(id).await?;
        let slot = self.registry().update_slot(id, update).await?;
        self.redistribute(slot.platform).await?;
        if before.platform != slot.platform {
            self.redistribute(before.platform).await?;
        }
        Ok(slot)
    }

    pub async fn set_slot_enabled(&self, id: &str, enabled: bool) -> Result<TimeSlot> {
        let slot = self.registry().set_enabled(id, enabled).await?;
        self.redistribute(slot.platform).await?;
        Ok(slot)
    }

    pub async fn delete_slot(&self, id: &str) -> Result<TimeSlot> {
        let slot = self.registry().delete_slot(id).await?;
        self.redistribute(slot.platform).await?;
        Ok(slot)
    }

    /// Set or clear (`0`) the platform's daily post limit
    pub async fn set_daily_limit(&self, platform: Platform, limit: u32) -> Result<()> {
        self.registry().set_daily_limit(platform, Some(limit)).await?;
        info!(platform = %platform, limit, "Updated daily limit");
        self.redistribute(platform).await?;
        Ok(())
    }

    /// Re-time a platform's pending entries from now
    pub async fn redistribute(&self, platform: Platform) -> Result<Vec<PostEntry>> {
        let entries = self.scheduler.redistribute(platform, now()).await?;
        self.event_bus.emit(Event::Redistributed {
            platform,
            pending: entries.len(),
        });
        Ok(entries)
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Publish everything due right now
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        self.dispatcher.run_cycle(now()).await
    }

    /// Return entries whose publish attempt was abandoned to their queues
    pub async fn recover_interrupted(&self) -> Result<Vec<PostEntry>> {
        self.dispatcher.recover_interrupted(now()).await
    }

    async fn announce_redistribution(&self, platform: Platform) -> Result<()> {
        let pending = self
            .db
            .list_entries(Some(platform), Some(PostStatus::Pending))
            .await?
            .len();
        self.event_bus.emit(Event::Redistributed { platform, pending });
        Ok(())
    }

    async fn platforms_of(&self, ids: &[String]) -> Result<Vec<Platform>> {
        let mut platforms = Vec::new();
        for id in ids {
            if let Some(entry) = self.db.get_entry(id).await? {
                if !platforms.contains(&entry.platform) {
                    platforms.push(entry.platform);
                }
            }
        }
        platforms.sort();
        Ok(platforms)
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
