//! Queue scheduling
//!
//! The scheduler owns every mutation of a platform's Pending sequence:
//! assigning slots on enqueue, re-timing the remainder after an entry is
//! promoted, reordered or cancelled, and the claim/resolve steps of a
//! publish attempt. Each mutation holds the platform lock and runs in one
//! transaction; no network I/O happens under the lock.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqliteConnection;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::db::{queries, Database};
use crate::error::{DbError, ErrorKind, Result, SlotcastError, StateError};
use crate::slots::{Occupancy, SlotRegistry, OCCUPANCY_WINDOW_SECS};
use crate::types::{Failure, Platform, PostEntry, PostStatus, PreviewDescriptor, PreviewHint};

/// How long an in-flight claim is trusted before recovery may reclaim it
pub const DEFAULT_CLAIM_EXPIRY: Duration = Duration::from_secs(120);

/// One exclusive lock per platform
///
/// Held around scheduler mutations and the dispatch claim/record steps.
/// Callers needing several platforms go through [`PlatformLocks::lock_many`],
/// which always acquires in `Platform` order.
#[derive(Clone, Default)]
pub struct PlatformLocks {
    linkedin: Arc<Mutex<()>>,
    threads: Arc<Mutex<()>>,
}

impl PlatformLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, platform: Platform) -> OwnedMutexGuard<()> {
        let mutex = match platform {
            Platform::LinkedIn => Arc::clone(&self.linkedin),
            Platform::Threads => Arc::clone(&self.threads),
        };
        mutex.lock_owned().await
    }

    pub async fn lock_many(
        &self,
        platforms: impl IntoIterator<Item = Platform>,
    ) -> Vec<OwnedMutexGuard<()>> {
        let ordered: BTreeSet<Platform> = platforms.into_iter().collect();
        let mut guards = Vec::with_capacity(ordered.len());
        for platform in ordered {
            guards.push(self.lock(platform).await);
        }
        guards
    }
}

/// Content to add to a platform queue
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub platform: Platform,
    pub content: String,
    pub preview_hint: Option<PreviewHint>,
    pub idempotency_key: Option<String>,
}

impl EnqueueRequest {
    pub fn new(platform: Platform, content: impl Into<String>) -> Self {
        Self {
            platform,
            content: content.into(),
            preview_hint: None,
            idempotency_key: None,
        }
    }
}

/// Where [`Scheduler::move_to_edge`] puts the selected entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEdge {
    Top,
    Bottom,
}

/// Result of a publish attempt, written back by [`Scheduler::record_outcome`]
#[derive(Debug, Clone)]
pub enum PublishOutcome {
    Posted {
        post_id: String,
        preview: Option<PreviewDescriptor>,
    },
    Failed {
        failure: Failure,
        preview: Option<PreviewDescriptor>,
    },
}

#[derive(Clone)]
pub struct Scheduler {
    db: Arc<Database>,
    registry: SlotRegistry,
    locks: PlatformLocks,
    claim_expiry: Duration,
}

impl Scheduler {
    pub fn new(db: Arc<Database>, registry: SlotRegistry, locks: PlatformLocks) -> Self {
        Self {
            db,
            registry,
            locks,
            claim_expiry: DEFAULT_CLAIM_EXPIRY,
        }
    }

    /// Age after which an in-flight claim counts as abandoned
    ///
    /// Must exceed the longest a live publish attempt can take, including
    /// link preview enrichment, or recovery could reclaim a running attempt.
    pub fn with_claim_expiry(mut self, claim_expiry: Duration) -> Self {
        self.claim_expiry = claim_expiry;
        self
    }

    pub fn registry(&self) -> &SlotRegistry {
        &self.registry
    }

    pub fn locks(&self) -> &PlatformLocks {
        &self.locks
    }

    /// Append content to its platform queue at the next free slot
    ///
    /// The slot search starts after the later of `now` and the last pending
    /// entry, so a new entry never lands ahead of one already queued. A known
    /// idempotency key returns the entry it created.
    pub async fn enqueue(&self, request: EnqueueRequest, now: i64) -> Result<PostEntry> {
        if request.content.trim().is_empty() {
            return Err(SlotcastError::InvalidInput(
                "Content cannot be empty".to_string(),
            ));
        }

        let _guard = self.locks.lock(request.platform).await;
        let mut tx = self.db.begin().await?;

        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = queries::find_by_idempotency_key(&mut tx, key).await? {
                debug!(entry_id = %existing.id, "Idempotency key matched existing entry");
                return Ok(existing);
            }
        }

        let mut entry = self
            .append_pending(&mut tx, request.platform, request.content, now)
            .await?;
        entry.preview_hint = request.preview_hint;
        entry.idempotency_key = request.idempotency_key;

        queries::insert_entry(&mut tx, &entry).await?;
        tx.commit().await.map_err(DbError::SqlxError)?;

        info!(
            platform = %entry.platform,
            entry_id = %entry.id,
            position = entry.position,
            scheduled_at = entry.scheduled_at,
            "Enqueued entry"
        );
        Ok(entry)
    }

    /// Build (but do not insert) a pending entry at the tail of the queue
    async fn append_pending(
        &self,
        conn: &mut SqliteConnection,
        platform: Platform,
        content: String,
        now: i64,
    ) -> Result<PostEntry> {
        let pending = queries::pending_entries(conn, platform).await?;
        let (after, position) = match pending.last() {
            Some(last) => (last.scheduled_at.max(now), last.position + 1),
            None => (now, 0),
        };

        let calendar = self.registry.calendar(conn, platform).await?;
        let occupancy = self.load_occupancy(conn, platform, now, true).await?;
        let scheduled_at = calendar.next_occurrence(after, &occupancy)?;

        Ok(PostEntry::new_pending(platform, content, scheduled_at, position))
    }

    async fn load_occupancy(
        &self,
        conn: &mut SqliteConnection,
        platform: Platform,
        from: i64,
        include_pending: bool,
    ) -> Result<Occupancy> {
        let instants = queries::occupied_instants(
            conn,
            platform,
            from - OCCUPANCY_WINDOW_SECS,
            include_pending,
        )
        .await?;
        Ok(Occupancy::from_instants(self.registry.offset(), instants))
    }

    /// Renumber and re-time `entries` (already in their new order)
    ///
    /// Positions restart at the lowest position among them. Timestamps are
    /// reassigned slot by slot from `now`; when the platform has no enabled
    /// slots the existing timestamps are kept and handed out in sorted order.
    async fn retime(
        &self,
        conn: &mut SqliteConnection,
        platform: Platform,
        mut entries: Vec<PostEntry>,
        now: i64,
    ) -> Result<Vec<PostEntry>> {
        let base = match entries.iter().map(|e| e.position).min() {
            Some(base) => base,
            None => return Ok(entries),
        };

        let calendar = self.registry.calendar(conn, platform).await?;
        let times: Vec<i64> = if calendar.has_slots() {
            let mut occupancy = self.load_occupancy(conn, platform, now, false).await?;
            let mut after = now;
            let mut times = Vec::with_capacity(entries.len());
            for _ in &entries {
                let at = calendar.next_occurrence(after, &occupancy)?;
                occupancy.add(at);
                times.push(at);
                after = at;
            }
            times
        } else {
            let mut times: Vec<i64> = entries.iter().map(|e| e.scheduled_at).collect();
            times.sort_unstable();
            times
        };

        for (index, (entry, at)) in entries.iter_mut().zip(times).enumerate() {
            entry.position = base + index as i64;
            entry.scheduled_at = at;
            queries::update_schedule(conn, &entry.id, entry.position, entry.scheduled_at).await?;
        }

        debug!(platform = %platform, count = entries.len(), "Redistributed pending entries");
        Ok(entries)
    }

    /// Re-time the whole pending sequence of a platform from `now`
    pub async fn redistribute(&self, platform: Platform, now: i64) -> Result<Vec<PostEntry>> {
        let _guard = self.locks.lock(platform).await;
        let mut tx = self.db.begin().await?;

        let pending = queries::pending_entries(&mut tx, platform).await?;
        let entries = self.retime(&mut tx, platform, pending, now).await?;

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(entries)
    }

    /// Load an entry inside the transaction and require it to be pending
    async fn pending_entry(
        conn: &mut SqliteConnection,
        id: &str,
        action: &'static str,
    ) -> Result<PostEntry> {
        let entry = queries::get_entry(conn, id)
            .await?
            .ok_or_else(|| StateError::NotFound(id.to_string()))?;

        match entry.status {
            PostStatus::Pending => Ok(entry),
            PostStatus::InFlight => Err(StateError::AlreadyInFlight(entry.id).into()),
            status => Err(StateError::InvalidTransition {
                id: entry.id,
                status: status.to_string(),
                action,
            }
            .into()),
        }
    }

    async fn platform_of(&self, id: &str) -> Result<Platform> {
        self.db
            .get_entry(id)
            .await?
            .map(|e| e.platform)
            .ok_or_else(|| StateError::NotFound(id.to_string()).into())
    }

    /// Take an entry out of the queue for immediate publishing
    ///
    /// The entry is claimed (InFlight) and the rest of the platform queue is
    /// pulled forward to close the gap. The caller publishes the returned
    /// entry and reports back through [`Scheduler::record_outcome`].
    pub async fn promote(&self, id: &str, now: i64) -> Result<PostEntry> {
        let platform = self.platform_of(id).await?;
        let _guard = self.locks.lock(platform).await;
        let mut tx = self.db.begin().await?;

        let mut entry = Self::pending_entry(&mut tx, id, "post").await?;
        // publishing now frees the slot it held
        queries::update_schedule(&mut tx, id, entry.position, now).await?;
        entry.scheduled_at = now;
        if !queries::claim(&mut tx, id, now).await? {
            return Err(StateError::AlreadyInFlight(id.to_string()).into());
        }
        entry.status = PostStatus::InFlight;

        let remaining = queries::pending_entries(&mut tx, platform).await?;
        self.retime(&mut tx, platform, remaining, now).await?;
        tx.commit().await.map_err(DbError::SqlxError)?;

        info!(platform = %platform, entry_id = %id, "Promoted entry for immediate publish");
        Ok(entry)
    }

    /// Move a pending entry to absolute queue position `position`
    ///
    /// Valid positions are those the platform's pending entries currently
    /// occupy. The sequence is renumbered and re-timed afterwards.
    pub async fn reorder(&self, id: &str, position: i64, now: i64) -> Result<Vec<PostEntry>> {
        let platform = self.platform_of(id).await?;
        let _guard = self.locks.lock(platform).await;
        let mut tx = self.db.begin().await?;

        Self::pending_entry(&mut tx, id, "reorder").await?;
        let mut pending = queries::pending_entries(&mut tx, platform).await?;

        let first = pending.first().map(|e| e.position).unwrap_or(0);
        let last = first + pending.len() as i64 - 1;
        if position < first || position > last {
            return Err(StateError::PositionOutOfRange {
                requested: position,
                first,
                last,
            }
            .into());
        }

        let from = pending
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| StateError::NotFound(id.to_string()))?;
        let entry = pending.remove(from);
        pending.insert((position - first) as usize, entry);

        let entries = self.retime(&mut tx, platform, pending, now).await?;
        tx.commit().await.map_err(DbError::SqlxError)?;

        info!(platform = %platform, entry_id = %id, position, "Reordered entry");
        Ok(entries)
    }

    /// Move the selected pending entries to the head or tail of their queues
    ///
    /// Relative order is kept inside the selection and among the rest.
    /// Returns how many entries moved.
    pub async fn move_to_edge(&self, ids: &[String], edge: QueueEdge, now: i64) -> Result<usize> {
        let mut platforms = BTreeSet::new();
        for id in ids {
            platforms.insert(self.platform_of(id).await?);
        }

        let _guards = self.locks.lock_many(platforms.iter().copied()).await;
        let mut tx = self.db.begin().await?;

        for id in ids {
            Self::pending_entry(&mut tx, id, "move").await?;
        }

        let selected: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut moved = 0;
        for platform in platforms {
            let pending = queries::pending_entries(&mut tx, platform).await?;
            let (chosen, rest): (Vec<PostEntry>, Vec<PostEntry>) = pending
                .into_iter()
                .partition(|e| selected.contains(e.id.as_str()));
            moved += chosen.len();

            let order: Vec<PostEntry> = match edge {
                QueueEdge::Top => chosen.into_iter().chain(rest).collect(),
                QueueEdge::Bottom => rest.into_iter().chain(chosen).collect(),
            };
            self.retime(&mut tx, platform, order, now).await?;
        }

        tx.commit().await.map_err(DbError::SqlxError)?;
        info!(count = moved, edge = ?edge, "Moved entries");
        Ok(moved)
    }

    /// Cancel a set of entries and close the gaps they leave
    ///
    /// Fails with `AlreadyInFlight` (cancelling nothing) if any entry is
    /// being published. Unknown ids and entries already in a final state
    /// are skipped. Returns the number of entries cancelled.
    pub async fn cancel(&self, ids: &[String], now: i64) -> Result<usize> {
        let mut platforms = BTreeSet::new();
        for id in ids {
            if let Some(entry) = self.db.get_entry(id).await? {
                if entry.status == PostStatus::InFlight {
                    return Err(StateError::AlreadyInFlight(entry.id).into());
                }
                if entry.status == PostStatus::Pending {
                    platforms.insert(entry.platform);
                }
            }
        }

        let _guards = self.locks.lock_many(platforms.iter().copied()).await;
        let mut tx = self.db.begin().await?;

        let mut touched = BTreeSet::new();
        let mut cancelled = 0;
        for id in ids {
            let entry = match queries::get_entry(&mut tx, id).await? {
                Some(entry) => entry,
                None => continue,
            };
            match entry.status {
                PostStatus::InFlight => {
                    return Err(StateError::AlreadyInFlight(entry.id).into());
                }
                PostStatus::Pending if platforms.contains(&entry.platform) => {
                    if queries::cancel(&mut tx, id).await? {
                        cancelled += 1;
                        touched.insert(entry.platform);
                    }
                }
                _ => {}
            }
        }

        for platform in touched {
            let pending = queries::pending_entries(&mut tx, platform).await?;
            self.retime(&mut tx, platform, pending, now).await?;
        }

        tx.commit().await.map_err(DbError::SqlxError)?;
        info!(count = cancelled, "Cancelled entries");
        Ok(cancelled)
    }

    /// Cancel every pending entry, optionally for one platform only
    pub async fn cancel_all(&self, platform: Option<Platform>) -> Result<usize> {
        let platforms: Vec<Platform> = match platform {
            Some(p) => vec![p],
            None => Platform::ALL.to_vec(),
        };

        let _guards = self.locks.lock_many(platforms.iter().copied()).await;
        let mut tx = self.db.begin().await?;

        let mut cancelled = 0;
        for platform in platforms {
            for entry in queries::pending_entries(&mut tx, platform).await? {
                if queries::cancel(&mut tx, &entry.id).await? {
                    cancelled += 1;
                }
            }
        }

        tx.commit().await.map_err(DbError::SqlxError)?;
        info!(count = cancelled, "Cancelled all pending entries");
        Ok(cancelled)
    }

    /// Queue a fresh copy of a posted, failed or cancelled entry
    ///
    /// The historical entry is left untouched; the copy records where it
    /// came from in `requeued_from`.
    pub async fn requeue(&self, id: &str, now: i64) -> Result<PostEntry> {
        let source = self
            .db
            .get_entry(id)
            .await?
            .ok_or_else(|| StateError::NotFound(id.to_string()))?;

        if !source.status.is_terminal() {
            return Err(StateError::InvalidTransition {
                id: source.id,
                status: source.status.to_string(),
                action: "requeue",
            }
            .into());
        }

        let _guard = self.locks.lock(source.platform).await;
        let mut tx = self.db.begin().await?;

        let mut entry = self
            .append_pending(&mut tx, source.platform, source.content.clone(), now)
            .await?;
        entry.preview_hint = source.preview_hint.clone();
        entry.requeued_from = Some(source.id.clone());

        queries::insert_entry(&mut tx, &entry).await?;
        tx.commit().await.map_err(DbError::SqlxError)?;

        info!(
            platform = %entry.platform,
            entry_id = %entry.id,
            requeued_from = %source.id,
            scheduled_at = entry.scheduled_at,
            "Requeued entry"
        );
        Ok(entry)
    }

    /// Claim the first due pending entry of a platform, if any
    pub async fn claim_next_due(&self, platform: Platform, now: i64) -> Result<Option<PostEntry>> {
        let _guard = self.locks.lock(platform).await;
        let mut conn = self.db.pool().acquire().await.map_err(DbError::SqlxError)?;

        let mut entry = match queries::next_due(&mut conn, platform, now).await? {
            Some(entry) => entry,
            None => return Ok(None),
        };

        if !queries::claim(&mut conn, &entry.id, now).await? {
            return Ok(None);
        }
        entry.status = PostStatus::InFlight;

        debug!(platform = %platform, entry_id = %entry.id, "Claimed due entry");
        Ok(Some(entry))
    }

    /// Write the result of a publish attempt on an in-flight entry
    pub async fn record_outcome(
        &self,
        entry: &PostEntry,
        outcome: PublishOutcome,
        now: i64,
    ) -> Result<PostEntry> {
        let _guard = self.locks.lock(entry.platform).await;
        let mut conn = self.db.pool().acquire().await.map_err(DbError::SqlxError)?;

        let mut resolved = entry.clone();
        let posted_at = match outcome {
            PublishOutcome::Posted { post_id, preview } => {
                resolved.status = PostStatus::Posted;
                resolved.platform_post_id = Some(post_id);
                resolved.preview = preview;
                resolved.failure = None;
                Some(now)
            }
            PublishOutcome::Failed { failure, preview } => {
                resolved.status = PostStatus::Failed;
                resolved.preview = preview;
                resolved.failure = Some(failure);
                None
            }
        };

        if !queries::resolve(&mut conn, &resolved, posted_at).await? {
            let current = queries::get_entry(&mut conn, &entry.id)
                .await?
                .map(|e| e.status.to_string())
                .unwrap_or_else(|| "missing".to_string());
            warn!(entry_id = %entry.id, status = %current, "Entry was not in flight when its outcome arrived");
            return Err(StateError::InvalidTransition {
                id: entry.id.clone(),
                status: current,
                action: "resolve",
            }
            .into());
        }

        queries::get_entry(&mut conn, &entry.id)
            .await?
            .ok_or_else(|| StateError::NotFound(entry.id.clone()).into())
    }

    /// Return entries left in flight by a crash to the head of their queues
    ///
    /// Only claims older than the claim expiry are touched; a younger claim
    /// may belong to a publish still running in this or another process.
    /// Each interrupted entry becomes pending again ahead of the current
    /// head, due no later than `now`, with its attempt count incremented and
    /// an `interrupted` failure noted.
    pub async fn recover_interrupted(&self, now: i64) -> Result<Vec<PostEntry>> {
        let _guards = self.locks.lock_many(Platform::ALL).await;
        let mut tx = self.db.begin().await?;

        let expiry = i64::try_from(self.claim_expiry.as_secs()).unwrap_or(i64::MAX);
        let claimed_before = now.saturating_sub(expiry);
        let interrupted = queries::stale_in_flight_entries(&mut tx, claimed_before).await?;
        let failure = Failure {
            kind: ErrorKind::Interrupted,
            message: "Publish attempt was interrupted before completing".to_string(),
        };

        // stale_in_flight_entries is ordered by descending position, so pushing
        // each one in front of the head keeps their original order
        let mut recovered_ids = Vec::with_capacity(interrupted.len());
        for entry in interrupted {
            let head = queries::pending_entries(&mut tx, entry.platform)
                .await?
                .into_iter()
                .next();
            let (position, scheduled_at) = match head {
                Some(head) => (head.position - 1, head.scheduled_at.min(now)),
                None => (entry.position, now),
            };

            queries::reset_interrupted(&mut tx, &entry.id, position, scheduled_at, &failure)
                .await?;
            warn!(
                platform = %entry.platform,
                entry_id = %entry.id,
                position,
                "Recovered interrupted entry"
            );
            recovered_ids.push(entry.id);
        }

        let mut recovered = Vec::with_capacity(recovered_ids.len());
        for id in &recovered_ids {
            if let Some(entry) = queries::get_entry(&mut tx, id).await? {
                recovered.push(entry);
            }
        }

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(recovered)
    }

    /// Next scheduled time per platform among pending entries
    pub async fn next_scheduled(&self) -> Result<BTreeMap<Platform, i64>> {
        let mut conn = self.db.pool().acquire().await.map_err(DbError::SqlxError)?;
        let mut next = BTreeMap::new();
        for platform in Platform::ALL {
            if let Some(head) = queries::pending_entries(&mut conn, platform)
                .await?
                .into_iter()
                .map(|e| e.scheduled_at)
                .min()
            {
                next.insert(platform, head);
            }
        }
        Ok(next)
    }
}
