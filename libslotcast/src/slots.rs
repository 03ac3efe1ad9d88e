//! Recurring publication slots
//!
//! A slot is "platform P, every day (or every Monday), at 09:00". The
//! [`SlotCalendar`] is the pure part: given the enabled slots and the
//! current occupancy it computes the next free instant. [`SlotRegistry`]
//! wraps the persisted slot table and the per-platform daily limits.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, TimeZone, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::config::SchedulingConfig;
use crate::db::{queries, Database};
use crate::error::{ConfigError, DbError, Result, SchedulingError, SlotcastError};
use crate::types::Platform;

/// How often a slot repeats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Recurrence {
    Daily,
    Weekly(Weekday),
}

impl Recurrence {
    pub fn matches(&self, day: Weekday) -> bool {
        match self {
            Recurrence::Daily => true,
            Recurrence::Weekly(w) => *w == day,
        }
    }
}

impl std::str::FromStr for Recurrence {
    type Err = String;

    /// Accepts `daily` and `weekly:<day>` where day is `mon`, `monday`, ...
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if s == "daily" {
            return Ok(Recurrence::Daily);
        }

        match s.strip_prefix("weekly:") {
            Some(day) => day
                .parse::<Weekday>()
                .map(Recurrence::Weekly)
                .map_err(|_| format!("Invalid day of week in recurrence: '{}'", day)),
            None => Err(format!(
                "Invalid recurrence: '{}'. Expected 'daily' or 'weekly:<day>'",
                s
            )),
        }
    }
}

impl std::fmt::Display for Recurrence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Recurrence::Daily => f.write_str("daily"),
            Recurrence::Weekly(day) => write!(f, "weekly:{}", day.to_string().to_lowercase()),
        }
    }
}

impl From<Recurrence> for String {
    fn from(r: Recurrence) -> Self {
        r.to_string()
    }
}

impl TryFrom<String> for Recurrence {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

/// Parse a wall-clock time written as `HH:MM`
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").map_err(|_| {
        SlotcastError::InvalidInput(format!("Invalid time of day '{}', expected HH:MM", s))
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: String,
    pub platform: Platform,
    pub recurrence: Recurrence,
    pub time_of_day: NaiveTime,
    pub enabled: bool,
    /// Entries one occurrence of this slot may hold; unlimited when absent
    pub daily_capacity: Option<u32>,
    pub created_at: i64,
}

/// Fields for a new slot
#[derive(Debug, Clone)]
pub struct NewSlot {
    pub platform: Platform,
    pub recurrence: Recurrence,
    pub time_of_day: NaiveTime,
    pub daily_capacity: Option<u32>,
}

/// Partial edit of an existing slot; `None` leaves a field unchanged
#[derive(Debug, Clone, Default)]
pub struct SlotUpdate {
    pub recurrence: Option<Recurrence>,
    pub time_of_day: Option<NaiveTime>,
    pub enabled: Option<bool>,
    /// `Some(None)` removes the capacity bound
    pub daily_capacity: Option<Option<u32>>,
}

/// Entries already holding slot capacity, keyed by instant and local day
#[derive(Debug, Clone)]
pub struct Occupancy {
    offset: FixedOffset,
    by_instant: HashMap<i64, u32>,
    by_day: HashMap<NaiveDate, u32>,
}

impl Occupancy {
    pub fn new(offset: FixedOffset) -> Self {
        Self {
            offset,
            by_instant: HashMap::new(),
            by_day: HashMap::new(),
        }
    }

    pub fn from_instants(offset: FixedOffset, instants: impl IntoIterator<Item = i64>) -> Self {
        let mut occupancy = Self::new(offset);
        for instant in instants {
            occupancy.add(instant);
        }
        occupancy
    }

    pub fn add(&mut self, instant: i64) {
        *self.by_instant.entry(instant).or_insert(0) += 1;
        if let Some(day) = local_date(instant, &self.offset) {
            *self.by_day.entry(day).or_insert(0) += 1;
        }
    }

    pub fn at(&self, instant: i64) -> u32 {
        self.by_instant.get(&instant).copied().unwrap_or(0)
    }

    pub fn on_day(&self, day: NaiveDate) -> u32 {
        self.by_day.get(&day).copied().unwrap_or(0)
    }
}

fn local_date(instant: i64, offset: &FixedOffset) -> Option<NaiveDate> {
    DateTime::from_timestamp(instant, 0).map(|dt| dt.with_timezone(offset).date_naive())
}

/// Enabled slots of one platform plus the rules for filling them
#[derive(Debug, Clone)]
pub struct SlotCalendar {
    platform: Platform,
    slots: Vec<TimeSlot>,
    offset: FixedOffset,
    lookahead_days: i64,
    daily_limit: Option<u32>,
}

impl SlotCalendar {
    pub fn new(
        platform: Platform,
        slots: Vec<TimeSlot>,
        offset: FixedOffset,
        lookahead_days: i64,
        daily_limit: Option<u32>,
    ) -> Self {
        let mut slots: Vec<TimeSlot> = slots
            .into_iter()
            .filter(|s| s.enabled && s.platform == platform)
            .collect();
        slots.sort_by_key(|s| s.time_of_day);

        Self {
            platform,
            slots,
            offset,
            lookahead_days,
            daily_limit,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn has_slots(&self) -> bool {
        !self.slots.is_empty()
    }

    /// Earliest slot instant strictly after `after` that still has room
    ///
    /// Days on which the platform daily limit is reached are skipped, as are
    /// slot occurrences whose capacity is used up. The search stops after
    /// `lookahead_days` local days.
    pub fn next_occurrence(&self, after: i64, occupancy: &Occupancy) -> Result<i64> {
        if self.slots.is_empty() {
            return Err(ConfigError::NoSlotsConfigured(self.platform).into());
        }

        let start = local_date(after, &self.offset).ok_or_else(|| {
            SlotcastError::InvalidInput(format!("Timestamp out of range: {}", after))
        })?;

        for day_offset in 0..=self.lookahead_days {
            let Some(date) = start.checked_add_signed(chrono::Duration::days(day_offset)) else {
                break;
            };

            if let Some(limit) = self.daily_limit {
                if occupancy.on_day(date) >= limit {
                    continue;
                }
            }

            for slot in &self.slots {
                if !slot.recurrence.matches(date.weekday()) {
                    continue;
                }

                let instant = match self
                    .offset
                    .from_local_datetime(&date.and_time(slot.time_of_day))
                    .single()
                {
                    Some(dt) => dt.timestamp(),
                    None => continue,
                };

                if instant <= after {
                    continue;
                }

                if let Some(capacity) = slot.daily_capacity {
                    if occupancy.at(instant) >= capacity {
                        continue;
                    }
                }

                return Ok(instant);
            }
        }

        Err(SchedulingError::CapacityExhausted {
            platform: self.platform,
            horizon_days: self.lookahead_days,
        }
        .into())
    }
}

/// Offset that slot times are written in
pub fn offset_from_config(config: &SchedulingConfig) -> Result<FixedOffset> {
    config
        .utc_offset_minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| {
            SlotcastError::InvalidInput(format!(
                "utc_offset_minutes out of range: {}",
                config.utc_offset_minutes
            ))
        })
}

/// How far back occupancy is loaded; covers a full local day at any offset
pub(crate) const OCCUPANCY_WINDOW_SECS: i64 = 2 * 24 * 60 * 60;

/// Persisted slot configuration and daily limits
#[derive(Clone)]
pub struct SlotRegistry {
    db: Arc<Database>,
    offset: FixedOffset,
    lookahead_days: i64,
}

impl SlotRegistry {
    pub fn new(db: Arc<Database>, config: &SchedulingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            db,
            offset: offset_from_config(config)?,
            lookahead_days: config.lookahead_days,
        })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// All slots (enabled or not), ordered by platform then time of day
    pub async fn list_slots(&self, platform: Option<Platform>) -> Result<Vec<TimeSlot>> {
        self.db.list_slots(platform).await
    }

    pub async fn get_slot(&self, id: &str) -> Result<TimeSlot> {
        self.db
            .get_slot(id)
            .await?
            .ok_or_else(|| SlotcastError::InvalidInput(format!("Slot not found: {}", id)))
    }

    pub async fn add_slot(&self, new: NewSlot) -> Result<TimeSlot> {
        validate_capacity(new.daily_capacity)?;

        let slot = TimeSlot {
            id: Uuid::new_v4().to_string(),
            platform: new.platform,
            recurrence: new.recurrence,
            time_of_day: new.time_of_day,
            enabled: true,
            daily_capacity: new.daily_capacity,
            created_at: chrono::Utc::now().timestamp(),
        };

        self.save_checked(&slot).await?;
        debug!(platform = %slot.platform, slot_id = %slot.id, "Added time slot");
        Ok(slot)
    }

    pub async fn update_slot(&self, id: &str, update: SlotUpdate) -> Result<TimeSlot> {
        let mut slot = self.get_slot(id).await?;

        if let Some(recurrence) = update.recurrence {
            slot.recurrence = recurrence;
        }
        if let Some(time) = update.time_of_day {
            slot.time_of_day = time;
        }
        if let Some(enabled) = update.enabled {
            slot.enabled = enabled;
        }
        if let Some(capacity) = update.daily_capacity {
            validate_capacity(capacity)?;
            slot.daily_capacity = capacity;
        }

        self.save_checked(&slot).await?;
        debug!(platform = %slot.platform, slot_id = %slot.id, "Updated time slot");
        Ok(slot)
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<TimeSlot> {
        self.update_slot(
            id,
            SlotUpdate {
                enabled: Some(enabled),
                ..Default::default()
            },
        )
        .await
    }

    /// Remove a slot; returns the removed record
    pub async fn delete_slot(&self, id: &str) -> Result<TimeSlot> {
        let slot = self.get_slot(id).await?;
        let mut conn = self.db.pool().acquire().await.map_err(DbError::SqlxError)?;
        queries::delete_slot(&mut conn, id).await?;
        debug!(platform = %slot.platform, slot_id = %slot.id, "Deleted time slot");
        Ok(slot)
    }

    pub async fn daily_limit(&self, platform: Platform) -> Result<Option<u32>> {
        self.db.daily_limit(platform).await
    }

    /// Set the platform daily post limit; `None` or `Some(0)` clears it
    pub async fn set_daily_limit(&self, platform: Platform, limit: Option<u32>) -> Result<()> {
        self.db
            .set_daily_limit(platform, limit.filter(|n| *n > 0))
            .await
    }

    /// Calendar for one platform as seen through an open connection
    pub(crate) async fn calendar(
        &self,
        conn: &mut sqlx::SqliteConnection,
        platform: Platform,
    ) -> Result<SlotCalendar> {
        let slots = queries::list_slots(conn, Some(platform), true).await?;
        let limit = queries::daily_limit(conn, platform).await?;
        Ok(SlotCalendar::new(
            platform,
            slots,
            self.offset,
            self.lookahead_days,
            limit,
        ))
    }

    /// Earliest free slot instant for `platform` strictly after `after`
    ///
    /// Occupancy counts the platform's pending, in-flight and posted entries.
    pub async fn next_occurrence(&self, platform: Platform, after: i64) -> Result<i64> {
        let mut conn = self.db.pool().acquire().await.map_err(DbError::SqlxError)?;
        let calendar = self.calendar(&mut conn, platform).await?;
        let instants =
            queries::occupied_instants(&mut conn, platform, after - OCCUPANCY_WINDOW_SECS, true)
                .await?;
        calendar.next_occurrence(after, &Occupancy::from_instants(self.offset, instants))
    }

    /// Save a slot after checking no other enabled slot of the platform
    /// shares its recurrence and time
    async fn save_checked(&self, slot: &TimeSlot) -> Result<()> {
        let mut tx = self.db.begin().await?;

        if slot.enabled {
            let existing = queries::list_slots(&mut tx, Some(slot.platform), true).await?;
            let clash = existing.iter().any(|other| {
                other.id != slot.id
                    && other.recurrence == slot.recurrence
                    && other.time_of_day == slot.time_of_day
            });
            if clash {
                return Err(ConfigError::DuplicateSlot {
                    platform: slot.platform,
                    recurrence: slot.recurrence.to_string(),
                    time: slot.time_of_day.format("%H:%M").to_string(),
                }
                .into());
            }
        }

        queries::save_slot(&mut tx, slot).await?;
        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(())
    }
}

fn validate_capacity(capacity: Option<u32>) -> Result<()> {
    if capacity == Some(0) {
        return Err(SlotcastError::InvalidInput(
            "Slot capacity must be a positive integer".to_string(),
        ));
    }
    Ok(())
}
