//! Database operations for Slotcast
//!
//! The queue and the slot registry both live in one SQLite file. Queue
//! mutations that touch several rows are composed by the scheduler from the
//! connection-level functions in [`queries`], inside a single transaction.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{DbError, Result};
use crate::slots::TimeSlot;
use crate::types::{Platform, PostEntry, PostStatus};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection and run pending migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        // Expand path and create parent directories
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
            }
        }

        // Forward slashes work for SQLite URLs on both Windows and Unix
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));
        let options = SqliteConnectOptions::from_str(&db_url)
            .map_err(DbError::SqlxError)?
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a transaction; dropping it without commit rolls back
    pub async fn begin(&self) -> Result<Transaction<'_, Sqlite>> {
        Ok(self.pool.begin().await.map_err(DbError::SqlxError)?)
    }

    /// Get an entry by ID
    pub async fn get_entry(&self, id: &str) -> Result<Option<PostEntry>> {
        let mut conn = self.pool.acquire().await.map_err(DbError::SqlxError)?;
        queries::get_entry(&mut conn, id).await
    }

    /// List entries ordered by scheduled time, then queue position
    pub async fn list_entries(
        &self,
        platform: Option<Platform>,
        status: Option<PostStatus>,
    ) -> Result<Vec<PostEntry>> {
        let mut conn = self.pool.acquire().await.map_err(DbError::SqlxError)?;
        queries::list_entries(&mut conn, platform, status).await
    }

    /// Entry counts grouped by platform and status
    pub async fn status_counts(&self) -> Result<Vec<(Platform, PostStatus, i64)>> {
        use sqlx::Row;

        let rows = sqlx::query(
            r#"
            SELECT platform, status, COUNT(*) AS n
            FROM post_entries
            GROUP BY platform, status
            ORDER BY platform, status
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter()
            .map(|r| {
                let platform = parse_platform(r.get("platform"))?;
                let status = parse_status(r.get("status"))?;
                Ok((platform, status, r.get::<i64, _>("n")))
            })
            .collect()
    }

    /// List time slots, optionally for one platform
    pub async fn list_slots(&self, platform: Option<Platform>) -> Result<Vec<TimeSlot>> {
        let mut conn = self.pool.acquire().await.map_err(DbError::SqlxError)?;
        queries::list_slots(&mut conn, platform, false).await
    }

    pub async fn get_slot(&self, id: &str) -> Result<Option<TimeSlot>> {
        let mut conn = self.pool.acquire().await.map_err(DbError::SqlxError)?;
        queries::get_slot(&mut conn, id).await
    }

    /// Daily post limit for a platform, `None` when unlimited
    pub async fn daily_limit(&self, platform: Platform) -> Result<Option<u32>> {
        let mut conn = self.pool.acquire().await.map_err(DbError::SqlxError)?;
        queries::daily_limit(&mut conn, platform).await
    }

    /// Set or clear the daily post limit for a platform
    pub async fn set_daily_limit(&self, platform: Platform, limit: Option<u32>) -> Result<()> {
        match limit {
            Some(max) => {
                sqlx::query(
                    r#"
                    INSERT INTO platform_limits (platform, max_posts_per_day)
                    VALUES (?, ?)
                    ON CONFLICT(platform) DO UPDATE SET max_posts_per_day = excluded.max_posts_per_day
                    "#,
                )
                .bind(platform.as_str())
                .bind(max as i64)
                .execute(&self.pool)
                .await
                .map_err(DbError::SqlxError)?;
            }
            None => {
                sqlx::query("DELETE FROM platform_limits WHERE platform = ?")
                    .bind(platform.as_str())
                    .execute(&self.pool)
                    .await
                    .map_err(DbError::SqlxError)?;
            }
        }
        Ok(())
    }
}

fn parse_platform(value: String) -> Result<Platform> {
    value
        .parse()
        .map_err(|e: String| DbError::CorruptRow(e).into())
}

fn parse_status(value: String) -> Result<PostStatus> {
    value
        .parse()
        .map_err(|e: String| DbError::CorruptRow(e).into())
}

/// Connection-level queries, composable inside a transaction
pub(crate) mod queries {
    use sqlx::sqlite::SqliteRow;
    use sqlx::{Row, SqliteConnection};

    use super::{parse_platform, parse_status};
    use crate::error::{DbError, Result};
    use crate::slots::{Recurrence, TimeSlot};
    use crate::types::{Failure, Platform, PostEntry, PostStatus};

    const ENTRY_COLUMNS: &str = "id, platform, content, preview_hint, preview, status, \
        scheduled_at, position, created_at, posted_at, platform_post_id, error_kind, \
        error_message, attempt_count, idempotency_key, requeued_from";

    fn entry_from_row(row: &SqliteRow) -> Result<PostEntry> {
        let preview_hint = row
            .get::<Option<String>, _>("preview_hint")
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(|e| DbError::CorruptRow(format!("preview_hint: {}", e)))?;
        let preview = row
            .get::<Option<String>, _>("preview")
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(|e| DbError::CorruptRow(format!("preview: {}", e)))?;

        let failure = match row.get::<Option<String>, _>("error_kind") {
            Some(kind) => Some(Failure {
                kind: kind.parse().map_err(DbError::CorruptRow)?,
                message: row
                    .get::<Option<String>, _>("error_message")
                    .unwrap_or_default(),
            }),
            None => None,
        };

        Ok(PostEntry {
            id: row.get("id"),
            platform: parse_platform(row.get("platform"))?,
            content: row.get("content"),
            preview_hint,
            preview,
            status: parse_status(row.get("status"))?,
            scheduled_at: row.get("scheduled_at"),
            position: row.get("position"),
            created_at: row.get("created_at"),
            posted_at: row.get("posted_at"),
            platform_post_id: row.get("platform_post_id"),
            failure,
            attempt_count: row.get("attempt_count"),
            idempotency_key: row.get("idempotency_key"),
            requeued_from: row.get("requeued_from"),
        })
    }

    fn to_json<T: serde::Serialize>(value: &Option<T>) -> Option<String> {
        value
            .as_ref()
            .and_then(|v| serde_json::to_string(v).ok())
    }

    pub async fn insert_entry(conn: &mut SqliteConnection, entry: &PostEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO post_entries (
                id, platform, content, preview_hint, preview, status, scheduled_at, position,
                created_at, posted_at, platform_post_id, error_kind, error_message,
                attempt_count, idempotency_key, requeued_from
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(entry.platform.as_str())
        .bind(&entry.content)
        .bind(to_json(&entry.preview_hint))
        .bind(to_json(&entry.preview))
        .bind(entry.status.as_str())
        .bind(entry.scheduled_at)
        .bind(entry.position)
        .bind(entry.created_at)
        .bind(entry.posted_at)
        .bind(&entry.platform_post_id)
        .bind(entry.failure.as_ref().map(|f| f.kind.as_str()))
        .bind(entry.failure.as_ref().map(|f| f.message.as_str()))
        .bind(entry.attempt_count)
        .bind(&entry.idempotency_key)
        .bind(&entry.requeued_from)
        .execute(&mut *conn)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_entry(conn: &mut SqliteConnection, id: &str) -> Result<Option<PostEntry>> {
        let query = format!("SELECT {} FROM post_entries WHERE id = ?", ENTRY_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(entry_from_row).transpose()
    }

    pub async fn find_by_idempotency_key(
        conn: &mut SqliteConnection,
        key: &str,
    ) -> Result<Option<PostEntry>> {
        let query = format!(
            "SELECT {} FROM post_entries WHERE idempotency_key = ?",
            ENTRY_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(key)
            .fetch_optional(&mut *conn)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(entry_from_row).transpose()
    }

    pub async fn list_entries(
        conn: &mut SqliteConnection,
        platform: Option<Platform>,
        status: Option<PostStatus>,
    ) -> Result<Vec<PostEntry>> {
        let mut where_clauses = vec!["1=1"];
        if platform.is_some() {
            where_clauses.push("platform = ?");
        }
        if status.is_some() {
            where_clauses.push("status = ?");
        }

        let query_str = format!(
            "SELECT {} FROM post_entries WHERE {} ORDER BY scheduled_at ASC, position ASC, created_at ASC",
            ENTRY_COLUMNS,
            where_clauses.join(" AND ")
        );

        let mut query = sqlx::query(&query_str);
        if let Some(p) = platform {
            query = query.bind(p.as_str());
        }
        if let Some(s) = status {
            query = query.bind(s.as_str());
        }

        let rows = query
            .fetch_all(&mut *conn)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(entry_from_row).collect()
    }

    /// Pending entries of one platform in queue order
    pub async fn pending_entries(
        conn: &mut SqliteConnection,
        platform: Platform,
    ) -> Result<Vec<PostEntry>> {
        let query = format!(
            "SELECT {} FROM post_entries WHERE platform = ? AND status = 'pending' ORDER BY position ASC",
            ENTRY_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(platform.as_str())
            .fetch_all(&mut *conn)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(entry_from_row).collect()
    }

    /// First pending entry in queue order whose time has come
    pub async fn next_due(
        conn: &mut SqliteConnection,
        platform: Platform,
        now: i64,
    ) -> Result<Option<PostEntry>> {
        let query = format!(
            "SELECT {} FROM post_entries \
             WHERE platform = ? AND status = 'pending' AND scheduled_at <= ? \
             ORDER BY position ASC LIMIT 1",
            ENTRY_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(platform.as_str())
            .bind(now)
            .fetch_optional(&mut *conn)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(entry_from_row).transpose()
    }

    /// In-flight entries claimed at or before `claimed_before`
    ///
    /// Claims without a timestamp predate claim tracking and always count
    /// as stale.
    pub async fn stale_in_flight_entries(
        conn: &mut SqliteConnection,
        claimed_before: i64,
    ) -> Result<Vec<PostEntry>> {
        let query = format!(
            "SELECT {} FROM post_entries \
             WHERE status = 'in_flight' AND (claimed_at IS NULL OR claimed_at <= ?) \
             ORDER BY platform, position DESC",
            ENTRY_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(claimed_before)
            .fetch_all(&mut *conn)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(entry_from_row).collect()
    }

    /// Scheduled instants that occupy slot capacity, at or after `since`
    ///
    /// Pending entries are left out when `include_pending` is false, which
    /// is what a redistribution pass wants: it is about to re-time them.
    pub async fn occupied_instants(
        conn: &mut SqliteConnection,
        platform: Platform,
        since: i64,
        include_pending: bool,
    ) -> Result<Vec<i64>> {
        let query = if include_pending {
            "SELECT scheduled_at FROM post_entries \
             WHERE platform = ? AND scheduled_at >= ? AND status IN ('pending', 'in_flight', 'posted')"
        } else {
            "SELECT scheduled_at FROM post_entries \
             WHERE platform = ? AND scheduled_at >= ? AND status IN ('in_flight', 'posted')"
        };

        let rows = sqlx::query_as::<_, (i64,)>(query)
            .bind(platform.as_str())
            .bind(since)
            .fetch_all(&mut *conn)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(rows.into_iter().map(|(t,)| t).collect())
    }

    /// Re-slot a pending entry
    pub async fn update_schedule(
        conn: &mut SqliteConnection,
        id: &str,
        position: i64,
        scheduled_at: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE post_entries SET position = ?, scheduled_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(position)
        .bind(scheduled_at)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Compare-and-set Pending -> InFlight; false if someone else got there first
    pub async fn claim(conn: &mut SqliteConnection, id: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE post_entries SET status = 'in_flight', claimed_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Write the outcome of a publish attempt on an in-flight entry
    pub async fn resolve(
        conn: &mut SqliteConnection,
        entry: &PostEntry,
        posted_at: Option<i64>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE post_entries SET
                status = ?,
                preview = ?,
                posted_at = ?,
                platform_post_id = ?,
                error_kind = ?,
                error_message = ?,
                attempt_count = attempt_count + 1
            WHERE id = ? AND status = 'in_flight'
            "#,
        )
        .bind(entry.status.as_str())
        .bind(to_json(&entry.preview))
        .bind(posted_at)
        .bind(&entry.platform_post_id)
        .bind(entry.failure.as_ref().map(|f| f.kind.as_str()))
        .bind(entry.failure.as_ref().map(|f| f.message.as_str()))
        .bind(&entry.id)
        .execute(&mut *conn)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Put an interrupted in-flight entry back into the Pending sequence
    pub async fn reset_interrupted(
        conn: &mut SqliteConnection,
        id: &str,
        position: i64,
        scheduled_at: i64,
        failure: &Failure,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE post_entries SET
                status = 'pending',
                position = ?,
                scheduled_at = ?,
                error_kind = ?,
                error_message = ?,
                attempt_count = attempt_count + 1,
                claimed_at = NULL
            WHERE id = ? AND status = 'in_flight'
            "#,
        )
        .bind(position)
        .bind(scheduled_at)
        .bind(failure.kind.as_str())
        .bind(&failure.message)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn cancel(conn: &mut SqliteConnection, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE post_entries SET status = 'cancelled' WHERE id = ? AND status = 'pending'",
        )
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    // ------------------------------------------------------------------
    // Time slots
    // ------------------------------------------------------------------

    fn slot_from_row(row: &SqliteRow) -> Result<TimeSlot> {
        let recurrence: Recurrence = row
            .get::<String, _>("recurrence")
            .parse()
            .map_err(|e: String| DbError::CorruptRow(e))?;
        let time_of_day = crate::slots::parse_time_of_day(&row.get::<String, _>("time_of_day"))
            .map_err(|e| DbError::CorruptRow(e.to_string()))?;

        Ok(TimeSlot {
            id: row.get("id"),
            platform: parse_platform(row.get("platform"))?,
            recurrence,
            time_of_day,
            enabled: row.get::<i64, _>("enabled") != 0,
            daily_capacity: row
                .get::<Option<i64>, _>("daily_capacity")
                .map(|c| c.max(0) as u32),
            created_at: row.get("created_at"),
        })
    }

    pub async fn list_slots(
        conn: &mut SqliteConnection,
        platform: Option<Platform>,
        enabled_only: bool,
    ) -> Result<Vec<TimeSlot>> {
        let mut where_clauses = vec!["1=1"];
        if platform.is_some() {
            where_clauses.push("platform = ?");
        }
        if enabled_only {
            where_clauses.push("enabled = 1");
        }

        let query_str = format!(
            "SELECT id, platform, recurrence, time_of_day, enabled, daily_capacity, created_at \
             FROM time_slots WHERE {} ORDER BY platform, time_of_day, recurrence",
            where_clauses.join(" AND ")
        );

        let mut query = sqlx::query(&query_str);
        if let Some(p) = platform {
            query = query.bind(p.as_str());
        }

        let rows = query
            .fetch_all(&mut *conn)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(slot_from_row).collect()
    }

    pub async fn get_slot(conn: &mut SqliteConnection, id: &str) -> Result<Option<TimeSlot>> {
        let row = sqlx::query(
            "SELECT id, platform, recurrence, time_of_day, enabled, daily_capacity, created_at \
             FROM time_slots WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(slot_from_row).transpose()
    }

    /// Insert or replace a slot row
    pub async fn save_slot(conn: &mut SqliteConnection, slot: &TimeSlot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO time_slots (id, platform, recurrence, time_of_day, enabled, daily_capacity, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                recurrence = excluded.recurrence,
                time_of_day = excluded.time_of_day,
                enabled = excluded.enabled,
                daily_capacity = excluded.daily_capacity
            "#,
        )
        .bind(&slot.id)
        .bind(slot.platform.as_str())
        .bind(slot.recurrence.to_string())
        .bind(slot.time_of_day.format("%H:%M").to_string())
        .bind(if slot.enabled { 1 } else { 0 })
        .bind(slot.daily_capacity.map(|c| c as i64))
        .bind(slot.created_at)
        .execute(&mut *conn)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn delete_slot(conn: &mut SqliteConnection, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM time_slots WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn daily_limit(conn: &mut SqliteConnection, platform: Platform) -> Result<Option<u32>> {
        let row = sqlx::query_as::<_, (i64,)>(
            "SELECT max_posts_per_day FROM platform_limits WHERE platform = ?",
        )
        .bind(platform.as_str())
        .fetch_optional(&mut *conn)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|(n,)| n).filter(|n| *n > 0).map(|n| n as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SlotcastError;
    use crate::types::{Failure, PreviewHint};
    use tempfile::TempDir;

    async fn setup_test_db() -> (TempDir, Database) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(&db_path.to_string_lossy()).await.unwrap();
        (temp_dir, db)
    }

    #[tokio::test]
    async fn test_database_initialization_with_invalid_path() {
        #[cfg(unix)]
        let invalid_path = "/tmp/test\0invalid.db";

        #[cfg(windows)]
        let invalid_path = "C:\\invalid<>path\\test.db";

        let result = Database::new(invalid_path).await;
        match result {
            Err(SlotcastError::Database(_)) => {}
            _ => panic!("Expected DbError for invalid path"),
        }
    }

    #[tokio::test]
    async fn test_database_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("deeper").join("queue.db");
        let db = Database::new(&db_path.to_string_lossy()).await;
        assert!(db.is_ok());
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_insert_and_get_entry_round_trip() {
        let (_dir, db) = setup_test_db().await;

        let mut entry =
            PostEntry::new_pending(Platform::LinkedIn, "Hello".to_string(), 1_900_000_000, 0);
        entry.preview_hint = Some(PreviewHint {
            url: Some("https://example.com".to_string()),
            title: None,
        });
        entry.idempotency_key = Some("key-1".to_string());

        let mut conn = db.pool().acquire().await.unwrap();
        queries::insert_entry(&mut conn, &entry).await.unwrap();

        let loaded = db.get_entry(&entry.id).await.unwrap().unwrap();
        assert_eq!(loaded.content, "Hello");
        assert_eq!(loaded.platform, Platform::LinkedIn);
        assert_eq!(loaded.status, PostStatus::Pending);
        assert_eq!(loaded.preview_hint, entry.preview_hint);
        assert_eq!(loaded.idempotency_key.as_deref(), Some("key-1"));

        let by_key = queries::find_by_idempotency_key(&mut conn, "key-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_key.id, entry.id);
    }

    #[tokio::test]
    async fn test_get_missing_entry_returns_none() {
        let (_dir, db) = setup_test_db().await;
        assert!(db.get_entry("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_is_compare_and_set() {
        let (_dir, db) = setup_test_db().await;
        let entry = PostEntry::new_pending(Platform::Threads, "x".to_string(), 100, 0);

        let mut conn = db.pool().acquire().await.unwrap();
        queries::insert_entry(&mut conn, &entry).await.unwrap();

        assert!(queries::claim(&mut conn, &entry.id, 100).await.unwrap());
        assert!(!queries::claim(&mut conn, &entry.id, 100).await.unwrap());

        let loaded = db.get_entry(&entry.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, PostStatus::InFlight);
    }

    #[tokio::test]
    async fn test_stale_in_flight_entries_by_claim_time() {
        let (_dir, db) = setup_test_db().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let old = PostEntry::new_pending(Platform::LinkedIn, "old".into(), 100, 0);
        let fresh = PostEntry::new_pending(Platform::LinkedIn, "fresh".into(), 200, 1);
        queries::insert_entry(&mut conn, &old).await.unwrap();
        queries::insert_entry(&mut conn, &fresh).await.unwrap();
        queries::claim(&mut conn, &old.id, 1_000).await.unwrap();
        queries::claim(&mut conn, &fresh.id, 5_000).await.unwrap();

        let stale = queries::stale_in_flight_entries(&mut conn, 4_000).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, old.id);

        let stale = queries::stale_in_flight_entries(&mut conn, 5_000).await.unwrap();
        assert_eq!(stale.len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_only_touches_in_flight_entries() {
        let (_dir, db) = setup_test_db().await;
        let mut entry = PostEntry::new_pending(Platform::Threads, "x".to_string(), 100, 0);

        let mut conn = db.pool().acquire().await.unwrap();
        queries::insert_entry(&mut conn, &entry).await.unwrap();

        entry.status = PostStatus::Failed;
        entry.failure = Some(Failure {
            kind: crate::error::ErrorKind::Network,
            message: "timed out".to_string(),
        });

        // still pending, so nothing is written
        assert!(!queries::resolve(&mut conn, &entry, None).await.unwrap());

        queries::claim(&mut conn, &entry.id, 100).await.unwrap();
        assert!(queries::resolve(&mut conn, &entry, None).await.unwrap());

        let loaded = db.get_entry(&entry.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, PostStatus::Failed);
        assert_eq!(loaded.attempt_count, 1);
        assert_eq!(loaded.failure.unwrap().kind, crate::error::ErrorKind::Network);
    }

    #[tokio::test]
    async fn test_next_due_respects_position_and_time() {
        let (_dir, db) = setup_test_db().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let later = PostEntry::new_pending(Platform::LinkedIn, "later".into(), 500, 1);
        let first = PostEntry::new_pending(Platform::LinkedIn, "first".into(), 100, 0);
        queries::insert_entry(&mut conn, &later).await.unwrap();
        queries::insert_entry(&mut conn, &first).await.unwrap();

        let due = queries::next_due(&mut conn, Platform::LinkedIn, 200)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(due.id, first.id);

        assert!(queries::next_due(&mut conn, Platform::LinkedIn, 50)
            .await
            .unwrap()
            .is_none());
        assert!(queries::next_due(&mut conn, Platform::Threads, 1000)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_daily_limit_set_and_clear() {
        let (_dir, db) = setup_test_db().await;

        assert_eq!(db.daily_limit(Platform::LinkedIn).await.unwrap(), None);
        db.set_daily_limit(Platform::LinkedIn, Some(3)).await.unwrap();
        assert_eq!(db.daily_limit(Platform::LinkedIn).await.unwrap(), Some(3));
        db.set_daily_limit(Platform::LinkedIn, Some(5)).await.unwrap();
        assert_eq!(db.daily_limit(Platform::LinkedIn).await.unwrap(), Some(5));
        db.set_daily_limit(Platform::LinkedIn, None).await.unwrap();
        assert_eq!(db.daily_limit(Platform::LinkedIn).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_status_counts_groups_by_platform() {
        let (_dir, db) = setup_test_db().await;
        let mut conn = db.pool().acquire().await.unwrap();

        for i in 0..3 {
            let entry = PostEntry::new_pending(Platform::LinkedIn, format!("p{}", i), 100 + i, i);
            queries::insert_entry(&mut conn, &entry).await.unwrap();
        }
        let entry = PostEntry::new_pending(Platform::Threads, "t".into(), 100, 0);
        queries::insert_entry(&mut conn, &entry).await.unwrap();
        queries::cancel(&mut conn, &entry.id).await.unwrap();

        let counts = db.status_counts().await.unwrap();
        assert!(counts.contains(&(Platform::LinkedIn, PostStatus::Pending, 3)));
        assert!(counts.contains(&(Platform::Threads, PostStatus::Cancelled, 1)));
    }
}
