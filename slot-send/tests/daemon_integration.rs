//! Integration tests for the slot-send daemon

use anyhow::Result;
use assert_cmd::Command;
use libslotcast::config::SchedulingConfig;
use libslotcast::error::ErrorKind;
use libslotcast::scheduler::{PlatformLocks, Scheduler};
use libslotcast::slots::{parse_time_of_day, SlotRegistry};
use libslotcast::{Database, EnqueueRequest, NewSlot, Platform, PostEntry, PostStatus, Recurrence};
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DAY: i64 = 86_400;

struct TestEnv {
    dir: TempDir,
    config_path: PathBuf,
    db_path: PathBuf,
}

impl TestEnv {
    /// Config with an optional LinkedIn section pointing at `api_base`
    fn new(linkedin_api_base: Option<&str>) -> Result<Self> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("config.toml");
        let db_path = dir.path().join("queue.db");
        let token_path = dir.path().join("linkedin.token");
        fs::write(&token_path, "li-test-token\n")?;

        let mut config = format!(
            r#"
[database]
path = "{}"

[scheduling]
poll_interval = 1

[preview]
enabled = false
"#,
            toml_path(&db_path)
        );
        if let Some(api_base) = linkedin_api_base {
            config.push_str(&format!(
                r#"
[linkedin]
enabled = true
token_file = "{}"
author_urn = "urn:li:person:tester"
api_base = "{}"
"#,
                toml_path(&token_path),
                api_base
            ));
        }
        fs::write(&config_path, config)?;

        Ok(Self {
            dir,
            config_path,
            db_path,
        })
    }

    fn cmd(&self) -> Result<Command> {
        let mut cmd = Command::cargo_bin("slot-send")?;
        cmd.env("SLOTCAST_CONFIG", &self.config_path)
            .env_remove("SLOTCAST_DB_PATH")
            .env_remove("SLOTCAST_LOG_LEVEL")
            .env_remove("RUST_LOG");
        Ok(cmd)
    }

    async fn scheduler(&self) -> Result<(Arc<Database>, Scheduler)> {
        let db = Arc::new(Database::new(&self.db_path.to_string_lossy()).await?);
        let registry = SlotRegistry::new(Arc::clone(&db), &SchedulingConfig::default())?;
        Ok((Arc::clone(&db), Scheduler::new(db, registry, PlatformLocks::new())))
    }

    /// Queue a LinkedIn post that fell due within the last few days
    async fn seed_due_entry(&self, content: &str) -> Result<PostEntry> {
        let (_db, scheduler) = self.scheduler().await?;
        if scheduler
            .registry()
            .list_slots(Some(Platform::LinkedIn))
            .await?
            .is_empty()
        {
            scheduler
                .registry()
                .add_slot(NewSlot {
                    platform: Platform::LinkedIn,
                    recurrence: Recurrence::Daily,
                    time_of_day: parse_time_of_day("09:00")?,
                    daily_capacity: None,
                })
                .await?;
        }

        let three_days_ago = chrono::Utc::now().timestamp() - 3 * DAY;
        Ok(scheduler
            .enqueue(EnqueueRequest::new(Platform::LinkedIn, content), three_days_ago)
            .await?)
    }

    async fn entry(&self, id: &str) -> Result<PostEntry> {
        let db = Database::new(&self.db_path.to_string_lossy()).await?;
        Ok(db.get_entry(id).await?.expect("entry exists"))
    }
}

fn toml_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Run the daemon once off the async runtime so mock servers keep serving
async fn run_once(mut cmd: Command) -> Result<std::process::Output> {
    let output = tokio::task::spawn_blocking(move || cmd.arg("--once").output()).await??;
    Ok(output)
}

#[test]
fn test_daemon_starts_with_config() -> Result<()> {
    let env = TestEnv::new(None)?;

    env.cmd()?
        .arg("--once")
        .assert()
        .success()
        .stderr(predicate::str::contains("slot-send daemon starting"));
    Ok(())
}

#[test]
fn test_daemon_requires_valid_config() -> Result<()> {
    let env = TestEnv::new(None)?;
    let invalid = env.dir.path().join("invalid.toml");
    fs::write(&invalid, "invalid toml content [[[")?;

    Command::cargo_bin("slot-send")?
        .env("SLOTCAST_CONFIG", &invalid)
        .arg("--once")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed to parse config"));
    Ok(())
}

#[test]
fn test_help_lists_signals() -> Result<()> {
    Command::cargo_bin("slot-send")?
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("SIGTERM"))
        .stdout(predicate::str::contains("--poll-interval"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_once_publishes_due_entry() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/posts"))
        .and(header("Authorization", "Bearer li-test-token"))
        .respond_with(ResponseTemplate::new(201).insert_header("x-restli-id", "urn:li:share:7"))
        .expect(1)
        .mount(&server)
        .await;

    let env = TestEnv::new(Some(&server.uri()))?;
    let entry = env.seed_due_entry("Due a while ago").await?;

    let output = run_once(env.cmd()?).await?;
    assert!(output.status.success(), "daemon exited with {:?}", output.status);

    let posted = env.entry(&entry.id).await?;
    assert_eq!(posted.status, PostStatus::Posted);
    assert_eq!(posted.platform_post_id.as_deref(), Some("urn:li:share:7"));
    assert_eq!(posted.attempt_count, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_platform_error_fails_entry_without_retry() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/posts"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
        .expect(1)
        .mount(&server)
        .await;

    let env = TestEnv::new(Some(&server.uri()))?;
    let entry = env.seed_due_entry("Will be rejected").await?;

    run_once(env.cmd()?).await?;
    let failed = env.entry(&entry.id).await?;
    assert_eq!(failed.status, PostStatus::Failed);
    assert_eq!(
        failed.failure.expect("failure recorded").kind,
        ErrorKind::Auth
    );

    // a second run leaves the failed entry alone
    run_once(env.cmd()?).await?;
    assert_eq!(env.entry(&entry.id).await?.attempt_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_interrupted_entry_is_recovered_at_start() -> Result<()> {
    let env = TestEnv::new(None)?;
    let entry = env.seed_due_entry("Interrupted mid-publish").await?;

    // claimed a day ago by a process that never came back
    let (_db, scheduler) = env.scheduler().await?;
    let claimed = scheduler
        .claim_next_due(Platform::LinkedIn, chrono::Utc::now().timestamp() - DAY)
        .await?
        .expect("entry is due");
    assert_eq!(claimed.id, entry.id);

    // LinkedIn is not configured, so the recovered entry stays queued
    env.cmd()?.arg("--once").assert().success();

    let recovered = env.entry(&entry.id).await?;
    assert_eq!(recovered.status, PostStatus::Pending);
    assert_eq!(recovered.attempt_count, 1);
    assert_eq!(
        recovered.failure.expect("interruption noted").kind,
        ErrorKind::Interrupted
    );
    Ok(())
}

#[tokio::test]
async fn test_fresh_claim_of_another_process_is_left_alone() -> Result<()> {
    let env = TestEnv::new(None)?;
    let entry = env.seed_due_entry("Being posted by slot-queue now").await?;

    let (_db, scheduler) = env.scheduler().await?;
    scheduler
        .claim_next_due(Platform::LinkedIn, chrono::Utc::now().timestamp())
        .await?
        .expect("entry is due");

    env.cmd()?.arg("--once").assert().success();

    let still_claimed = env.entry(&entry.id).await?;
    assert_eq!(still_claimed.status, PostStatus::InFlight);
    assert_eq!(still_claimed.attempt_count, 0);
    Ok(())
}
