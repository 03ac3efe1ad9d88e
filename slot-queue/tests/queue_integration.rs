//! Integration tests for the slot-queue queue commands

use anyhow::Result;
use assert_cmd::Command;
use libslotcast::{Database, Platform, PostStatus};
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Helper to escape path for TOML on Windows
fn escape_path_for_toml(path: &str) -> String {
    path.replace('\\', "\\\\")
}

/// A config file and database in a temp dir; no platforms configured
struct TestEnv {
    _dir: TempDir,
    config_path: PathBuf,
    db_path: PathBuf,
}

impl TestEnv {
    fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("config.toml");
        let db_path = dir.path().join("data").join("queue.db");

        let config_content = format!(
            r#"
[database]
path = "{}"

[scheduling]
utc_offset_minutes = 0
"#,
            escape_path_for_toml(&db_path.to_string_lossy())
        );
        fs::write(&config_path, config_content)?;

        Ok(Self {
            _dir: dir,
            config_path,
            db_path,
        })
    }

    fn cmd(&self) -> Result<Command> {
        let mut cmd = Command::cargo_bin("slot-queue")?;
        cmd.env("SLOTCAST_CONFIG", &self.config_path)
            .env_remove("SLOTCAST_DB_PATH");
        Ok(cmd)
    }

    /// Run a command that must succeed and return its trimmed stdout
    fn run(&self, args: &[&str]) -> Result<String> {
        let output = self.cmd()?.args(args).assert().success().get_output().clone();
        Ok(String::from_utf8(output.stdout)?.trim().to_string())
    }

    /// Daily 09:00 LinkedIn slot holding one post per day
    fn with_daily_slot(self) -> Result<Self> {
        self.run(&["slots", "add", "linkedin", "09:00", "--capacity", "1"])?;
        Ok(self)
    }

    fn add(&self, content: &str) -> Result<String> {
        self.run(&["add", "linkedin", content])
    }

    async fn database(&self) -> Result<Database> {
        Ok(Database::new(&self.db_path.to_string_lossy()).await?)
    }

    async fn pending_contents(&self) -> Result<Vec<String>> {
        let mut entries = self
            .database()
            .await?
            .list_entries(Some(Platform::LinkedIn), Some(PostStatus::Pending))
            .await?;
        entries.sort_by_key(|e| e.position);
        Ok(entries.into_iter().map(|e| e.content).collect())
    }
}

#[test]
fn test_add_without_slots_fails() -> Result<()> {
    let env = TestEnv::new()?;

    env.cmd()?
        .args(["add", "linkedin", "Nowhere to go"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No enabled time slots"));
    Ok(())
}

#[test]
fn test_add_rejects_unknown_platform() -> Result<()> {
    let env = TestEnv::new()?.with_daily_slot()?;

    env.cmd()?
        .args(["add", "mastodon", "Hello"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Unsupported platform"));
    Ok(())
}

#[test]
fn test_add_then_list() -> Result<()> {
    let env = TestEnv::new()?.with_daily_slot()?;

    let id = env.add("First queued post")?;
    assert_eq!(id.len(), 36, "add prints the entry id");

    env.cmd()?
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains(&id))
        .stdout(predicate::str::contains("linkedin"))
        .stdout(predicate::str::contains("First queued post"))
        .stdout(predicate::str::contains("09:00"));
    Ok(())
}

#[test]
fn test_add_reads_stdin() -> Result<()> {
    let env = TestEnv::new()?.with_daily_slot()?;

    env.cmd()?
        .args(["add", "linkedin"])
        .write_stdin("Piped from stdin\n")
        .assert()
        .success();

    env.cmd()?
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Piped from stdin"));
    Ok(())
}

#[test]
fn test_add_with_same_key_returns_existing_entry() -> Result<()> {
    let env = TestEnv::new()?.with_daily_slot()?;

    let first = env.run(&["add", "linkedin", "Once only", "--key", "release-42"])?;
    let second = env.run(&["add", "linkedin", "Once only", "--key", "release-42"])?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn test_list_json_is_ordered_by_schedule() -> Result<()> {
    let env = TestEnv::new()?.with_daily_slot()?;
    env.add("one")?;
    env.add("two")?;
    env.add("three")?;

    let stdout = env.run(&["list", "--format", "json"])?;
    let entries: serde_json::Value = serde_json::from_str(&stdout)?;
    let entries = entries.as_array().expect("json array");
    assert_eq!(entries.len(), 3);

    let contents: Vec<&str> = entries
        .iter()
        .map(|e| e["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["one", "two", "three"]);

    // capacity 1: one post per day, 24h apart
    let times: Vec<i64> = entries
        .iter()
        .map(|e| e["scheduled_at"].as_i64().unwrap())
        .collect();
    assert_eq!(times[1] - times[0], 86_400);
    assert_eq!(times[2] - times[1], 86_400);
    Ok(())
}

#[test]
fn test_invalid_format_is_invalid_input() -> Result<()> {
    let env = TestEnv::new()?;

    env.cmd()?
        .args(["list", "--format", "yaml"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Invalid format"));
    Ok(())
}

#[tokio::test]
async fn test_cancel_removes_entry_and_keeps_history() -> Result<()> {
    let env = TestEnv::new()?.with_daily_slot()?;
    env.add("keep")?;
    let doomed = env.add("drop")?;

    env.cmd()?
        .args(["cancel", &doomed])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cancelled 1 post"));

    env.cmd()?
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains(&doomed).not());

    let entry = env
        .database()
        .await?
        .get_entry(&doomed)
        .await?
        .expect("cancelled entry is kept");
    assert_eq!(entry.status, PostStatus::Cancelled);
    assert_eq!(env.pending_contents().await?, vec!["keep"]);
    Ok(())
}

#[test]
fn test_cancel_rejects_malformed_id() -> Result<()> {
    let env = TestEnv::new()?;

    env.cmd()?
        .args(["cancel", "not-a-uuid"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Invalid entry ID"));
    Ok(())
}

#[tokio::test]
async fn test_cancel_all_for_platform() -> Result<()> {
    let env = TestEnv::new()?.with_daily_slot()?;
    env.add("a")?;
    env.add("b")?;

    env.cmd()?
        .args(["cancel", "--all", "--platform", "linkedin"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cancelled 2 posts"));

    assert!(env.pending_contents().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_reorder_moves_entry_to_position() -> Result<()> {
    let env = TestEnv::new()?.with_daily_slot()?;
    env.add("a")?;
    env.add("b")?;
    let c = env.add("c")?;

    let head = env
        .database()
        .await?
        .list_entries(Some(Platform::LinkedIn), Some(PostStatus::Pending))
        .await?
        .iter()
        .map(|e| e.position)
        .min()
        .expect("entries queued");

    env.cmd()?
        .args(["reorder", &c, &head.to_string()])
        .assert()
        .success();

    assert_eq!(env.pending_contents().await?, vec!["c", "a", "b"]);
    Ok(())
}

#[tokio::test]
async fn test_move_to_top_and_bottom() -> Result<()> {
    let env = TestEnv::new()?.with_daily_slot()?;
    let a = env.add("a")?;
    env.add("b")?;
    let c = env.add("c")?;

    env.cmd()?
        .args(["move", &c, "--top"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Moved 1 post to the top"));
    assert_eq!(env.pending_contents().await?, vec!["c", "a", "b"]);

    env.cmd()?.args(["move", &a, "--bottom"]).assert().success();
    assert_eq!(env.pending_contents().await?, vec!["c", "b", "a"]);

    env.cmd()?
        .args(["move", &a, "--top", "--bottom"])
        .assert()
        .failure();
    Ok(())
}

#[tokio::test]
async fn test_now_without_configured_platform_fails_entry() -> Result<()> {
    let env = TestEnv::new()?.with_daily_slot()?;
    let id = env.add("Nobody to publish this")?;
    env.add("Next in line")?;

    env.cmd()?
        .args(["now", &id])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("failed"));

    let entry = env
        .database()
        .await?
        .get_entry(&id)
        .await?
        .expect("entry exists");
    assert_eq!(entry.status, PostStatus::Failed);
    assert_eq!(entry.attempt_count, 1);
    assert_eq!(env.pending_contents().await?, vec!["Next in line"]);
    Ok(())
}

#[test]
fn test_now_unknown_id_is_not_found() -> Result<()> {
    let env = TestEnv::new()?;

    env.cmd()?
        .args(["now", "0b9f3c1e-8d1a-4a7e-9c49-6d0b5f6f2a10"])
        .assert()
        .code(3);
    Ok(())
}

#[tokio::test]
async fn test_requeue_cancelled_entry() -> Result<()> {
    let env = TestEnv::new()?.with_daily_slot()?;
    let id = env.add("Second chance")?;
    env.run(&["cancel", &id])?;

    let copy = env.run(&["requeue", &id])?;
    assert_ne!(copy, id);

    let entry = env
        .database()
        .await?
        .get_entry(&copy)
        .await?
        .expect("copy exists");
    assert_eq!(entry.status, PostStatus::Pending);
    assert_eq!(entry.content, "Second chance");
    assert_eq!(entry.requeued_from.as_deref(), Some(id.as_str()));
    Ok(())
}

#[test]
fn test_stats_json_counts_by_platform() -> Result<()> {
    let env = TestEnv::new()?.with_daily_slot()?;
    env.add("a")?;
    let b = env.add("b")?;
    env.run(&["cancel", &b])?;

    let stdout = env.run(&["stats", "--format", "json"])?;
    let stats: serde_json::Value = serde_json::from_str(&stdout)?;
    let linkedin = stats["platforms"]
        .as_array()
        .expect("platforms array")
        .iter()
        .find(|p| p["platform"] == "linkedin")
        .expect("linkedin stats");

    assert_eq!(linkedin["pending"], 1);
    assert_eq!(linkedin["cancelled"], 1);
    assert_eq!(linkedin["enabled_slots"], 1);
    assert!(linkedin["next_scheduled"].is_i64());
    Ok(())
}

#[test]
fn test_stats_text() -> Result<()> {
    let env = TestEnv::new()?;

    env.cmd()?
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("linkedin:"))
        .stdout(predicate::str::contains("threads:"))
        .stdout(predicate::str::contains("Pending:   0"));
    Ok(())
}
