//! slot-queue - Manage slot-based post queues
//!
//! Unix-style tool for adding, inspecting and rearranging queued posts and
//! the recurring time slots they are published in.

use chrono::{DateTime, FixedOffset, Utc};
use clap::{Parser, Subcommand};
use libslotcast::logging::LoggingConfig;
use libslotcast::slots::parse_time_of_day;
use libslotcast::{
    EnqueueRequest, NewSlot, Platform, PostEntry, PostStatus, PreviewHint, QueueEdge,
    QueueService, Recurrence, Result, SlotUpdate, SlotcastError, TimeSlot,
};
use serde::Serialize;
use std::io::{IsTerminal, Read};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "slot-queue")]
#[command(version)]
#[command(about = "Manage slot-based post queues")]
#[command(long_about = "\
slot-queue - Manage slot-based post queues

DESCRIPTION:
    slot-queue is a Unix-style tool for managing the Slotcast post queues.
    Each platform has its own queue; posts are published at the next free
    recurring time slot by slot-send.

COMMANDS:
    list        List queued posts
    add         Add a post to a platform queue
    cancel      Cancel queued posts
    reorder     Move a post to a queue position
    move        Move posts to the top or bottom of their queue
    now         Publish a queued post immediately
    requeue     Queue a fresh copy of a posted, failed or cancelled post
    stats       Show queue statistics
    slots       Manage recurring time slots
    limit       Show or set a platform's daily post limit

USAGE EXAMPLES:
    # Create a daily 09:00 slot for LinkedIn, one post per occurrence
    slot-queue slots add linkedin 09:00 --capacity 1

    # Queue a post (content from an argument or stdin)
    slot-queue add linkedin \"New release is out: https://example.com/notes\"
    echo \"Hello Threads\" | slot-queue add threads

    # List pending posts as JSON
    slot-queue list --format json

    # Publish a post right away and pull the rest of the queue forward
    slot-queue now <ENTRY_ID>

    # Put two posts at the head of their queue
    slot-queue move <ID_1> <ID_2> --top

CONFIGURATION:
    Configuration file: ~/.config/slotcast/config.toml
    Database location: ~/.local/share/slotcast/queue.db

    Override with environment variables:
        SLOTCAST_CONFIG    - Path to config file
        SLOTCAST_DB_PATH   - Path to database file
        SLOTCAST_LOG_LEVEL - Log level filter (e.g. debug)

EXIT CODES:
    0 - Success
    1 - Operation failed (publish failed, no free slot)
    2 - Database or configuration error
    3 - Invalid input or invalid state (bad ID, post already in flight, etc.)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    #[arg(help = "Enable verbose logging to stderr (useful for debugging)")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List queued posts (pending and in flight by default)
    List {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Filter by platform
        #[arg(short, long)]
        platform: Option<String>,

        /// Filter by status: pending, in_flight, posted, failed, cancelled
        #[arg(short, long, conflicts_with = "all")]
        status: Option<String>,

        /// Include finished posts
        #[arg(short, long)]
        all: bool,
    },

    /// Add a post to a platform queue
    Add {
        /// Target platform: linkedin or threads
        platform: String,

        /// Post content; read from stdin when omitted or '-'
        content: Option<String>,

        /// Link to preview instead of the first URL in the content
        #[arg(long)]
        preview_url: Option<String>,

        /// Preview title used when the page has none
        #[arg(long)]
        preview_title: Option<String>,

        /// Idempotency key; re-adding with the same key returns the existing post
        #[arg(short, long)]
        key: Option<String>,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Cancel queued posts
    Cancel {
        /// Entry IDs to cancel
        ids: Vec<String>,

        /// Cancel every pending post
        #[arg(long, conflicts_with = "ids")]
        all: bool,

        /// With --all, only cancel this platform's posts
        #[arg(short, long, requires = "all")]
        platform: Option<String>,
    },

    /// Move a post to a queue position
    Reorder {
        /// Entry ID to move
        id: String,

        /// Target position (positions are shown by 'list')
        position: i64,
    },

    /// Move posts to the top or bottom of their queue
    Move {
        /// Entry IDs, kept in the given order
        #[arg(required = true)]
        ids: Vec<String>,

        /// Move to the head of the queue
        #[arg(long, conflicts_with = "bottom", required_unless_present = "bottom")]
        top: bool,

        /// Move to the tail of the queue
        #[arg(long)]
        bottom: bool,
    },

    /// Publish a queued post immediately
    Now {
        /// Entry ID to publish
        id: String,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Queue a fresh copy of a finished post
    Requeue {
        /// Entry ID of a posted, failed or cancelled post
        id: String,
    },

    /// Show queue statistics
    Stats {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Manage recurring time slots
    Slots {
        #[command(subcommand)]
        command: SlotCommands,
    },

    /// Show or set a platform's daily post limit (0 clears it)
    Limit {
        /// Target platform: linkedin or threads
        platform: String,

        /// New limit; omit to show the current one
        limit: Option<u32>,
    },
}

#[derive(Subcommand, Debug)]
enum SlotCommands {
    /// List time slots
    List {
        /// Filter by platform
        #[arg(short, long)]
        platform: Option<String>,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Add a time slot
    Add {
        /// Target platform: linkedin or threads
        platform: String,

        /// Wall-clock time, HH:MM
        time: String,

        /// 'daily' or 'weekly:<day>' (e.g. weekly:mon)
        #[arg(short, long, default_value = "daily")]
        recurrence: String,

        /// Posts one occurrence may hold (unlimited when omitted)
        #[arg(short, long)]
        capacity: Option<u32>,
    },

    /// Change a time slot
    Update {
        /// Slot ID
        id: String,

        /// New wall-clock time, HH:MM
        #[arg(short, long)]
        time: Option<String>,

        /// New recurrence
        #[arg(short, long)]
        recurrence: Option<String>,

        /// New capacity
        #[arg(short, long, conflicts_with = "unlimited")]
        capacity: Option<u32>,

        /// Remove the capacity bound
        #[arg(long)]
        unlimited: bool,
    },

    /// Enable a time slot
    Enable {
        /// Slot ID
        id: String,
    },

    /// Disable a time slot
    Disable {
        /// Slot ID
        id: String,
    },

    /// Delete a time slot
    Delete {
        /// Slot ID
        id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "error" };
    LoggingConfig::from_env(default_level, cli.verbose).init();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

/// Execute the command, returning the process exit code
async fn run(cli: Cli) -> Result<i32> {
    let service = QueueService::new().await?;
    debug!(db = %service.config().database.path, "Opened queue database");

    match cli.command {
        Commands::List {
            format,
            platform,
            status,
            all,
        } => {
            cmd_list(
                &service,
                parse_format(&format)?,
                platform.as_deref(),
                status.as_deref(),
                all,
            )
            .await?;
        }
        Commands::Add {
            platform,
            content,
            preview_url,
            preview_title,
            key,
            format,
        } => {
            let hint = (preview_url.is_some() || preview_title.is_some()).then(|| PreviewHint {
                url: preview_url,
                title: preview_title,
            });
            cmd_add(
                &service,
                parse_platform(&platform)?,
                content,
                hint,
                key,
                parse_format(&format)?,
            )
            .await?;
        }
        Commands::Cancel { ids, all, platform } => {
            cmd_cancel(&service, &ids, all, platform.as_deref()).await?;
        }
        Commands::Reorder { id, position } => {
            cmd_reorder(&service, &id, position).await?;
        }
        Commands::Move { ids, top, bottom } => {
            let edge = match (top, bottom) {
                (true, false) => QueueEdge::Top,
                (false, true) => QueueEdge::Bottom,
                _ => {
                    return Err(SlotcastError::InvalidInput(
                        "Specify exactly one of --top or --bottom".to_string(),
                    ))
                }
            };
            cmd_move(&service, &ids, edge).await?;
        }
        Commands::Now { id, format } => {
            return cmd_now(&service, &id, parse_format(&format)?).await;
        }
        Commands::Requeue { id } => {
            validate_id(&id)?;
            let entry = service.requeue(&id).await?;
            println!("{}", entry.id);
        }
        Commands::Stats { format } => {
            cmd_stats(&service, parse_format(&format)?).await?;
        }
        Commands::Slots { command } => {
            cmd_slots(&service, command).await?;
        }
        Commands::Limit { platform, limit } => {
            cmd_limit(&service, parse_platform(&platform)?, limit).await?;
        }
    }

    Ok(0)
}

// ============================================================================
// Queue commands
// ============================================================================

async fn cmd_list(
    service: &QueueService,
    format: OutputFormat,
    platform: Option<&str>,
    status: Option<&str>,
    all: bool,
) -> Result<()> {
    let platform = platform.map(parse_platform).transpose()?;
    let status = status.map(parse_status).transpose()?;

    let mut entries = service.list_queue(platform, status).await?;
    if status.is_none() && !all {
        entries.retain(|e| !e.status.is_terminal());
    }

    match format {
        OutputFormat::Json => print_json(&entries)?,
        OutputFormat::Text => {
            let offset = service.registry().offset();
            let now = Utc::now().timestamp();
            for entry in &entries {
                println!("{}", format_entry_line(entry, offset, now));
            }
        }
    }

    Ok(())
}

async fn cmd_add(
    service: &QueueService,
    platform: Platform,
    content: Option<String>,
    hint: Option<PreviewHint>,
    key: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let content = match content {
        Some(content) if content != "-" => content,
        _ => read_stdin()?,
    };
    if content.trim().is_empty() {
        return Err(SlotcastError::InvalidInput(
            "Content cannot be empty".to_string(),
        ));
    }

    let mut request = EnqueueRequest::new(platform, content);
    request.preview_hint = hint;
    request.idempotency_key = key;

    let entry = service.enqueue(request).await?;
    debug!(entry_id = %entry.id, scheduled_at = entry.scheduled_at, "Queued entry");

    match format {
        OutputFormat::Json => print_json(&entry)?,
        OutputFormat::Text => println!("{}", entry.id),
    }
    Ok(())
}

async fn cmd_cancel(
    service: &QueueService,
    ids: &[String],
    all: bool,
    platform: Option<&str>,
) -> Result<()> {
    let cancelled = if all {
        let platform = platform.map(parse_platform).transpose()?;
        service.cancel_all(platform).await?
    } else {
        if ids.is_empty() {
            return Err(SlotcastError::InvalidInput(
                "Provide entry IDs to cancel, or --all".to_string(),
            ));
        }
        for id in ids {
            validate_id(id)?;
        }
        service.cancel(ids).await?
    };

    println!("Cancelled {} {}", cancelled, plural(cancelled, "post", "posts"));
    Ok(())
}

async fn cmd_reorder(service: &QueueService, id: &str, position: i64) -> Result<()> {
    validate_id(id)?;
    let entries = service.reorder(id, position).await?;

    let offset = service.registry().offset();
    let now = Utc::now().timestamp();
    for entry in &entries {
        println!("{}", format_entry_line(entry, offset, now));
    }
    Ok(())
}

async fn cmd_move(service: &QueueService, ids: &[String], edge: QueueEdge) -> Result<()> {
    for id in ids {
        validate_id(id)?;
    }
    let moved = service.move_to_edge(ids, edge).await?;
    let place = match edge {
        QueueEdge::Top => "top",
        QueueEdge::Bottom => "bottom",
    };
    println!("Moved {} {} to the {}", moved, plural(moved, "post", "posts"), place);
    Ok(())
}

/// Exit code 1 when the publish attempt itself failed
async fn cmd_now(service: &QueueService, id: &str, format: OutputFormat) -> Result<i32> {
    validate_id(id)?;
    let entry = service.post_now(id).await?;

    match format {
        OutputFormat::Json => print_json(&entry)?,
        OutputFormat::Text => match (&entry.status, &entry.failure) {
            (PostStatus::Posted, _) => println!(
                "{}:{}",
                entry.platform,
                entry.platform_post_id.as_deref().unwrap_or_default()
            ),
            (_, Some(failure)) => eprintln!(
                "Publish to {} failed ({}): {}",
                entry.platform, failure.kind, failure.message
            ),
            _ => eprintln!("Publish to {} did not complete", entry.platform),
        },
    }

    Ok(if entry.status == PostStatus::Posted { 0 } else { 1 })
}

async fn cmd_stats(service: &QueueService, format: OutputFormat) -> Result<()> {
    let stats = service.stats().await?;

    if format == OutputFormat::Json {
        return print_json(&stats);
    }

    let offset = service.registry().offset();
    let now = Utc::now().timestamp();
    for platform in &stats.platforms {
        println!("{}:", platform.platform);
        println!("  Pending:   {}", platform.pending);
        println!("  In flight: {}", platform.in_flight);
        println!("  Posted:    {}", platform.posted);
        println!("  Failed:    {}", platform.failed);
        println!("  Cancelled: {}", platform.cancelled);
        println!("  Slots:     {} enabled", platform.enabled_slots);
        match platform.daily_limit {
            Some(limit) => println!("  Limit:     {} per day", limit),
            None => println!("  Limit:     none"),
        }
        if let Some(next) = platform.next_scheduled {
            println!(
                "  Next:      {} ({})",
                format_local(next, offset),
                format_time_until(now, next)
            );
        }
    }
    Ok(())
}

async fn cmd_limit(service: &QueueService, platform: Platform, limit: Option<u32>) -> Result<()> {
    match limit {
        Some(limit) => {
            service.set_daily_limit(platform, limit).await?;
            if limit == 0 {
                println!("Cleared daily limit for {}", platform);
            } else {
                println!("Daily limit for {} set to {}", platform, limit);
            }
        }
        None => match service.registry().daily_limit(platform).await? {
            Some(limit) => println!("{}", limit),
            None => println!("none"),
        },
    }
    Ok(())
}

// ============================================================================
// Slot commands
// ============================================================================

async fn cmd_slots(service: &QueueService, command: SlotCommands) -> Result<()> {
    match command {
        SlotCommands::List { platform, format } => {
            let format = parse_format(&format)?;
            let platform = platform.as_deref().map(parse_platform).transpose()?;
            let slots = service.list_slots(platform).await?;
            match format {
                OutputFormat::Json => print_json(&slots)?,
                OutputFormat::Text => {
                    for slot in &slots {
                        println!("{}", format_slot_line(slot));
                    }
                }
            }
        }
        SlotCommands::Add {
            platform,
            time,
            recurrence,
            capacity,
        } => {
            let slot = service
                .add_slot(NewSlot {
                    platform: parse_platform(&platform)?,
                    recurrence: parse_recurrence(&recurrence)?,
                    time_of_day: parse_time_of_day(&time)?,
                    daily_capacity: capacity,
                })
                .await?;
            println!("{}", slot.id);
        }
        SlotCommands::Update {
            id,
            time,
            recurrence,
            capacity,
            unlimited,
        } => {
            let update = SlotUpdate {
                recurrence: recurrence.as_deref().map(parse_recurrence).transpose()?,
                time_of_day: time.as_deref().map(parse_time_of_day).transpose()?,
                enabled: None,
                daily_capacity: if unlimited { Some(None) } else { capacity.map(Some) },
            };
            let slot = service.update_slot(&id, update).await?;
            println!("{}", format_slot_line(&slot));
        }
        SlotCommands::Enable { id } => {
            let slot = service.set_slot_enabled(&id, true).await?;
            println!("{}", format_slot_line(&slot));
        }
        SlotCommands::Disable { id } => {
            let slot = service.set_slot_enabled(&id, false).await?;
            println!("{}", format_slot_line(&slot));
        }
        SlotCommands::Delete { id } => {
            let slot = service.delete_slot(&id).await?;
            println!("Deleted slot {}", slot.id);
        }
    }
    Ok(())
}

// ============================================================================
// Parsing and formatting helpers
// ============================================================================

fn parse_format(format: &str) -> Result<OutputFormat> {
    match format {
        "text" => Ok(OutputFormat::Text),
        "json" => Ok(OutputFormat::Json),
        other => Err(SlotcastError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            other
        ))),
    }
}

fn parse_platform(platform: &str) -> Result<Platform> {
    platform.parse().map_err(SlotcastError::InvalidInput)
}

fn parse_status(status: &str) -> Result<PostStatus> {
    status.parse().map_err(SlotcastError::InvalidInput)
}

fn parse_recurrence(recurrence: &str) -> Result<Recurrence> {
    recurrence.parse().map_err(SlotcastError::InvalidInput)
}

/// Entry IDs are UUIDs; reject anything else before touching the database
fn validate_id(id: &str) -> Result<()> {
    uuid::Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| SlotcastError::InvalidInput(format!("Invalid entry ID: '{}'", id)))
}

fn read_stdin() -> Result<String> {
    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Err(SlotcastError::InvalidInput(
            "No content provided. Pass it as an argument or pipe it to stdin".to_string(),
        ));
    }

    let mut content = String::new();
    stdin
        .read_to_string(&mut content)
        .map_err(|e| SlotcastError::InvalidInput(format!("Failed to read stdin: {}", e)))?;
    Ok(content.trim_end_matches('\n').to_string())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| SlotcastError::InvalidInput(format!("Failed to serialize output: {}", e)))?;
    println!("{}", json);
    Ok(())
}

fn format_entry_line(entry: &PostEntry, offset: FixedOffset, now: i64) -> String {
    let when = match entry.status {
        PostStatus::Pending => format!(
            "{} ({})",
            format_local(entry.scheduled_at, offset),
            format_time_until(now, entry.scheduled_at)
        ),
        PostStatus::Posted => entry
            .posted_at
            .map(|ts| format!("posted {}", format_local(ts, offset)))
            .unwrap_or_else(|| "posted".to_string()),
        status => format!("{} {}", status, format_local(entry.scheduled_at, offset)),
    };

    format!(
        "{} | {} | #{} | {} | {}",
        entry.id,
        entry.platform,
        entry.position,
        when,
        truncate_content(&entry.content, 50)
    )
}

fn format_slot_line(slot: &TimeSlot) -> String {
    let capacity = slot
        .daily_capacity
        .map(|c| c.to_string())
        .unwrap_or_else(|| "unlimited".to_string());
    format!(
        "{} | {} | {} {} | capacity {} | {}",
        slot.id,
        slot.platform,
        slot.recurrence,
        slot.time_of_day.format("%H:%M"),
        capacity,
        if slot.enabled { "enabled" } else { "disabled" }
    )
}

fn format_local(timestamp: i64, offset: FixedOffset) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.with_timezone(&offset).format("%Y-%m-%d %H:%M %:z").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

/// Truncate content to at most `max_chars` characters with an ellipsis
fn truncate_content(content: &str, max_chars: usize) -> String {
    let single_line = content.replace('\n', " ");
    match single_line.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &single_line[..cut]),
        None => single_line,
    }
}

/// Format time until scheduled time in human-readable form
fn format_time_until(now: i64, scheduled_at: i64) -> String {
    let diff = scheduled_at - now;

    if diff < 0 {
        return "overdue".to_string();
    }
    if diff < 60 {
        return "in <1 minute".to_string();
    }

    // whole minutes keep the output short ("in 1day 2h 5m")
    let rounded = std::time::Duration::from_secs((diff as u64 / 60) * 60);
    format!("in {}", humantime::format_duration(rounded))
}

fn plural<'a>(n: usize, one: &'a str, many: &'a str) -> &'a str {
    if n == 1 {
        one
    } else {
        many
    }
}
