use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

use nag_reminder::bundle::detect_bundle;
use nag_reminder::config::{ReminderDraft, Settings};
use nag_reminder::db::SqliteStore;
use nag_reminder::effects::CompletionDispatcher;
use nag_reminder::ipc::{self, Request, Response};
use nag_reminder::models::{Priority, Recurrence, Reminder, ReminderState};
use nag_reminder::schedule::{NoopTimer, SchedulePublisher};
use nag_reminder::{EscalationEngine, Outcome, ReminderStore, Transition};

#[derive(Parser)]
#[command(name = "remind")]
#[command(about = "Personal reminders with nag mode", long_about = None)]
struct Cli {
    /// Database path (defaults to user data directory)
    #[arg(short, long)]
    db_path: Option<PathBuf>,

    /// Config file (defaults to user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a new reminder
    Add(ReminderArgs),

    /// Replace the configuration of a reminder
    Edit {
        /// Reminder ID
        id: i64,
        #[command(flatten)]
        args: ReminderArgs,
    },

    /// List all reminders
    List,

    /// Complete the current repetition of a reminder
    Complete {
        /// Reminder ID
        id: i64,
    },

    /// Postpone a nagging reminder (re-alerts in 2 minutes)
    Snooze {
        /// Reminder ID
        id: i64,
    },

    /// Resume a paused reminder
    Enable {
        /// Reminder ID
        id: i64,
    },

    /// Pause a reminder without deleting it
    Disable {
        /// Reminder ID
        id: i64,
    },

    /// Delete a reminder
    Delete {
        /// Reminder ID
        id: i64,
    },

    /// Show reminders that would be bundled right now
    Due,

    /// Show recent completions
    History {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show completion streak
    Streak,
}

#[derive(Args)]
struct ReminderArgs {
    /// Reminder title
    title: String,

    /// When: "HH:MM" (today, or tomorrow if already past) or "YYYY-MM-DD HH:MM"
    #[arg(short, long)]
    at: String,

    #[arg(short, long, value_enum, default_value_t = PriorityArg::Medium)]
    priority: PriorityArg,

    #[arg(long)]
    category: Option<String>,

    /// Repeat every day (nag mode is not available)
    #[arg(long, conflicts_with = "weekly")]
    daily: bool,

    /// Repeat on weekdays, 1-7 with Sunday = 1 (e.g. "2,4,6")
    #[arg(long, value_delimiter = ',')]
    weekly: Option<Vec<i64>>,

    /// Keep re-alerting until completed
    #[arg(long)]
    nag: bool,

    /// Minutes between nag alerts
    #[arg(long)]
    interval: Option<i64>,

    /// Number of nag repetitions (default: as many as fit before midnight)
    #[arg(long, allow_negative_numbers = true)]
    repetitions: Option<i64>,

    /// Anchor nag alerts to the original time instead of the last response
    #[arg(long)]
    strict: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum PriorityArg {
    High,
    Medium,
    Low,
}

impl From<PriorityArg> for Priority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::High => Priority::High,
            PriorityArg::Medium => Priority::Medium,
            PriorityArg::Low => Priority::Low,
        }
    }
}

impl ReminderArgs {
    fn to_draft(&self, settings: &Settings, now: DateTime<Local>) -> Result<ReminderDraft> {
        let (start_time, explicit_date) = parse_when(&self.at, now)?;
        let mut draft = ReminderDraft::new(self.title.clone(), start_time);
        draft.priority = self.priority.into();
        draft.category = self.category.clone();
        draft.explicit_date = explicit_date;
        draft.recurrence = match (&self.weekly, self.daily) {
            (Some(_), _) => Recurrence::Weekly,
            (None, true) => Recurrence::Daily,
            (None, false) => Recurrence::OneTime,
        };
        draft.days_of_week = self.weekly.clone().unwrap_or_default();
        draft.nag_enabled = self.nag;
        draft.nag_interval_minutes = match (self.nag, self.interval) {
            (_, Some(interval)) => Some(interval),
            (true, None) => Some(settings.default_nag_interval_minutes),
            (false, None) => None,
        };
        draft.nag_total_repetitions = self.repetitions;
        draft.strict_anchored = self.strict;
        Ok(draft)
    }
}

/// 解析时间；只给钟点时取今天，已经过去就取明天
fn parse_when(input: &str, now: DateTime<Local>) -> Result<(DateTime<Utc>, Option<NaiveDate>)> {
    let input = input.trim();

    if let Ok(naive) = NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M") {
        let local = Local
            .from_local_datetime(&naive)
            .earliest()
            .with_context(|| format!("{} does not exist in the local time zone", input))?;
        return Ok((local.with_timezone(&Utc), Some(naive.date())));
    }

    let time = NaiveTime::parse_from_str(input, "%H:%M")
        .with_context(|| format!("Cannot parse time {:?}, expected HH:MM or YYYY-MM-DD HH:MM", input))?;
    let mut date = now.date_naive();
    loop {
        if let Some(candidate) = Local.from_local_datetime(&date.and_time(time)).earliest() {
            if candidate > now {
                return Ok((candidate.with_timezone(&Utc), None));
            }
        }
        date = date.succ_opt().context("date out of range")?;
        if date > now.date_naive() + Duration::days(2) {
            bail!("Cannot find a future {}", input);
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load_or_default(cli.config.as_deref())?;
    let db_path = settings.resolve_db_path(cli.db_path.clone())?;
    let store = Arc::new(SqliteStore::open(&db_path)?);

    match cli.command {
        Some(Commands::List) | None => {
            let reminders = store.db()?.get_all_reminders()?;
            if reminders.is_empty() {
                println!("No reminders found.");
            } else {
                for reminder in reminders {
                    print_reminder(&reminder);
                }
            }
        }
        Some(Commands::Add(args)) => {
            let now = Local::now();
            let reminder = args.to_draft(&settings, now)?.validate(now.with_timezone(&Utc))?;
            let id = store.db()?.create_reminder(&reminder)?;
            println!("✅ Reminder created with ID: {}", id);
            notify_daemon(&settings, Request::Rearm { id });
        }
        Some(Commands::Edit { id, args }) => {
            let draft = args.to_draft(&settings, Local::now())?;
            run_action(&settings, &store, Request::Edit { id, draft })?;
        }
        Some(Commands::Complete { id }) => {
            run_action(&settings, &store, Request::Complete { id })?;
        }
        Some(Commands::Snooze { id }) => {
            run_action(&settings, &store, Request::Snooze { id })?;
        }
        Some(Commands::Enable { id }) => {
            run_action(&settings, &store, Request::Enable { id })?;
        }
        Some(Commands::Disable { id }) => {
            run_action(&settings, &store, Request::Disable { id })?;
        }
        Some(Commands::Delete { id }) => {
            // 先让守护进程撤销唤醒
            notify_daemon(&settings, Request::Disable { id });
            if store.db()?.delete_reminder(id)? {
                println!("🗑  Reminder {} deleted", id);
            } else {
                println!("❌ Reminder {} not found", id);
            }
        }
        Some(Commands::Due) => {
            let snapshot = store.snapshot()?;
            let bundle = detect_bundle(&snapshot, Utc::now());
            if bundle.is_empty() {
                println!("Nothing to bundle right now.");
            } else {
                for (i, reminder) in bundle.iter().enumerate() {
                    let marker = if i == 0 { "★" } else { " " };
                    print!("{} ", marker);
                    print_reminder(reminder);
                }
            }
        }
        Some(Commands::History { limit }) => {
            let entries = store.db()?.get_history(limit)?;
            if entries.is_empty() {
                println!("No completions yet.");
            }
            for entry in entries {
                println!(
                    "{}  [{}] {} ({} repetitions)",
                    entry.completed_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                    entry.reminder_id,
                    entry.title,
                    entry.repetitions
                );
            }
        }
        Some(Commands::Streak) => {
            let streak = store.db()?.get_streak()?;
            println!(
                "🔥 {} day streak (best {}), {} completions total",
                streak.current_days, streak.best_days, streak.total_completions
            );
        }
    }

    Ok(())
}

/// 守护进程在运行时交给它处理，否则直接改数据库
fn run_action(settings: &Settings, store: &Arc<SqliteStore>, request: Request) -> Result<()> {
    let response = match ipc::send(&settings.socket_name, &request) {
        Ok(response) => response,
        Err(_) => {
            let engine = EscalationEngine::new(
                store.clone(),
                SchedulePublisher::new(Arc::new(NoopTimer)),
                CompletionDispatcher::new(store.clone(), store.clone()),
            );
            ipc::handle(&engine, request, Utc::now())
        }
    };

    match response {
        Response::Outcome(outcome) => print_outcome(&outcome),
        Response::NotFound { id } => println!("❌ Reminder {} not found", id),
        Response::Error { message } => bail!("{}", message),
        Response::Armed { .. } | Response::Pong => {}
    }
    Ok(())
}

fn notify_daemon(settings: &Settings, request: Request) {
    if ipc::send(&settings.socket_name, &request).is_err() {
        println!("(daemon not running; it will pick up the change on start)");
    }
}

fn print_outcome(outcome: &Outcome) {
    let id = outcome.reminder.id.unwrap_or_default();
    let local = |t: DateTime<Utc>| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string();
    match &outcome.transition {
        Transition::Fired => println!("⏰ Reminder {} is due", id),
        Transition::Advanced { next_wake } => println!(
            "➡️  Reminder {} repetition {}/{}, next alert at {}",
            id,
            outcome.reminder.current_repetition + 1,
            outcome.reminder.nag.total_repetitions,
            local(*next_wake)
        ),
        Transition::Completed {
            next_occurrence: Some(next),
            ..
        } => println!("✅ Reminder {} done, next occurrence {}", id, local(*next)),
        Transition::Completed { .. } => println!("✅ Reminder {} completed", id),
        Transition::Snoozed { wake_at } => {
            println!("🚨 Reminder {} snoozed, re-alert at {}", id, local(*wake_at))
        }
        Transition::Enabled { wake_at: Some(at) } => {
            println!("▶️  Reminder {} enabled, next alert at {}", id, local(*at))
        }
        Transition::Enabled { wake_at: None } => println!("▶️  Reminder {} enabled", id),
        Transition::Edited { wake_at: Some(at) } => {
            println!("✅ Reminder {} updated, next alert at {}", id, local(*at))
        }
        Transition::Edited { wake_at: None } => println!("✅ Reminder {} updated", id),
        Transition::Disabled => println!("⏸  Reminder {} paused", id),
        Transition::Ignored { reason } => println!("Nothing to do for reminder {} ({:?})", id, reason),
    }
}

fn print_reminder(reminder: &Reminder) {
    let state_icon = if !reminder.enabled {
        "⏸"
    } else {
        match reminder.state {
            ReminderState::Completed => "✅",
            ReminderState::PanicLoop { .. } => "🚨",
            ReminderState::Firing | ReminderState::Nagging => "🔔",
            ReminderState::Scheduled => "⭕",
        }
    };
    let priority_icon = match reminder.priority {
        Priority::High => "🔴",
        Priority::Medium => "🟡",
        Priority::Low => "🟢",
    };
    let nag = if reminder.nag.is_effective() {
        format!(
            " [{}/{} every {}m{}]",
            reminder.current_repetition + 1,
            reminder.nag.total_repetitions,
            reminder.nag.interval_minutes,
            if reminder.strict_anchored { ", strict" } else { "" }
        )
    } else {
        String::new()
    };
    println!(
        "[{}] {} {} {} @ {}{}",
        reminder.id.unwrap_or_default(),
        state_icon,
        priority_icon,
        reminder.title,
        reminder.start_time.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
        nag
    );
}
