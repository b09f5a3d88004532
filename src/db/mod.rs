use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::effects::{HistorySink, ProgressTracker};
use crate::engine::ReminderStore;
use crate::models::{
    HistoryEntry, NagSettings, Priority, Recurrence, Reminder, ReminderState, StreakSummary,
};

const REMINDER_COLUMNS: &str = "id, title, priority, category, start_time, original_start_time,
    anchor_time, explicit_date, days_of_week, recurrence, nag_enabled, nag_interval_minutes,
    nag_total_repetitions, current_repetition, state, panic_since, enabled, strict_anchored,
    last_fired_at, created_at, updated_at";

pub struct Database {
    conn: Connection,
}

impl Database {
    /// 打开或创建数据库
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open database")?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// 初始化数据库schema
    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS reminders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                priority INTEGER NOT NULL,
                category TEXT,
                start_time TEXT NOT NULL,
                original_start_time TEXT NOT NULL,
                anchor_time TEXT NOT NULL,
                explicit_date TEXT,
                days_of_week TEXT NOT NULL DEFAULT '',
                recurrence INTEGER NOT NULL,
                nag_enabled INTEGER NOT NULL DEFAULT 0,
                nag_interval_minutes INTEGER NOT NULL DEFAULT 0,
                nag_total_repetitions INTEGER NOT NULL DEFAULT 0,
                current_repetition INTEGER NOT NULL DEFAULT 0,
                state INTEGER NOT NULL DEFAULT 0,
                panic_since TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                strict_anchored INTEGER NOT NULL DEFAULT 0,
                last_fired_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                reminder_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                category TEXT,
                occurrence TEXT NOT NULL,
                repetitions INTEGER NOT NULL,
                completed_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS streak (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                current_days INTEGER NOT NULL,
                best_days INTEGER NOT NULL,
                total_completions INTEGER NOT NULL,
                last_day TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_reminders_start_time ON reminders(start_time);
            CREATE INDEX IF NOT EXISTS idx_reminders_state ON reminders(state);
            CREATE INDEX IF NOT EXISTS idx_history_reminder_id ON history(reminder_id);
            "#,
        )?;
        Ok(())
    }

    // ==================== Reminder CRUD ====================

    /// 创建提醒
    pub fn create_reminder(&self, reminder: &Reminder) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO reminders (title, priority, category, start_time, original_start_time,
                                    anchor_time, explicit_date, days_of_week, recurrence,
                                    nag_enabled, nag_interval_minutes, nag_total_repetitions,
                                    current_repetition, state, panic_since, enabled,
                                    strict_anchored, last_fired_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                     ?17, ?18, ?19, ?20)",
            params![
                reminder.title,
                reminder.priority as i32,
                reminder.category,
                reminder.start_time,
                reminder.original_start_time,
                reminder.anchor_time,
                reminder.explicit_date,
                join_weekdays(&reminder.days_of_week),
                reminder.recurrence as i32,
                reminder.nag.enabled,
                reminder.nag.interval_minutes,
                reminder.nag.total_repetitions,
                reminder.current_repetition,
                reminder.state.code(),
                reminder.panic_loop_start_time(),
                reminder.enabled,
                reminder.strict_anchored,
                reminder.last_fired_at,
                reminder.created_at,
                reminder.updated_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// 按 id 获取提醒
    pub fn get_reminder(&self, id: i64) -> Result<Option<Reminder>> {
        let sql = format!("SELECT {} FROM reminders WHERE id = ?1", REMINDER_COLUMNS);
        let reminder = self
            .conn
            .query_row(&sql, params![id], reminder_from_row)
            .optional()?;
        Ok(reminder)
    }

    /// 获取所有提醒
    pub fn get_all_reminders(&self) -> Result<Vec<Reminder>> {
        let sql = format!(
            "SELECT {} FROM reminders ORDER BY start_time ASC, priority DESC",
            REMINDER_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let reminders = stmt
            .query_map([], reminder_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(reminders)
    }

    /// 获取未暂停、未完成的提醒，按 id 排序
    pub fn get_active_reminders(&self) -> Result<Vec<Reminder>> {
        let sql = format!(
            "SELECT {} FROM reminders WHERE enabled = 1 AND state != ?1 ORDER BY id ASC",
            REMINDER_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let reminders = stmt
            .query_map(params![ReminderState::Completed.code()], reminder_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(reminders)
    }

    /// 更新提醒
    pub fn update_reminder(&self, reminder: &Reminder) -> Result<()> {
        let id = reminder.id.ok_or_else(|| anyhow!("Cannot update a reminder without id"))?;
        let changed = self.conn.execute(
            "UPDATE reminders SET title = ?1, priority = ?2, category = ?3, start_time = ?4,
                                  anchor_time = ?5, explicit_date = ?6, days_of_week = ?7,
                                  recurrence = ?8, nag_enabled = ?9, nag_interval_minutes = ?10,
                                  nag_total_repetitions = ?11, current_repetition = ?12,
                                  state = ?13, panic_since = ?14, enabled = ?15,
                                  strict_anchored = ?16, last_fired_at = ?17, updated_at = ?18
             WHERE id = ?19",
            params![
                reminder.title,
                reminder.priority as i32,
                reminder.category,
                reminder.start_time,
                reminder.anchor_time,
                reminder.explicit_date,
                join_weekdays(&reminder.days_of_week),
                reminder.recurrence as i32,
                reminder.nag.enabled,
                reminder.nag.interval_minutes,
                reminder.nag.total_repetitions,
                reminder.current_repetition,
                reminder.state.code(),
                reminder.panic_loop_start_time(),
                reminder.enabled,
                reminder.strict_anchored,
                reminder.last_fired_at,
                reminder.updated_at,
                id,
            ],
        )?;
        if changed == 0 {
            return Err(anyhow!("Reminder {} does not exist", id));
        }
        Ok(())
    }

    /// 删除提醒
    pub fn delete_reminder(&self, id: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM reminders WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    // ==================== History ====================

    /// 追加完成记录
    pub fn append_history(&self, entry: &HistoryEntry) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO history (reminder_id, title, category, occurrence, repetitions, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.reminder_id,
                entry.title,
                entry.category,
                entry.occurrence,
                entry.repetitions,
                entry.completed_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// 最近的完成记录
    pub fn get_history(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, reminder_id, title, category, occurrence, repetitions, completed_at
             FROM history
             ORDER BY completed_at DESC, id DESC
             LIMIT ?1",
        )?;

        let entries = stmt
            .query_map(params![limit as i64], |row| {
                Ok(HistoryEntry {
                    id: Some(row.get(0)?),
                    reminder_id: row.get(1)?,
                    title: row.get(2)?,
                    category: row.get(3)?,
                    occurrence: row.get(4)?,
                    repetitions: row.get(5)?,
                    completed_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    // ==================== Streak ====================

    /// 当前连续完成统计
    pub fn get_streak(&self) -> Result<StreakSummary> {
        let summary = self
            .conn
            .query_row(
                "SELECT current_days, best_days, total_completions, last_day FROM streak WHERE id = 1",
                [],
                |row| {
                    Ok(StreakSummary {
                        current_days: row.get(0)?,
                        best_days: row.get(1)?,
                        total_completions: row.get::<_, i64>(2)? as u64,
                        last_day: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(summary.unwrap_or_default())
    }

    /// 记录某一天有一次完成
    pub fn record_completion_day(&self, day: NaiveDate) -> Result<StreakSummary> {
        let mut summary = self.get_streak()?;
        summary.current_days = match summary.last_day {
            Some(last) if last == day => summary.current_days.max(1),
            Some(last) if last.succ_opt() == Some(day) => summary.current_days + 1,
            // 时钟回拨时不重置
            Some(last) if last > day => summary.current_days,
            _ => 1,
        };
        summary.best_days = summary.best_days.max(summary.current_days);
        summary.total_completions += 1;
        summary.last_day = Some(summary.last_day.map_or(day, |last| last.max(day)));

        self.conn.execute(
            "INSERT INTO streak (id, current_days, best_days, total_completions, last_day)
             VALUES (1, ?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET current_days = excluded.current_days,
                                           best_days = excluded.best_days,
                                           total_completions = excluded.total_completions,
                                           last_day = excluded.last_day",
            params![
                summary.current_days,
                summary.best_days,
                summary.total_completions as i64,
                summary.last_day,
            ],
        )?;
        Ok(summary)
    }
}

fn reminder_from_row(row: &Row<'_>) -> rusqlite::Result<Reminder> {
    let panic_since: Option<DateTime<Utc>> = row.get(15)?;
    Ok(Reminder {
        id: Some(row.get(0)?),
        title: row.get(1)?,
        priority: Priority::from_i32(row.get(2)?),
        category: row.get(3)?,
        start_time: row.get(4)?,
        original_start_time: row.get(5)?,
        anchor_time: row.get(6)?,
        explicit_date: row.get(7)?,
        days_of_week: split_weekdays(&row.get::<_, String>(8)?),
        recurrence: Recurrence::from_i32(row.get(9)?),
        nag: NagSettings {
            enabled: row.get(10)?,
            interval_minutes: row.get(11)?,
            total_repetitions: row.get(12)?,
        },
        current_repetition: row.get(13)?,
        state: ReminderState::from_code(row.get(14)?, panic_since),
        enabled: row.get(16)?,
        strict_anchored: row.get(17)?,
        last_fired_at: row.get(18)?,
        created_at: row.get(19)?,
        updated_at: row.get(20)?,
    })
}

fn join_weekdays(days: &[u8]) -> String {
    days.iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn split_weekdays(raw: &str) -> Vec<u8> {
    raw.split(',')
        .filter_map(|d| d.trim().parse().ok())
        .collect()
}

/// 多线程共享的数据库，实现引擎需要的持久化、历史和统计接口
pub struct SqliteStore {
    db: Mutex<Database>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn db(&self) -> Result<MutexGuard<'_, Database>> {
        self.db.lock().map_err(|_| anyhow!("database mutex poisoned"))
    }
}

impl ReminderStore for SqliteStore {
    fn read(&self, id: i64) -> Result<Option<Reminder>> {
        self.db()?.get_reminder(id)
    }

    fn write(&self, reminder: &Reminder) -> Result<()> {
        self.db()?.update_reminder(reminder)
    }

    fn snapshot(&self) -> Result<Vec<Reminder>> {
        self.db()?.get_active_reminders()
    }
}

impl HistorySink for SqliteStore {
    fn append(&self, entry: &HistoryEntry) -> Result<()> {
        self.db()?.append_history(entry)?;
        Ok(())
    }
}

impl ProgressTracker for SqliteStore {
    fn on_task_completed(&self, reminder_id: i64) -> Result<()> {
        let summary = self.db()?.record_completion_day(Local::now().date_naive())?;
        tracing::debug!(
            reminder_id,
            current_days = summary.current_days,
            total = summary.total_completions,
            "streak updated"
        );
        Ok(())
    }
}
