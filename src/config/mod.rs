//! 配置：程序设置文件和提醒的录入校验
//!
//! 提醒配置在写入数据库之前校验，非法配置不会进入状态机。

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::models::{NagSettings, Priority, Recurrence, Reminder, ReminderState};
use crate::repetition::max_repetitions;

/// 程序设置 (config.toml)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// 数据库路径，默认在用户数据目录
    pub db_path: Option<PathBuf>,
    /// 守护进程的本地 socket 名称
    pub socket_name: String,
    /// 添加提醒时不指定间隔时使用
    pub default_nag_interval_minutes: i64,
    pub notification_timeout_ms: u32,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: None,
            socket_name: "nag-reminder.sock".to_string(),
            default_nag_interval_minutes: 10,
            notification_timeout_ms: 5000,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// 读取设置文件，文件不存在时使用默认值
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let settings = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        Ok(settings)
    }

    /// 按 --config 参数或默认位置读取
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match default_config_path() {
                Some(path) => Self::load(&path),
                None => Ok(Self::default()),
            },
        }
    }

    /// 确定数据库路径，必要时创建数据目录
    pub fn resolve_db_path(&self, override_path: Option<PathBuf>) -> Result<PathBuf> {
        if let Some(path) = override_path.or_else(|| self.db_path.clone()) {
            return Ok(path);
        }
        let proj_dirs = project_dirs().context("Failed to get project directories")?;
        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir).context("Failed to create data directory")?;
        Ok(data_dir.join("reminders.db"))
    }
}

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "nag-reminder", "remind")
}

pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}

/// 催促间隔上限：一天，再长也排不进午夜前的重复
pub const MAX_NAG_INTERVAL_MINUTES: i64 = 24 * 60;

/// 用户录入的提醒配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderDraft {
    pub title: String,
    pub priority: Priority,
    pub category: Option<String>,
    pub start_time: DateTime<Utc>,
    pub explicit_date: Option<NaiveDate>,
    pub recurrence: Recurrence,
    pub days_of_week: Vec<i64>,
    pub nag_enabled: bool,
    pub nag_interval_minutes: Option<i64>,
    /// 不填时按午夜前能容纳的次数计算
    pub nag_total_repetitions: Option<i64>,
    pub strict_anchored: bool,
}

impl ReminderDraft {
    pub fn new(title: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            priority: Priority::Medium,
            category: None,
            start_time,
            explicit_date: None,
            recurrence: Recurrence::OneTime,
            days_of_week: Vec::new(),
            nag_enabled: false,
            nag_interval_minutes: None,
            nag_total_repetitions: None,
            strict_anchored: false,
        }
    }

    /// 校验并生成新提醒（按本机时区计算午夜）
    pub fn validate(&self, now: DateTime<Utc>) -> Result<Reminder, ConfigError> {
        self.validate_in(now, &Local)
    }

    pub fn validate_in<Tz: TimeZone>(&self, now: DateTime<Utc>, tz: &Tz) -> Result<Reminder, ConfigError> {
        let mut reminder = Reminder::new(self.title.trim().to_string(), self.start_time);
        self.fill(&mut reminder, tz)?;
        reminder.created_at = now;
        reminder.updated_at = now;
        Ok(reminder)
    }

    /// 编辑已有提醒：重新校验，重置升级进度，保留 id 和最初的锚点
    pub fn apply_to(&self, existing: &Reminder, now: DateTime<Utc>) -> Result<Reminder, ConfigError> {
        self.apply_to_in(existing, now, &Local)
    }

    pub fn apply_to_in<Tz: TimeZone>(
        &self,
        existing: &Reminder,
        now: DateTime<Utc>,
        tz: &Tz,
    ) -> Result<Reminder, ConfigError> {
        let mut reminder = existing.clone();
        reminder.title = self.title.trim().to_string();
        reminder.start_time = self.start_time;
        reminder.anchor_time = self.start_time;
        reminder.current_repetition = 0;
        reminder.state = ReminderState::Scheduled;
        reminder.last_fired_at = None;
        self.fill(&mut reminder, tz)?;
        reminder.updated_at = now;
        Ok(reminder)
    }

    fn fill<Tz: TimeZone>(&self, reminder: &mut Reminder, tz: &Tz) -> Result<(), ConfigError> {
        if reminder.title.is_empty() {
            return Err(ConfigError::EmptyTitle);
        }

        reminder.priority = self.priority;
        reminder.category = self
            .category
            .as_ref()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        reminder.recurrence = self.recurrence;
        reminder.strict_anchored = self.strict_anchored;
        reminder.explicit_date = match self.recurrence {
            Recurrence::OneTime => self.explicit_date,
            _ => None,
        };
        reminder.days_of_week = match self.recurrence {
            Recurrence::Weekly => validate_weekdays(&self.days_of_week)?,
            _ => Vec::new(),
        };
        reminder.nag = self.nag_settings(tz)?;
        Ok(())
    }

    fn nag_settings<Tz: TimeZone>(&self, tz: &Tz) -> Result<NagSettings, ConfigError> {
        if let Some(total) = self.nag_total_repetitions {
            if total < 0 {
                return Err(ConfigError::NegativeRepetitions(total));
            }
        }

        if self.recurrence == Recurrence::Daily {
            if self.nag_enabled {
                tracing::debug!(title = %self.title, "nag mode is not available for daily reminders");
            }
            return Ok(NagSettings::disabled());
        }
        if !self.nag_enabled {
            return Ok(NagSettings::disabled());
        }

        let interval_minutes = self.nag_interval_minutes.unwrap_or(0);
        if !(1..=MAX_NAG_INTERVAL_MINUTES).contains(&interval_minutes) {
            return Err(ConfigError::InvalidNagInterval(interval_minutes));
        }

        let mut nag = NagSettings {
            enabled: true,
            interval_minutes,
            total_repetitions: 0,
        };
        let interval = nag
            .interval()
            .ok_or(ConfigError::InvalidNagInterval(interval_minutes))?;
        nag.total_repetitions = match self.nag_total_repetitions {
            Some(total) => u32::try_from(total).unwrap_or(u32::MAX),
            None => max_repetitions(&self.start_time.with_timezone(tz), interval),
        };
        Ok(nag)
    }
}

fn validate_weekdays(days: &[i64]) -> Result<Vec<u8>, ConfigError> {
    if days.is_empty() || days.iter().any(|d| !(1..=7).contains(d)) {
        return Err(ConfigError::InvalidWeekdays(days.to_vec()));
    }
    let mut out: Vec<u8> = days.iter().map(|d| *d as u8).collect();
    out.sort_unstable();
    out.dedup();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn evening() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 23, 10, 0).unwrap()
    }

    fn nag_draft() -> ReminderDraft {
        let mut draft = ReminderDraft::new("Take out trash", evening());
        draft.nag_enabled = true;
        draft.nag_interval_minutes = Some(15);
        draft
    }

    #[test]
    fn test_empty_title_rejected() {
        let draft = ReminderDraft::new("   ", evening());
        assert_eq!(draft.validate_in(evening(), &Utc).unwrap_err(), ConfigError::EmptyTitle);
    }

    #[test]
    fn test_nag_interval_must_be_positive() {
        let mut draft = nag_draft();
        draft.nag_interval_minutes = Some(0);
        assert_eq!(
            draft.validate_in(evening(), &Utc).unwrap_err(),
            ConfigError::InvalidNagInterval(0)
        );

        draft.nag_interval_minutes = None;
        assert!(draft.validate_in(evening(), &Utc).is_err());
    }

    #[test]
    fn test_nag_interval_longer_than_a_day_rejected() {
        let mut draft = nag_draft();
        draft.nag_interval_minutes = Some(i64::MAX);
        assert_eq!(
            draft.validate_in(evening(), &Utc).unwrap_err(),
            ConfigError::InvalidNagInterval(i64::MAX)
        );

        draft.nag_total_repetitions = Some(3);
        draft.nag_interval_minutes = Some(MAX_NAG_INTERVAL_MINUTES + 1);
        assert!(draft.validate_in(evening(), &Utc).is_err());

        draft.nag_interval_minutes = Some(MAX_NAG_INTERVAL_MINUTES);
        let reminder = draft.validate_in(evening(), &Utc).unwrap();
        assert_eq!(reminder.nag.interval_minutes, MAX_NAG_INTERVAL_MINUTES);
    }

    #[test]
    fn test_negative_repetitions_rejected() {
        let mut draft = nag_draft();
        draft.nag_total_repetitions = Some(-1);
        assert_eq!(
            draft.validate_in(evening(), &Utc).unwrap_err(),
            ConfigError::NegativeRepetitions(-1)
        );
    }

    #[test]
    fn test_repetitions_computed_until_midnight() {
        let reminder = nag_draft().validate_in(evening(), &Utc).unwrap();
        assert!(reminder.nag.enabled);
        assert_eq!(reminder.nag.total_repetitions, 3);
        assert_eq!(reminder.current_repetition, 0);
        assert_eq!(reminder.state, ReminderState::Scheduled);
    }

    #[test]
    fn test_user_set_repetitions_win() {
        let mut draft = nag_draft();
        draft.nag_total_repetitions = Some(8);
        let reminder = draft.validate_in(evening(), &Utc).unwrap();
        assert_eq!(reminder.nag.total_repetitions, 8);
    }

    #[test]
    fn test_daily_forces_nag_off() {
        let mut draft = nag_draft();
        draft.recurrence = Recurrence::Daily;
        let reminder = draft.validate_in(evening(), &Utc).unwrap();
        assert!(!reminder.nag.enabled);
        assert!(!reminder.nag.is_effective());
    }

    #[test]
    fn test_weekly_days_validated() {
        let mut draft = ReminderDraft::new("Gym", evening());
        draft.recurrence = Recurrence::Weekly;
        assert!(matches!(
            draft.validate_in(evening(), &Utc),
            Err(ConfigError::InvalidWeekdays(_))
        ));

        draft.days_of_week = vec![8];
        assert!(draft.validate_in(evening(), &Utc).is_err());

        draft.days_of_week = vec![6, 2, 2];
        let reminder = draft.validate_in(evening(), &Utc).unwrap();
        assert_eq!(reminder.days_of_week, vec![2, 6]);
    }

    #[test]
    fn test_edit_resets_escalation_and_keeps_origin() {
        let mut existing = nag_draft().validate_in(evening(), &Utc).unwrap();
        existing.id = Some(3);
        existing.current_repetition = 2;
        existing.state = ReminderState::PanicLoop { since: evening() };

        let mut draft = nag_draft();
        draft.start_time = evening() - Duration::hours(2);
        let now = evening() + Duration::minutes(1);
        let edited = draft.apply_to_in(&existing, now, &Utc).unwrap();

        assert_eq!(edited.id, Some(3));
        assert_eq!(edited.current_repetition, 0);
        assert_eq!(edited.state, ReminderState::Scheduled);
        assert_eq!(edited.original_start_time, evening());
        assert_eq!(edited.anchor_time, evening() - Duration::hours(2));
        // 21:10 到午夜 170 分钟
        assert_eq!(edited.nag.total_repetitions, 11);
    }

    #[test]
    fn test_settings_parse_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "socket_name = \"test.sock\"\nlog_level = \"debug\"\n").unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.socket_name, "test.sock");
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.default_nag_interval_minutes, 10);
    }

    #[test]
    fn test_settings_missing_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }
}
