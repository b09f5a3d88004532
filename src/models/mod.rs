use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// 提醒优先级
///
/// 只影响捆绑提醒中的排序，高优先级排在最前面。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl Priority {
    /// 排序权重: High=0, Medium=1, Low=2
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }

    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => Priority::Low,
            2 => Priority::Medium,
            _ => Priority::High,
        }
    }
}

/// 重复方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recurrence {
    OneTime = 0,
    Daily = 1,
    Weekly = 2,
}

impl Recurrence {
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => Recurrence::Daily,
            2 => Recurrence::Weekly,
            _ => Recurrence::OneTime,
        }
    }
}

/// 催促模式参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NagSettings {
    pub enabled: bool,
    pub interval_minutes: i64,
    pub total_repetitions: u32,
}

impl NagSettings {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            interval_minutes: 0,
            total_repetitions: 0,
        }
    }

    /// 次数为 0 时即使开启也没有效果
    pub fn is_effective(&self) -> bool {
        self.enabled && self.interval_minutes > 0 && self.total_repetitions > 0
    }

    /// 超出 chrono 可表示范围时返回 None
    pub fn interval(&self) -> Option<Duration> {
        Duration::try_minutes(self.interval_minutes)
    }
}

/// 升级状态
///
/// 直接存储状态标签，布尔标记（是否完成、是否处于 panic loop）都由它推导。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReminderState {
    /// 等待第一次触发
    Scheduled,
    /// 已触发，尚未推进重复次数
    Firing,
    /// 催促序列中，current_repetition > 0
    Nagging,
    /// 用户主动推迟后进入的紧急重提醒
    PanicLoop { since: DateTime<Utc> },
    Completed,
}

impl ReminderState {
    pub fn code(&self) -> i32 {
        match self {
            ReminderState::Scheduled => 0,
            ReminderState::Firing => 1,
            ReminderState::Nagging => 2,
            ReminderState::PanicLoop { .. } => 3,
            ReminderState::Completed => 4,
        }
    }

    pub fn from_code(code: i32, panic_since: Option<DateTime<Utc>>) -> Self {
        match (code, panic_since) {
            (1, _) => ReminderState::Firing,
            (2, _) => ReminderState::Nagging,
            (3, Some(since)) => ReminderState::PanicLoop { since },
            // 没有开始时间的 panic loop 记录退化为普通催促
            (3, None) => ReminderState::Nagging,
            (4, _) => ReminderState::Completed,
            _ => ReminderState::Scheduled,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReminderState::Scheduled => "scheduled",
            ReminderState::Firing => "firing",
            ReminderState::Nagging => "nagging",
            ReminderState::PanicLoop { .. } => "panic",
            ReminderState::Completed => "completed",
        }
    }
}

/// 提醒数据模型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: Option<i64>,
    pub title: String,
    pub priority: Priority,
    pub category: Option<String>,
    /// 下一次唤醒时间
    pub start_time: DateTime<Utc>,
    /// 创建时确定，之后不再修改
    pub original_start_time: DateTime<Utc>,
    /// 当前这一次发生的锚点，严格模式以它为基准
    pub anchor_time: DateTime<Utc>,
    pub explicit_date: Option<NaiveDate>,
    /// 1-7，周日为 1
    pub days_of_week: Vec<u8>,
    pub recurrence: Recurrence,
    pub nag: NagSettings,
    pub current_repetition: u32,
    pub state: ReminderState,
    pub enabled: bool,
    pub strict_anchored: bool,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reminder {
    pub fn new(title: String, start_time: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            title,
            priority: Priority::Medium,
            category: None,
            start_time,
            original_start_time: start_time,
            anchor_time: start_time,
            explicit_date: None,
            days_of_week: Vec::new(),
            recurrence: Recurrence::OneTime,
            nag: NagSettings::disabled(),
            current_repetition: 0,
            state: ReminderState::Scheduled,
            enabled: true,
            strict_anchored: false,
            last_fired_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == ReminderState::Completed
    }

    pub fn is_in_panic_loop(&self) -> bool {
        matches!(self.state, ReminderState::PanicLoop { .. })
    }

    pub fn panic_loop_start_time(&self) -> Option<DateTime<Utc>> {
        match self.state {
            ReminderState::PanicLoop { since } => Some(since),
            _ => None,
        }
    }

    /// 未暂停且未完成
    pub fn is_active(&self) -> bool {
        self.enabled && !self.is_completed()
    }

    /// 当前是否为最后一次重复（或根本没有催促）
    pub fn is_final_repetition(&self) -> bool {
        !self.nag.is_effective() || self.current_repetition + 1 >= self.nag.total_repetitions
    }

    /// 第一次触发之后才接受完成/推迟操作
    pub fn has_fired(&self) -> bool {
        matches!(
            self.state,
            ReminderState::Firing | ReminderState::Nagging | ReminderState::PanicLoop { .. }
        )
    }
}

/// 完成历史记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Option<i64>,
    pub reminder_id: i64,
    pub title: String,
    pub category: Option<String>,
    /// 完成的是哪一次发生
    pub occurrence: DateTime<Utc>,
    pub repetitions: u32,
    pub completed_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn for_completion(reminder: &Reminder, reminder_id: i64, completed_at: DateTime<Utc>) -> Self {
        Self {
            id: None,
            reminder_id,
            title: reminder.title.clone(),
            category: reminder.category.clone(),
            occurrence: reminder.anchor_time,
            repetitions: reminder.current_repetition + 1,
            completed_at,
        }
    }
}

/// 连续完成统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakSummary {
    pub current_days: u32,
    pub best_days: u32,
    pub total_completions: u64,
    pub last_day: Option<NaiveDate>,
}
