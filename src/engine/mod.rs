//! 提醒升级状态机
//!
//! ```text
//! Scheduled --wake--> Firing --complete--> Nagging --complete--> ... --complete(最后一次)--> Completed
//!                        |                    |
//!                        +------snooze--------+--> PanicLoop --snooze--> PanicLoop
//!                                                     |
//!                                                     +--complete--> Nagging / Completed
//! ```
//!
//! 所有操作都在按提醒 id 加锁的临界区内完成“读取、决定、写入、发布唤醒”；
//! 不同 id 之间互不阻塞。过期的操作（已完成、已暂停、尚未触发）直接忽略，
//! 因为重复投递的唤醒信号和用户操作是正常现象。

mod recurrence;

pub use recurrence::next_occurrence;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::ReminderDraft;
use crate::effects::CompletionDispatcher;
use crate::error::{EngineError, EngineResult};
use crate::models::{Reminder, ReminderState};
use crate::schedule::SchedulePublisher;

/// panic loop 固定的重提醒延迟，与严格/灵活模式无关
pub const PANIC_DELAY_SECS: i64 = 120;

/// 唤醒信号允许比 start_time 提前的秒数
pub const WAKE_TOLERANCE_SECS: i64 = 5;

/// 持久化接口
pub trait ReminderStore: Send + Sync {
    fn read(&self, id: i64) -> Result<Option<Reminder>>;
    fn write(&self, reminder: &Reminder) -> Result<()>;
    /// 所有未暂停、未完成的提醒
    fn snapshot(&self) -> Result<Vec<Reminder>>;
}

/// 被忽略的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stale {
    Disabled,
    Completed,
    NotFired,
    NagInactive,
    Early,
    AlreadyAlerted,
    AlreadyEnabled,
    AlreadyDisabled,
}

/// 一次操作产生的状态变化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    /// 需要展示提醒
    Fired,
    /// 催促序列推进到下一次
    Advanced { next_wake: DateTime<Utc> },
    /// 本次发生已完成；重复提醒附带下一次发生的时间
    Completed {
        effects_dispatched: bool,
        next_occurrence: Option<DateTime<Utc>>,
    },
    Snoozed { wake_at: DateTime<Utc> },
    Enabled { wake_at: Option<DateTime<Utc>> },
    /// 配置已修改，进度重置
    Edited { wake_at: Option<DateTime<Utc>> },
    Disabled,
    Ignored { reason: Stale },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub reminder: Reminder,
    pub transition: Transition,
}

impl Outcome {
    fn new(reminder: Reminder, transition: Transition) -> Self {
        Self { reminder, transition }
    }

    fn ignored(reminder: Reminder, reason: Stale) -> Self {
        tracing::debug!(reminder_id = ?reminder.id, ?reason, "action ignored");
        Self::new(reminder, Transition::Ignored { reason })
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self.transition, Transition::Ignored { .. })
    }
}

/// 升级引擎
pub struct EscalationEngine {
    store: Arc<dyn ReminderStore>,
    publisher: SchedulePublisher,
    effects: CompletionDispatcher,
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl EscalationEngine {
    pub fn new(
        store: Arc<dyn ReminderStore>,
        publisher: SchedulePublisher,
        effects: CompletionDispatcher,
    ) -> Self {
        Self {
            store,
            publisher,
            effects,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ReminderStore> {
        &self.store
    }

    // ==================== 触发 ====================

    /// 计时器到点
    pub fn wake(&self, id: i64, now: DateTime<Utc>) -> EngineResult<Outcome> {
        self.fire(id, now, false)
    }

    /// 作为捆绑提醒的成员一起展示，可以比自己的 start_time 早
    pub fn fire_bundled(&self, id: i64, now: DateTime<Utc>) -> EngineResult<Outcome> {
        self.fire(id, now, true)
    }

    fn fire(&self, id: i64, now: DateTime<Utc>, bundled: bool) -> EngineResult<Outcome> {
        self.serialized(id, || {
            let mut reminder = self.load(id)?;

            if !reminder.enabled {
                return Ok(Outcome::ignored(reminder, Stale::Disabled));
            }
            if reminder.is_completed() {
                return Ok(Outcome::ignored(reminder, Stale::Completed));
            }
            if !bundled && now + Duration::seconds(WAKE_TOLERANCE_SECS) < reminder.start_time {
                return Ok(Outcome::ignored(reminder, Stale::Early));
            }
            if reminder
                .last_fired_at
                .is_some_and(|fired| fired >= reminder.start_time)
            {
                return Ok(Outcome::ignored(reminder, Stale::AlreadyAlerted));
            }

            if reminder.state == ReminderState::Scheduled {
                reminder.state = ReminderState::Firing;
            }
            // 捆绑提醒可能早于 start_time 展示，记到 start_time 为止，自己的唤醒晚到时视为重复
            reminder.last_fired_at = Some(now.max(reminder.start_time));
            reminder.updated_at = now;
            self.store.write(&reminder)?;

            if bundled {
                self.publisher.withdraw(id);
            }

            tracing::info!(
                reminder_id = id,
                state = reminder.state.label(),
                repetition = reminder.current_repetition,
                "reminder fired"
            );
            Ok(Outcome::new(reminder, Transition::Fired))
        })
    }

    // ==================== 用户操作 ====================

    /// 完成当前这一次提醒
    pub fn complete(&self, id: i64, now: DateTime<Utc>) -> EngineResult<Outcome> {
        self.serialized(id, || {
            let mut reminder = self.load(id)?;

            if !reminder.enabled {
                return Ok(Outcome::ignored(reminder, Stale::Disabled));
            }
            if reminder.is_completed() {
                return Ok(Outcome::ignored(reminder, Stale::Completed));
            }
            if !reminder.has_fired() {
                return Ok(Outcome::ignored(reminder, Stale::NotFired));
            }

            if reminder.is_final_repetition() {
                return self.finish(id, reminder, now);
            }

            reminder.current_repetition += 1;
            reminder.state = ReminderState::Nagging;
            reminder.start_time = next_nag_trigger(&reminder, now)?;
            reminder.updated_at = now;
            self.store.write(&reminder)?;
            self.publisher.publish(id, reminder.start_time);

            tracing::info!(
                reminder_id = id,
                repetition = reminder.current_repetition,
                total = reminder.nag.total_repetitions,
                next_wake = %reminder.start_time,
                "nag advanced"
            );
            let next_wake = reminder.start_time;
            Ok(Outcome::new(reminder, Transition::Advanced { next_wake }))
        })
    }

    /// 用户推迟：进入 panic loop，两分钟后再提醒
    pub fn snooze(&self, id: i64, now: DateTime<Utc>) -> EngineResult<Outcome> {
        self.serialized(id, || {
            let mut reminder = self.load(id)?;

            if !reminder.enabled {
                return Ok(Outcome::ignored(reminder, Stale::Disabled));
            }
            if reminder.is_completed() {
                return Ok(Outcome::ignored(reminder, Stale::Completed));
            }
            if !reminder.nag.is_effective() {
                return Ok(Outcome::ignored(reminder, Stale::NagInactive));
            }
            if !reminder.has_fired() {
                return Ok(Outcome::ignored(reminder, Stale::NotFired));
            }

            let wake_at = now + Duration::seconds(PANIC_DELAY_SECS);
            reminder.state = ReminderState::PanicLoop { since: now };
            reminder.start_time = wake_at;
            reminder.updated_at = now;
            self.store.write(&reminder)?;
            self.publisher.publish(id, wake_at);

            tracing::info!(reminder_id = id, %wake_at, "panic loop armed");
            Ok(Outcome::new(reminder, Transition::Snoozed { wake_at }))
        })
    }

    /// 暂停：撤销挂起的唤醒
    pub fn disable(&self, id: i64, now: DateTime<Utc>) -> EngineResult<Outcome> {
        self.serialized(id, || {
            let mut reminder = self.load(id)?;

            if !reminder.enabled {
                return Ok(Outcome::ignored(reminder, Stale::AlreadyDisabled));
            }

            reminder.enabled = false;
            reminder.updated_at = now;
            self.store.write(&reminder)?;
            self.publisher.withdraw(id);

            tracing::info!(reminder_id = id, "reminder disabled");
            Ok(Outcome::new(reminder, Transition::Disabled))
        })
    }

    /// 恢复：start_time 还没到就按原时间唤醒，否则立即到期
    pub fn enable(&self, id: i64, now: DateTime<Utc>) -> EngineResult<Outcome> {
        self.serialized(id, || {
            let mut reminder = self.load(id)?;

            if reminder.enabled {
                return Ok(Outcome::ignored(reminder, Stale::AlreadyEnabled));
            }

            reminder.enabled = true;
            reminder.updated_at = now;
            self.store.write(&reminder)?;

            let wake_at = self.arm(id, &reminder, now);
            tracing::info!(reminder_id = id, ?wake_at, "reminder enabled");
            Ok(Outcome::new(reminder, Transition::Enabled { wake_at }))
        })
    }

    /// 编辑：重新校验配置，升级进度从头开始，再登记唤醒
    ///
    /// 和其他操作共用同一个临界区，进行中的操作不会覆盖编辑结果。
    pub fn edit(&self, id: i64, draft: &ReminderDraft, now: DateTime<Utc>) -> EngineResult<Outcome> {
        self.serialized(id, || {
            let existing = self.load(id)?;
            let reminder = draft.apply_to(&existing, now)?;
            self.store.write(&reminder)?;

            let wake_at = self.arm(id, &reminder, now);
            tracing::info!(reminder_id = id, ?wake_at, "reminder edited");
            Ok(Outcome::new(reminder, Transition::Edited { wake_at }))
        })
    }

    /// 重新登记一个提醒的唤醒（新建、守护进程重启之后）
    pub fn rearm(&self, id: i64, now: DateTime<Utc>) -> EngineResult<Option<DateTime<Utc>>> {
        self.serialized(id, || {
            let reminder = self.load(id)?;
            Ok(self.arm(id, &reminder, now))
        })
    }

    /// 为所有活动提醒重新登记唤醒，返回登记的数量
    pub fn rearm_all(&self, now: DateTime<Utc>) -> EngineResult<usize> {
        let ids: Vec<i64> = self.store.snapshot()?.iter().filter_map(|r| r.id).collect();
        let mut armed = 0;
        for id in ids {
            if self.rearm(id, now)?.is_some() {
                armed += 1;
            }
        }
        Ok(armed)
    }

    // ==================== 内部 ====================

    fn arm(&self, id: i64, reminder: &Reminder, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !reminder.is_active() {
            self.publisher.withdraw(id);
            return None;
        }
        if reminder
            .last_fired_at
            .is_some_and(|fired| fired >= reminder.start_time)
        {
            // 这一次已经展示过，等待用户操作
            return None;
        }
        let wake_at = reminder.start_time.max(now);
        self.publisher.publish(id, wake_at);
        Some(wake_at)
    }

    /// 最后一次重复完成：写入状态、撤销唤醒，再分发副作用
    fn finish(&self, id: i64, mut reminder: Reminder, now: DateTime<Utc>) -> EngineResult<Outcome> {
        reminder.state = ReminderState::Completed;
        reminder.updated_at = now;
        let finished = reminder.clone();

        let next = next_occurrence(
            reminder.anchor_time,
            reminder.recurrence,
            &reminder.days_of_week,
            now,
            &Local,
        );
        if let Some(next) = next {
            reminder.anchor_time = next;
            reminder.start_time = next;
            reminder.current_repetition = 0;
            reminder.state = ReminderState::Scheduled;
        }

        self.store.write(&reminder)?;
        match next {
            Some(next) => self.publisher.publish(id, next),
            None => self.publisher.withdraw(id),
        }

        let effects_dispatched = self.effects.dispatch(&finished, id, now);

        tracing::info!(reminder_id = id, next_occurrence = ?next, "reminder completed");
        Ok(Outcome::new(
            reminder,
            Transition::Completed {
                effects_dispatched,
                next_occurrence: next,
            },
        ))
    }

    fn load(&self, id: i64) -> EngineResult<Reminder> {
        self.store.read(id)?.ok_or(EngineError::NotFound(id))
    }

    /// 在提醒 id 的临界区里执行 `f`
    ///
    /// 锁表项只在有操作持有时存在，结束后没有其他人等待就移除。
    fn serialized<T>(&self, id: i64, f: impl FnOnce() -> EngineResult<T>) -> EngineResult<T> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.entry(id).or_default().clone()
        };

        let result = {
            let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f()
        };

        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // 表里一份、这里一份：没有其他操作在等。引用要在表锁内释放，计数才准确
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&id);
        }
        drop(lock);
        drop(locks);
        result
    }
}

/// 催促序列中下一次触发时间
///
/// 严格模式以本次发生的锚点推算，不受用户响应快慢影响；
/// 灵活模式以用户本次操作的时刻为起点。数据库里的间隔超出时间范围时返回错误。
pub fn next_nag_trigger(reminder: &Reminder, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let next = if reminder.strict_anchored {
        reminder
            .nag
            .interval_minutes
            .checked_mul(i64::from(reminder.current_repetition))
            .and_then(Duration::try_minutes)
            .and_then(|offset| reminder.anchor_time.checked_add_signed(offset))
    } else {
        reminder
            .nag
            .interval()
            .and_then(|interval| now.checked_add_signed(interval))
    };
    next.ok_or_else(|| {
        anyhow!(
            "nag interval of {} minutes is out of range for reminder {:?}",
            reminder.nag.interval_minutes,
            reminder.id
        )
    })
}
