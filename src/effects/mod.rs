//! 完成后的副作用：连续完成统计和历史记录
//!
//! 只在一次发生真正完成时调用，中间的催促推进和 panic loop 都不会触发。
//! 状态已经先写入数据库，这里的失败只记日志。

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::models::{HistoryEntry, Reminder};

/// 连续完成/里程碑统计
pub trait ProgressTracker: Send + Sync {
    fn on_task_completed(&self, reminder_id: i64) -> Result<()>;
}

/// 完成历史
pub trait HistorySink: Send + Sync {
    fn append(&self, entry: &HistoryEntry) -> Result<()>;
}

/// 完成副作用分发器
///
/// 每个提醒只记住最近分发过的那一次发生（锚点时间），重复投递的完成不会再计数。
pub struct CompletionDispatcher {
    progress: Arc<dyn ProgressTracker>,
    history: Arc<dyn HistorySink>,
    dispatched: Mutex<HashMap<i64, DateTime<Utc>>>,
}

impl CompletionDispatcher {
    pub fn new(progress: Arc<dyn ProgressTracker>, history: Arc<dyn HistorySink>) -> Self {
        Self {
            progress,
            history,
            dispatched: Mutex::new(HashMap::new()),
        }
    }

    /// 分发一次完成，同一事件重复分发时返回 false
    pub fn dispatch(&self, reminder: &Reminder, reminder_id: i64, completed_at: DateTime<Utc>) -> bool {
        let occurrence = reminder.anchor_time;

        {
            let mut dispatched = self
                .dispatched
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if dispatched.insert(reminder_id, occurrence) == Some(occurrence) {
                tracing::debug!(reminder_id, %occurrence, "completion already dispatched");
                return false;
            }
        }

        if let Err(e) = self.progress.on_task_completed(reminder_id) {
            tracing::warn!(reminder_id, "Failed to update streak: {}", e);
        }

        let entry = HistoryEntry::for_completion(reminder, reminder_id, completed_at);
        if let Err(e) = self.history.append(&entry) {
            tracing::warn!(reminder_id, "Failed to append history: {}", e);
        }

        tracing::info!(reminder_id, title = %reminder.title, "completion effects dispatched");
        true
    }
}
