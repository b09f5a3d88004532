//! 唤醒调度
//!
//! 引擎只决定“下一次在什么时候唤醒”，真正的计时交给 [`TimerDelivery`]。
//! 守护进程里用 [`TokioTimer`]，CLI 离线模式用 [`NoopTimer`]。

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// 计时投递接口
pub trait TimerDelivery: Send + Sync {
    fn schedule(&self, reminder_id: i64, instant: DateTime<Utc>) -> Result<()>;
    fn cancel(&self, reminder_id: i64) -> Result<()>;
}

/// 到点后投递给守护进程的唤醒信号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeSignal {
    pub reminder_id: i64,
    pub scheduled_for: DateTime<Utc>,
}

/// 把引擎的决定翻译成计时器调用
///
/// 计时器失败只记录日志，提醒本身的状态已经写入，不回滚。
#[derive(Clone)]
pub struct SchedulePublisher {
    timer: Arc<dyn TimerDelivery>,
}

impl SchedulePublisher {
    pub fn new(timer: Arc<dyn TimerDelivery>) -> Self {
        Self { timer }
    }

    /// 先撤销旧的唤醒，再登记新的
    pub fn publish(&self, reminder_id: i64, instant: DateTime<Utc>) {
        self.withdraw(reminder_id);
        match self.timer.schedule(reminder_id, instant) {
            Ok(()) => tracing::debug!(reminder_id, %instant, "wake scheduled"),
            Err(e) => tracing::warn!(reminder_id, %instant, "Failed to schedule wake: {}", e),
        }
    }

    pub fn withdraw(&self, reminder_id: i64) {
        if let Err(e) = self.timer.cancel(reminder_id) {
            tracing::warn!(reminder_id, "Failed to cancel wake: {}", e);
        }
    }
}

/// 基于 tokio 的计时器，每个提醒一个睡眠任务
pub struct TokioTimer {
    handle: Handle,
    tx: UnboundedSender<WakeSignal>,
    pending: Mutex<HashMap<i64, JoinHandle<()>>>,
}

impl TokioTimer {
    pub fn new(handle: Handle, tx: UnboundedSender<WakeSignal>) -> Self {
        Self {
            handle,
            tx,
            pending: Mutex::new(HashMap::new()),
        }
    }
}

impl TimerDelivery for TokioTimer {
    fn schedule(&self, reminder_id: i64, instant: DateTime<Utc>) -> Result<()> {
        // 已经过去的时间点立即触发
        let delay = (instant - Utc::now()).to_std().unwrap_or_default();
        let tx = self.tx.clone();

        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let signal = WakeSignal {
                reminder_id,
                scheduled_for: instant,
            };
            if tx.send(signal).is_err() {
                tracing::debug!(reminder_id, "wake receiver dropped");
            }
        });

        let mut pending = self
            .pending
            .lock()
            .map_err(|_| anyhow!("timer registry poisoned"))?;
        if let Some(previous) = pending.insert(reminder_id, task) {
            previous.abort();
        }
        Ok(())
    }

    fn cancel(&self, reminder_id: i64) -> Result<()> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| anyhow!("timer registry poisoned"))?;
        if let Some(task) = pending.remove(&reminder_id) {
            task.abort();
        }
        Ok(())
    }
}

/// 不做任何事的计时器
///
/// CLI 在守护进程未运行时直接改数据库，守护进程下次启动会重新登记唤醒。
pub struct NoopTimer;

impl TimerDelivery for NoopTimer {
    fn schedule(&self, _reminder_id: i64, _instant: DateTime<Utc>) -> Result<()> {
        Ok(())
    }

    fn cancel(&self, _reminder_id: i64) -> Result<()> {
        Ok(())
    }
}
