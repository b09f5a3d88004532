//! 个人提醒：催促模式、panic loop 与捆绑提醒
//!
//! `remind` 是命令行，`remindd` 是负责计时和弹出通知的守护进程，
//! 两者共用这里的升级引擎和数据库层。

pub mod bundle;
pub mod config;
pub mod db;
pub mod effects;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod models;
pub mod notify;
pub mod repetition;
pub mod schedule;

pub use engine::{EscalationEngine, Outcome, ReminderStore, Stale, Transition};
pub use error::{ConfigError, EngineError};
