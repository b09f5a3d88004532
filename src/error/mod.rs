use thiserror::Error;

/// 配置错误，在写入数据库之前就拒绝
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("reminder title must not be empty")]
    EmptyTitle,

    #[error("nag interval must be between 1 and 1440 minutes, got {0}")]
    InvalidNagInterval(i64),

    #[error("nag repetitions must not be negative, got {0}")]
    NegativeRepetitions(i64),

    #[error("weekly reminders need weekdays in 1..=7 (Sunday = 1), got {0:?}")]
    InvalidWeekdays(Vec<i64>),
}

/// 升级引擎错误
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("reminder {0} not found")]
    NotFound(i64),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
