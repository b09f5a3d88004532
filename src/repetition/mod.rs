//! 催促次数计算
//!
//! 给定开始时间和间隔，计算在开始时间之后的下一个本地午夜之前还能容纳几次重复提醒。
//! 计数规则：最大的 n，使得 `start + n * interval` 严格早于午夜。
//! 正好落在午夜上的那一次不算。

use chrono::{DateTime, Duration, Local, TimeZone, Utc};

/// 计算午夜前可容纳的重复次数，间隔不大于 0 时返回 0
pub fn max_repetitions<Tz: TimeZone>(start: &DateTime<Tz>, interval: Duration) -> u32 {
    let interval_ms = interval.num_milliseconds();
    if interval_ms <= 0 {
        return 0;
    }

    let Some(midnight) = next_midnight(start) else {
        return 0;
    };

    let remaining_ms = midnight.timestamp_millis() - start.timestamp_millis();
    if remaining_ms <= 0 {
        return 0;
    }

    let count = (remaining_ms - 1) / interval_ms;
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// 以本机时区的午夜为界
pub fn max_repetitions_local(start: DateTime<Utc>, interval: Duration) -> u32 {
    max_repetitions(&start.with_timezone(&Local), interval)
}

/// `start` 所在日期的下一天 00:00（按 `start` 自身的时区）
pub fn next_midnight<Tz: TimeZone>(start: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    let tz = start.timezone();
    let next_day = start.date_naive().succ_opt()?;
    let midnight = next_day.and_hms_opt(0, 0, 0)?;

    // 午夜落在夏令时跳变的空档里时，取空档之后的第一个整点
    tz.from_local_datetime(&midnight)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(midnight + Duration::hours(1))).earliest())
}
