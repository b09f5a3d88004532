//! 捆绑提醒检测
//!
//! 多个提醒在很短时间内同时到期时，合并成一次提醒展示。
//! 输入是调用方传入的快照，不读取任何全局状态。

use chrono::{DateTime, Utc};

use crate::models::Reminder;

/// 参考时间前后的对称窗口（毫秒，不含边界）
pub const BUNDLE_WINDOW_MS: i64 = 60_000;

/// 选出需要捆绑的提醒
///
/// 少于 2 个时返回空，调用方按单个提醒处理；否则按优先级排序，
/// 同优先级保持原来的相对顺序，第一个就是捆绑提醒的主条目。
pub fn detect_bundle<'a>(snapshot: &'a [Reminder], reference: DateTime<Utc>) -> Vec<&'a Reminder> {
    let mut selected: Vec<&Reminder> = snapshot
        .iter()
        .filter(|r| r.is_active())
        .filter(|r| within_window(r.start_time, reference))
        .collect();

    if selected.len() < 2 {
        return Vec::new();
    }

    // sort_by_key 是稳定排序
    selected.sort_by_key(|r| r.priority.rank());
    selected
}

fn within_window(start_time: DateTime<Utc>, reference: DateTime<Utc>) -> bool {
    (start_time.timestamp_millis() - reference.timestamp_millis()).abs() < BUNDLE_WINDOW_MS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, ReminderState};
    use chrono::{Duration, TimeZone};

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
    }

    fn reminder(id: i64, offset_secs: i64, priority: Priority) -> Reminder {
        let mut r = Reminder::new(format!("r{}", id), reference() + Duration::seconds(offset_secs));
        r.id = Some(id);
        r.priority = priority;
        r
    }

    fn ids(bundle: &[&Reminder]) -> Vec<i64> {
        bundle.iter().filter_map(|r| r.id).collect()
    }

    #[test]
    fn test_window_threshold() {
        let snapshot: Vec<Reminder> = [0, 30, 59, 61, 90]
            .iter()
            .enumerate()
            .map(|(i, offset)| reminder(i as i64 + 1, *offset, Priority::Medium))
            .collect();

        let bundle = detect_bundle(&snapshot, reference());
        assert_eq!(ids(&bundle), vec![1, 2, 3]);
    }

    #[test]
    fn test_window_is_symmetric() {
        let snapshot = vec![
            reminder(1, -59, Priority::Medium),
            reminder(2, 0, Priority::Medium),
            reminder(3, -60, Priority::Medium),
        ];

        let bundle = detect_bundle(&snapshot, reference());
        assert_eq!(ids(&bundle), vec![1, 2]);
    }

    #[test]
    fn test_priority_order() {
        let snapshot = vec![
            reminder(1, 0, Priority::Low),
            reminder(2, 10, Priority::High),
            reminder(3, 20, Priority::Medium),
        ];

        let bundle = detect_bundle(&snapshot, reference());
        let priorities: Vec<Priority> = bundle.iter().map(|r| r.priority).collect();
        assert_eq!(priorities, vec![Priority::High, Priority::Medium, Priority::Low]);
    }

    #[test]
    fn test_ties_keep_original_order() {
        let snapshot = vec![
            reminder(1, 0, Priority::Low),
            reminder(2, 5, Priority::High),
            reminder(3, 10, Priority::Low),
            reminder(4, 15, Priority::High),
        ];

        let bundle = detect_bundle(&snapshot, reference());
        assert_eq!(ids(&bundle), vec![2, 4, 1, 3]);
    }

    #[test]
    fn test_single_reminder_never_bundles() {
        let snapshot = vec![reminder(1, 0, Priority::High)];
        assert!(detect_bundle(&snapshot, reference()).is_empty());
    }

    #[test]
    fn test_inactive_reminders_are_skipped() {
        let mut paused = reminder(2, 5, Priority::High);
        paused.enabled = false;
        let mut done = reminder(3, 10, Priority::High);
        done.state = ReminderState::Completed;

        let snapshot = vec![reminder(1, 0, Priority::Low), paused, done];
        assert!(detect_bundle(&snapshot, reference()).is_empty());
    }
}
