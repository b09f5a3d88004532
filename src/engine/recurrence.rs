use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};

use crate::models::Recurrence;

/// 下一次发生的时间：同一本地钟点，严格晚于 `now`
///
/// 一次性提醒返回 None；每周提醒只取 `days_of_week` 中的日子（周日为 1）。
pub fn next_occurrence<Tz: TimeZone>(
    anchor: DateTime<Utc>,
    recurrence: Recurrence,
    days_of_week: &[u8],
    now: DateTime<Utc>,
    tz: &Tz,
) -> Option<DateTime<Utc>> {
    if recurrence == Recurrence::OneTime {
        return None;
    }
    if recurrence == Recurrence::Weekly && days_of_week.is_empty() {
        return None;
    }

    let local_anchor = anchor.with_timezone(tz);
    let time = local_anchor.time();

    // 守护进程停了很久时从昨天开始找，不逐日追赶
    let yesterday = now.with_timezone(tz).date_naive() - Duration::days(1);
    let mut date = local_anchor.date_naive().max(yesterday);

    for _ in 0..16 {
        date = date.succ_opt()?;
        if !occurs_on(recurrence, days_of_week, date) {
            continue;
        }
        // 夏令时空档里的钟点不存在，跳到下一个匹配日
        let Some(candidate) = tz.from_local_datetime(&date.and_time(time)).earliest() else {
            continue;
        };
        let candidate = candidate.with_timezone(&Utc);
        if candidate > now {
            return Some(candidate);
        }
    }
    None
}

fn occurs_on(recurrence: Recurrence, days_of_week: &[u8], date: NaiveDate) -> bool {
    match recurrence {
        Recurrence::OneTime => false,
        Recurrence::Daily => true,
        Recurrence::Weekly => {
            let weekday = date.weekday().number_from_sunday() as u8;
            days_of_week.contains(&weekday)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_one_time_has_no_next() {
        let anchor = utc(2024, 3, 4, 8, 0);
        assert!(next_occurrence(anchor, Recurrence::OneTime, &[], anchor, &Utc).is_none());
    }

    #[test]
    fn test_daily_next_day_same_time() {
        let anchor = utc(2024, 3, 4, 8, 0);
        let now = utc(2024, 3, 4, 8, 20);
        let next = next_occurrence(anchor, Recurrence::Daily, &[], now, &Utc).unwrap();
        assert_eq!(next, utc(2024, 3, 5, 8, 0));
    }

    #[test]
    fn test_daily_skips_days_already_past() {
        let anchor = utc(2024, 3, 4, 8, 0);
        let now = utc(2024, 3, 9, 12, 0);
        let next = next_occurrence(anchor, Recurrence::Daily, &[], now, &Utc).unwrap();
        assert_eq!(next, utc(2024, 3, 10, 8, 0));
    }

    #[test]
    fn test_weekly_picks_next_listed_weekday() {
        // 2024-03-04 是周一 (2)，列表里有周三 (4) 和周五 (6)
        let anchor = utc(2024, 3, 4, 7, 30);
        let next = next_occurrence(anchor, Recurrence::Weekly, &[4, 6], anchor, &Utc).unwrap();
        assert_eq!(next, utc(2024, 3, 6, 7, 30));

        let next = next_occurrence(next, Recurrence::Weekly, &[4, 6], next, &Utc).unwrap();
        assert_eq!(next, utc(2024, 3, 8, 7, 30));
    }

    #[test]
    fn test_weekly_single_day_wraps_to_next_week() {
        // 周日 = 1
        let anchor = utc(2024, 3, 3, 18, 0);
        let next = next_occurrence(anchor, Recurrence::Weekly, &[1], anchor, &Utc).unwrap();
        assert_eq!(next, utc(2024, 3, 10, 18, 0));
    }

    #[test]
    fn test_keeps_local_wall_clock_time() {
        let tz = FixedOffset::west_opt(5 * 3600).unwrap();
        // 本地 2024-03-04 22:00 = UTC 03-05 03:00
        let anchor = utc(2024, 3, 5, 3, 0);
        let next = next_occurrence(anchor, Recurrence::Daily, &[], anchor, &tz).unwrap();
        assert_eq!(next, utc(2024, 3, 6, 3, 0));
    }

    #[test]
    fn test_weekly_without_days_has_no_next() {
        let anchor = utc(2024, 3, 4, 8, 0);
        assert!(next_occurrence(anchor, Recurrence::Weekly, &[], anchor, &Utc).is_none());
    }
}
