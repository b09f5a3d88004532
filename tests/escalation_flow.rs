use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use nag_reminder::bundle::detect_bundle;
use nag_reminder::config::ReminderDraft;
use nag_reminder::db::SqliteStore;
use nag_reminder::effects::CompletionDispatcher;
use nag_reminder::models::{Priority, ReminderState};
use nag_reminder::schedule::{SchedulePublisher, TimerDelivery};
use nag_reminder::{EscalationEngine, ReminderStore, Stale, Transition};

#[derive(Default)]
struct RecordingTimer {
    scheduled: Mutex<Vec<(i64, DateTime<Utc>)>>,
    cancelled: Mutex<Vec<i64>>,
}

impl TimerDelivery for RecordingTimer {
    fn schedule(&self, id: i64, instant: DateTime<Utc>) -> Result<()> {
        self.scheduled.lock().unwrap().push((id, instant));
        Ok(())
    }

    fn cancel(&self, id: i64) -> Result<()> {
        self.cancelled.lock().unwrap().push(id);
        Ok(())
    }
}

struct Setup {
    _dir: TempDir,
    path: std::path::PathBuf,
    store: Arc<SqliteStore>,
    timer: Arc<RecordingTimer>,
    engine: EscalationEngine,
}

fn setup() -> Setup {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reminders.db");
    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let timer = Arc::new(RecordingTimer::default());
    let engine = EscalationEngine::new(
        store.clone(),
        SchedulePublisher::new(timer.clone()),
        CompletionDispatcher::new(store.clone(), store.clone()),
    );
    Setup {
        _dir: dir,
        path,
        store,
        timer,
        engine,
    }
}

fn morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 3, 8, 0, 0).unwrap()
}

#[test]
fn test_full_nag_sequence_with_panic_loop() {
    let s = setup();

    let mut draft = ReminderDraft::new("Take medication", morning());
    draft.nag_enabled = true;
    draft.nag_interval_minutes = Some(10);
    draft.nag_total_repetitions = Some(3);
    draft.strict_anchored = true;
    let reminder = draft.validate_in(morning(), &Utc).unwrap();
    let id = s.store.db().unwrap().create_reminder(&reminder).unwrap();

    assert_eq!(s.engine.rearm(id, morning() - Duration::hours(1)).unwrap(), Some(morning()));

    // 第一次提醒
    let fired = s.engine.wake(id, morning()).unwrap();
    assert_eq!(fired.transition, Transition::Fired);

    // 第 0 次完成 -> 第 1 次在锚点 +10 分钟
    let t = morning() + Duration::minutes(4);
    let advanced = s.engine.complete(id, t).unwrap();
    assert_eq!(
        advanced.transition,
        Transition::Advanced {
            next_wake: morning() + Duration::minutes(10)
        }
    );

    // 第 1 次提醒时推迟
    s.engine.wake(id, morning() + Duration::minutes(10)).unwrap();
    let snooze_at = morning() + Duration::minutes(11);
    s.engine.snooze(id, snooze_at).unwrap();
    let stored = s.store.read(id).unwrap().unwrap();
    assert!(stored.is_in_panic_loop());
    assert_eq!(stored.start_time, snooze_at + Duration::minutes(2));
    assert_eq!(stored.current_repetition, 1);

    // panic loop 重提醒后完成，严格模式回到锚点推算
    s.engine.wake(id, snooze_at + Duration::minutes(2)).unwrap();
    s.engine.complete(id, snooze_at + Duration::minutes(3)).unwrap();
    let stored = s.store.read(id).unwrap().unwrap();
    assert_eq!(stored.current_repetition, 2);
    assert_eq!(stored.start_time, morning() + Duration::minutes(20));
    assert!(!stored.is_in_panic_loop());

    // 最后一次
    s.engine.wake(id, morning() + Duration::minutes(20)).unwrap();
    let done = s.engine.complete(id, morning() + Duration::minutes(21)).unwrap();
    assert!(matches!(
        done.transition,
        Transition::Completed {
            effects_dispatched: true,
            next_occurrence: None
        }
    ));
    assert_eq!(s.timer.cancelled.lock().unwrap().last(), Some(&id));

    // 重复完成不计数
    let again = s.engine.complete(id, morning() + Duration::minutes(22)).unwrap();
    assert_eq!(
        again.transition,
        Transition::Ignored {
            reason: Stale::Completed
        }
    );

    let db = s.store.db().unwrap();
    let history = db.get_history(10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].reminder_id, id);
    assert_eq!(history[0].repetitions, 3);
    assert_eq!(db.get_streak().unwrap().total_completions, 1);
}

#[test]
fn test_state_persists_across_reopen() {
    let s = setup();

    let mut draft = ReminderDraft::new("Submit report", morning());
    draft.nag_enabled = true;
    draft.nag_interval_minutes = Some(5);
    draft.nag_total_repetitions = Some(4);
    let reminder = draft.validate_in(morning(), &Utc).unwrap();
    let id = s.store.db().unwrap().create_reminder(&reminder).unwrap();

    s.engine.wake(id, morning()).unwrap();
    s.engine.snooze(id, morning() + Duration::minutes(1)).unwrap();
    s.engine.disable(id, morning() + Duration::minutes(2)).unwrap();

    let reopened = SqliteStore::open(&s.path).unwrap();
    let loaded = reopened.read(id).unwrap().unwrap();
    assert!(!loaded.enabled);
    assert_eq!(
        loaded.state,
        ReminderState::PanicLoop {
            since: morning() + Duration::minutes(1)
        }
    );
    assert_eq!(loaded.original_start_time, morning());
    assert!(reopened.snapshot().unwrap().is_empty());
}

#[test]
fn test_bundle_from_stored_snapshot() {
    let s = setup();
    let fixtures = [
        ("Low task", Priority::Low, 0),
        ("High task", Priority::High, 20),
        ("Medium task", Priority::Medium, 45),
        ("Far task", Priority::High, 120),
    ];
    for (title, priority, offset) in fixtures {
        let mut draft = ReminderDraft::new(title, morning() + Duration::seconds(offset));
        draft.priority = priority;
        let reminder = draft.validate_in(morning(), &Utc).unwrap();
        s.store.db().unwrap().create_reminder(&reminder).unwrap();
    }

    let snapshot = s.store.snapshot().unwrap();
    let bundle = detect_bundle(&snapshot, morning());
    let titles: Vec<&str> = bundle.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(titles, vec!["High task", "Medium task", "Low task"]);
}

#[test]
fn test_missing_reminder_does_not_break_engine() {
    let s = setup();
    assert!(s.engine.wake(404, morning()).is_err());

    let reminder = ReminderDraft::new("Still works", morning())
        .validate_in(morning(), &Utc)
        .unwrap();
    let id = s.store.db().unwrap().create_reminder(&reminder).unwrap();
    assert_eq!(s.engine.wake(id, morning()).unwrap().transition, Transition::Fired);
}
