use anyhow::Result;
use notify_rust::{Notification, Timeout};

use crate::models::{Priority, Reminder};

/// 通知管理器
pub struct NotificationManager {
    timeout_ms: u32,
}

impl NotificationManager {
    pub fn new(timeout_ms: u32) -> Self {
        Self { timeout_ms }
    }

    /// 单个提醒
    pub fn send_reminder(&self, reminder: &Reminder) -> Result<()> {
        let summary = if reminder.is_in_panic_loop() {
            format!("🚨 {}", reminder.title)
        } else {
            format!("⏰ {}", reminder.title)
        };

        Notification::new()
            .summary(&summary)
            .body(&reminder_body(reminder))
            .icon("appointment-soon")
            .timeout(self.timeout_for(reminder))
            .show()?;
        Ok(())
    }

    /// 捆绑提醒：第一个是主条目，其余列在正文里
    pub fn send_bundle(&self, bundle: &[&Reminder]) -> Result<()> {
        let Some(lead) = bundle.first() else {
            return Ok(());
        };

        let body = bundle_body(bundle);
        Notification::new()
            .summary(&format!("⏰ {} (+{} more)", lead.title, bundle.len() - 1))
            .body(&body)
            .icon("appointment-soon")
            .timeout(self.timeout_for(lead))
            .show()?;
        Ok(())
    }

    /// panic loop 和高优先级的提醒一直显示到用户处理
    fn timeout_for(&self, reminder: &Reminder) -> Timeout {
        if reminder.is_in_panic_loop() || reminder.priority == Priority::High {
            Timeout::Never
        } else {
            Timeout::Milliseconds(self.timeout_ms)
        }
    }
}

fn reminder_body(reminder: &Reminder) -> String {
    let mut body = match &reminder.category {
        Some(category) => format!("[{}] ", category),
        None => String::new(),
    };
    if reminder.nag.is_effective() {
        body.push_str(&format!(
            "Repetition {}/{}",
            reminder.current_repetition + 1,
            reminder.nag.total_repetitions
        ));
    } else {
        body.push_str("Due now");
    }
    body
}

fn bundle_body(bundle: &[&Reminder]) -> String {
    bundle
        .iter()
        .map(|r| format!("• {} ({:?})", r.title, r.priority))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NagSettings;
    use chrono::Utc;

    #[test]
    fn test_body_shows_repetition_progress() {
        let mut r = Reminder::new("Meds".into(), Utc::now());
        r.category = Some("health".into());
        r.nag = NagSettings {
            enabled: true,
            interval_minutes: 10,
            total_repetitions: 4,
        };
        r.current_repetition = 1;
        assert_eq!(reminder_body(&r), "[health] Repetition 2/4");
    }

    #[test]
    fn test_bundle_body_lists_in_given_order() {
        let mut a = Reminder::new("Standup".into(), Utc::now());
        a.priority = Priority::High;
        let b = Reminder::new("Coffee".into(), Utc::now());
        assert_eq!(bundle_body(&[&a, &b]), "• Standup (High)\n• Coffee (Medium)");
    }
}
