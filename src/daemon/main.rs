use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use nag_reminder::bundle::detect_bundle;
use nag_reminder::config::Settings;
use nag_reminder::db::SqliteStore;
use nag_reminder::effects::CompletionDispatcher;
use nag_reminder::ipc;
use nag_reminder::notify::NotificationManager;
use nag_reminder::schedule::{SchedulePublisher, TokioTimer, WakeSignal};
use nag_reminder::{EngineError, EscalationEngine, ReminderStore};

// 守护进程结构
pub struct Daemon {
    engine: Arc<EscalationEngine>,
    store: Arc<SqliteStore>,
    notifier: NotificationManager,
    socket_name: String,
}

impl Daemon {
    pub fn new(db_path: PathBuf, settings: &Settings, timer: Arc<TokioTimer>) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(db_path)?);
        let engine = EscalationEngine::new(
            store.clone(),
            SchedulePublisher::new(timer),
            CompletionDispatcher::new(store.clone(), store.clone()),
        );
        Ok(Self {
            engine: Arc::new(engine),
            store,
            notifier: NotificationManager::new(settings.notification_timeout_ms),
            socket_name: settings.socket_name.clone(),
        })
    }

    /// 运行守护进程
    pub async fn run(&self, mut wakes: UnboundedReceiver<WakeSignal>) -> Result<()> {
        tracing::info!("Reminder daemon started");

        let armed = self.engine.rearm_all(Utc::now())?;
        tracing::info!("Armed {} reminders", armed);

        let engine = self.engine.clone();
        let socket_name = self.socket_name.clone();
        std::thread::spawn(move || {
            if let Err(e) = ipc::serve(&socket_name, engine) {
                tracing::error!("Command listener stopped: {:#}", e);
            }
        });

        loop {
            tokio::select! {
                signal = wakes.recv() => {
                    let Some(signal) = signal else { break };
                    if let Err(e) = self.on_wake(signal) {
                        tracing::error!("Error handling wake for {}: {:#}", signal.reminder_id, e);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    /// 到点：推进状态机，再决定单独提醒还是捆绑提醒
    fn on_wake(&self, signal: WakeSignal) -> Result<()> {
        let now = Utc::now();
        let id = signal.reminder_id;

        let outcome = match self.engine.wake(id, now) {
            Ok(outcome) => outcome,
            Err(EngineError::NotFound(_)) => {
                tracing::debug!(reminder_id = id, "wake for deleted reminder");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if outcome.is_ignored() {
            return Ok(());
        }

        let snapshot = self.store.snapshot()?;
        let bundle = detect_bundle(&snapshot, now);

        if bundle.iter().any(|r| r.id == Some(id)) {
            for member in bundle.iter().filter_map(|r| r.id).filter(|m| *m != id) {
                if let Err(e) = self.engine.fire_bundled(member, now) {
                    tracing::warn!(reminder_id = member, "Failed to fire bundled reminder: {}", e);
                }
            }
            tracing::info!(lead = ?bundle[0].id, size = bundle.len(), "bundled alert");
            if let Err(e) = self.notifier.send_bundle(&bundle) {
                tracing::error!("Failed to send bundled reminder: {}", e);
            }
        } else if let Err(e) = self.notifier.send_reminder(&outcome.reminder) {
            tracing::error!("Failed to send reminder: {}", e);
        }

        Ok(())
    }
}

#[derive(Parser)]
#[command(name = "remindd")]
#[command(about = "Reminder daemon", long_about = None)]
struct Cli {
    /// Database path (defaults to user data directory)
    #[arg(short, long)]
    db_path: Option<PathBuf>,

    /// Config file (defaults to user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load_or_default(cli.config.as_deref())?;

    // 设置日志
    let log_level = if cli.debug {
        "debug"
    } else {
        settings.log_level.as_str()
    };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let db_path = settings.resolve_db_path(cli.db_path)?;
    tracing::info!("Using database: {:?}", db_path);

    let (tx, rx) = mpsc::unbounded_channel();
    let timer = Arc::new(TokioTimer::new(Handle::current(), tx));

    // 创建并运行守护进程
    let daemon = Daemon::new(db_path, &settings, timer)?;
    daemon.run(rx).await?;

    Ok(())
}
