//! CLI 与守护进程之间的通信
//!
//! 本地 socket 上每个连接一问一答，各占一行 JSON。

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use interprocess::local_socket::{prelude::*, GenericNamespaced, ListenerOptions, Stream};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::sync::Arc;

use crate::config::ReminderDraft;
use crate::engine::{EscalationEngine, Outcome};
use crate::error::EngineError;

/// CLI 发给守护进程的请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    Ping,
    Complete { id: i64 },
    Snooze { id: i64 },
    Enable { id: i64 },
    Disable { id: i64 },
    /// 修改配置，和其他操作一样在守护进程的临界区里执行
    Edit { id: i64, draft: ReminderDraft },
    /// 新建之后登记唤醒
    Rearm { id: i64 },
}

/// 守护进程的应答
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Pong,
    Outcome(Outcome),
    Armed { wake_at: Option<DateTime<Utc>> },
    NotFound { id: i64 },
    Error { message: String },
}

/// 在引擎上执行一个请求
pub fn handle(engine: &EscalationEngine, request: Request, now: DateTime<Utc>) -> Response {
    let result = match request {
        Request::Ping => return Response::Pong,
        Request::Complete { id } => engine.complete(id, now).map(Response::Outcome),
        Request::Snooze { id } => engine.snooze(id, now).map(Response::Outcome),
        Request::Enable { id } => engine.enable(id, now).map(Response::Outcome),
        Request::Disable { id } => engine.disable(id, now).map(Response::Outcome),
        Request::Edit { id, draft } => engine.edit(id, &draft, now).map(Response::Outcome),
        Request::Rearm { id } => engine.rearm(id, now).map(|wake_at| Response::Armed { wake_at }),
    };

    match result {
        Ok(response) => response,
        Err(EngineError::NotFound(id)) => Response::NotFound { id },
        Err(e) => {
            tracing::error!("Request failed: {}", e);
            Response::Error {
                message: e.to_string(),
            }
        }
    }
}

/// 阻塞地监听请求，在独立线程里运行
pub fn serve(socket_name: &str, engine: Arc<EscalationEngine>) -> Result<()> {
    let name = socket_name
        .to_ns_name::<GenericNamespaced>()
        .context("Invalid socket name")?;
    let listener = ListenerOptions::new()
        .name(name)
        .create_sync()
        .with_context(|| format!("Failed to listen on {}", socket_name))?;

    tracing::info!("Listening for commands on {}", socket_name);

    for conn in listener.incoming() {
        let conn = match conn {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!("Failed to accept connection: {}", e);
                continue;
            }
        };
        if let Err(e) = serve_connection(conn, &engine) {
            tracing::warn!("Connection error: {}", e);
        }
    }
    Ok(())
}

fn serve_connection(conn: Stream, engine: &EscalationEngine) -> Result<()> {
    let mut conn = BufReader::new(conn);
    let mut line = String::new();
    conn.read_line(&mut line)?;

    let response = match serde_json::from_str::<Request>(line.trim()) {
        Ok(request) => {
            tracing::debug!(?request, "request received");
            handle(engine, request, Utc::now())
        }
        Err(e) => Response::Error {
            message: format!("malformed request: {}", e),
        },
    };

    let mut payload = serde_json::to_string(&response)?;
    payload.push('\n');
    conn.get_mut().write_all(payload.as_bytes())?;
    Ok(())
}

/// 发送一个请求；守护进程没有运行时返回错误
pub fn send(socket_name: &str, request: &Request) -> Result<Response> {
    let name = socket_name
        .to_ns_name::<GenericNamespaced>()
        .context("Invalid socket name")?;
    let conn = Stream::connect(name).context("Daemon is not running")?;
    let mut conn = BufReader::new(conn);

    let mut payload = serde_json::to_string(request)?;
    payload.push('\n');
    conn.get_mut().write_all(payload.as_bytes())?;

    let mut line = String::new();
    conn.read_line(&mut line)?;
    let response = serde_json::from_str(line.trim()).context("Malformed daemon response")?;
    Ok(response)
}
