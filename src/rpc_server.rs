//! marksync RPC server: JSON-RPC over stdin/stdout for a UI front end.
//!
//! Protocol: one JSON object per line (newline-delimited JSON).
//! Request:  {"id":1, "method":"bookmark.add", "params":{"url":"...","title":"..."}}
//! Response: {"id":1, "result":{...}} or {"id":1, "error":"..."}
//! Events:   {"event":"bookmarks.changed","bookmarks":[...]} and {"event":"live",...}
//!
//! Requests, auth changes and channel messages are handled by one task, one
//! at a time, so the bookmark list only ever sees complete operations.

use std::time::Instant;

use marksync::app::App;
use marksync::managers::sync_controller::SyncView;
use marksync::rpc_handler::{bookmarks_json, handle_method};
use marksync::services::settings_engine::SettingsEngine;

use serde_json::{json, Value};
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};

/// Simple rate limiter: max requests per one-second window.
struct RateLimiter {
    window_start: Instant,
    request_count: u32,
    max_per_second: u32,
}

impl RateLimiter {
    fn new(max_per_second: u32) -> Self {
        Self { window_start: Instant::now(), request_count: 0, max_per_second }
    }

    /// Returns true if the request is allowed, false if rate-limited.
    fn check(&mut self) -> bool {
        if self.window_start.elapsed().as_secs() >= 1 {
            self.window_start = Instant::now();
            self.request_count = 0;
        }
        self.request_count += 1;
        self.request_count <= self.max_per_second
    }
}

async fn emit(out: &mut Stdout, value: &Value) -> io::Result<()> {
    let mut line = value.to_string();
    line.push('\n');
    out.write_all(line.as_bytes()).await?;
    out.flush().await
}

/// Emits change events for whatever differs between two views.
async fn emit_changes(out: &mut Stdout, before: &Option<SyncView>, after: &Option<SyncView>) -> io::Result<()> {
    let empty = Vec::new();
    let old_list = before.as_ref().map(|v| &v.bookmarks).unwrap_or(&empty);
    let new_list = after.as_ref().map(|v| &v.bookmarks).unwrap_or(&empty);
    if old_list != new_list {
        emit(out, &json!({"event": "bookmarks.changed", "bookmarks": bookmarks_json(new_list)})).await?;
    }

    let status = |view: &Option<SyncView>| view.as_ref().map(|v| (v.state, v.live));
    if status(before) != status(after) {
        let (state, live) = match after {
            Some(v) => (json!(v.state), v.live),
            None => (json!("unauthenticated"), false),
        };
        emit(out, &json!({"event": "live", "state": state, "live": live})).await?;
    }
    Ok(())
}

async fn handle_line(app: &mut App, limiter: &mut RateLimiter, line: &str) -> Value {
    let req: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return json!({"id": null, "error": format!("parse error: {}", e)}),
    };
    let id = req.get("id").cloned().unwrap_or(Value::Null);

    if !limiter.check() {
        return json!({"id": id, "error": "rate limit exceeded"});
    }

    let method = req.get("method").and_then(|v| v.as_str()).unwrap_or("");
    let params = req.get("params").cloned().unwrap_or(json!({}));
    log::debug!("rpc: {}", method);

    match handle_method(app, method, &params).await {
        Ok(val) => json!({"id": id, "result": val}),
        Err(err) => json!({"id": id, "error": err}),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = SettingsEngine::load_from_env(None)?;
    let (mut app, mut events) = App::connect(config)?;
    let mut auth_changes = app.auth.watch_session();

    let mut out = io::stdout();
    if let Err(e) = app.start().await {
        log::warn!("initial sync failed: {}", e);
    }
    let _ = auth_changes.borrow_and_update();
    emit_changes(&mut out, &None, &app.view()).await?;

    emit(&mut out, &json!({"event": "ready", "version": env!("CARGO_PKG_VERSION")})).await?;

    let mut limiter = RateLimiter::new(200);
    let mut lines = BufReader::new(io::stdin()).lines();

    loop {
        let before = app.view();
        let deadline = app.session_deadline();
        tokio::select! {
            line = lines.next_line() => {
                let line = match line? {
                    Some(l) => l,
                    None => break,
                };
                if line.trim().is_empty() {
                    continue;
                }
                let response = handle_line(&mut app, &mut limiter, &line).await;
                emit(&mut out, &response).await?;
            }
            changed = auth_changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let _ = auth_changes.borrow_and_update();
                if let Err(e) = app.sync_session().await {
                    log::warn!("sync after session change failed: {}", e);
                }
            }
            Some(msg) = events.recv() => {
                app.dispatch_event(msg);
            }
            _ = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            } => {
                if let Err(e) = app.check_session().await {
                    log::warn!("sync after session expiry check failed: {}", e);
                }
            }
        }
        emit_changes(&mut out, &before, &app.view()).await?;
    }

    app.shutdown().await;
    Ok(())
}
