//! RPC method handler for the marksync JSON-RPC protocol.
//!
//! Kept apart from `rpc_server.rs` so it can be unit-tested without stdio.
//! `handle_method` dispatches one call to the auth service or the sync
//! controller held by the `App`.

use serde_json::{json, Value};

use crate::app::App;
use crate::services::auth_service::parse_callback_code;
use crate::types::bookmark::Bookmark;
use crate::types::realtime::ChannelState;
use crate::types::session::Session;

fn str_param<'a>(params: &'a Value, key: &str) -> Result<&'a str, String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("missing {}", key))
}

fn user_json(session: &Session) -> Value {
    json!({"id": session.user.id, "email": session.user.email})
}

/// Serializes the list in wire form (`url`, `user_id`, RFC 3339 `created_at`).
pub fn bookmarks_json(bookmarks: &[Bookmark]) -> Value {
    serde_json::to_value(bookmarks).unwrap_or_else(|_| json!([]))
}

/// Dispatch a JSON-RPC method call.
///
/// Returns `Ok(Value)` on success or `Err(String)` with an error message.
pub async fn handle_method(app: &mut App, method: &str, params: &Value) -> Result<Value, String> {
    match method {
        "ping" => Ok(json!({"pong": true, "version": env!("CARGO_PKG_VERSION")})),

        // ─── Auth ───
        "auth.status" => {
            let session = app.auth.watch_session().borrow().clone();
            let (state, live) = match app.view() {
                Some(view) => (view.state, view.live),
                None => (ChannelState::Unauthenticated, false),
            };
            Ok(json!({
                "signed_in": session.is_some(),
                "user": session.as_ref().map(user_json),
                "state": state,
                "live": live,
            }))
        }
        "auth.login_url" => {
            let url = app.auth.authorize_url().map_err(|e| e.to_string())?;
            Ok(json!({"url": url}))
        }
        "auth.callback" => {
            let code = match params.get("code").and_then(|v| v.as_str()) {
                Some(code) => code.to_string(),
                None => parse_callback_code(str_param(params, "url")?).map_err(|e| e.to_string())?,
            };
            let session = app.auth.exchange_code(&code).await.map_err(|e| e.to_string())?;
            app.sync_session().await.map_err(|e| e.to_string())?;
            Ok(json!({"user": user_json(&session)}))
        }
        "auth.refresh" => {
            let session = app.auth.refresh_session().await.map_err(|e| e.to_string())?;
            app.sync_session().await.map_err(|e| e.to_string())?;
            Ok(json!({"ok": true, "expires_at": session.expires_at}))
        }
        "auth.logout" => {
            if let Err(e) = app.auth.sign_out().await {
                log::warn!("sign-out reported an error: {}", e);
            }
            app.sync_session().await.map_err(|e| e.to_string())?;
            Ok(json!({"ok": true}))
        }

        // ─── Bookmarks ───
        "bookmark.list" => {
            let controller = app.controller_mut().map_err(|e| e.to_string())?;
            Ok(bookmarks_json(controller.bookmarks()))
        }
        "bookmark.add" => {
            let title = str_param(params, "title")?;
            let url = str_param(params, "url")?;
            let controller = app.controller_mut().map_err(|e| e.to_string())?;
            let record = controller.add_bookmark(title, url).await.map_err(|e| e.to_string())?;
            Ok(json!({"title": record.title, "url": record.location}))
        }
        "bookmark.delete" => {
            let id = str_param(params, "id")?;
            let controller = app.controller_mut().map_err(|e| e.to_string())?;
            controller.delete_bookmark(id).await.map_err(|e| e.to_string())?;
            Ok(json!({"ok": true}))
        }
        "bookmark.refresh" => {
            let controller = app.controller_mut().map_err(|e| e.to_string())?;
            controller.refresh().await.map_err(|e| e.to_string())?;
            Ok(bookmarks_json(controller.bookmarks()))
        }

        _ => Err(format!("unknown method: {}", method)),
    }
}
