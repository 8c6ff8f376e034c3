use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rocket::futures::{SinkExt, StreamExt};
use rocket::{State, get};
use tokio::sync::{broadcast, mpsc};

use crate::auth::AuthContext;
use crate::db::Db;
use crate::events::ChatEvent;
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::routes::ApiError;

struct WsClient {
    workspace_id: String,
    #[allow(dead_code)] // kept for admin introspection of live connections
    user_id: Option<String>,
    /// Empty set = subscribed to everything in the workspace.
    subscribed: HashSet<String>,
    tx: mpsc::UnboundedSender<String>,
}

/// In-memory map of live WebSocket clients. Everything that fans out to
/// browsers goes through `broadcast`; the dispatcher task owns the only
/// long-lived caller, so per-client delivery order follows publish order.
pub struct WsManager {
    clients: Mutex<HashMap<u64, WsClient>>,
    next_id: AtomicU64,
}

impl Default for WsManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WsManager {
    pub fn new() -> Self {
        WsManager {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn accept(
        &self,
        workspace_id: String,
        user_id: Option<String>,
        tx: mpsc::UnboundedSender<String>,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        clients.insert(
            id,
            WsClient {
                workspace_id,
                user_id,
                subscribed: HashSet::new(),
                tx,
            },
        );
        id
    }

    pub fn remove(&self, client_id: u64) {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        clients.remove(&client_id);
    }

    pub fn subscribe(&self, client_id: u64, channel_ids: &[String]) {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get_mut(&client_id) {
            for id in channel_ids {
                client.subscribed.insert(id.clone());
            }
        }
    }

    pub fn unsubscribe(&self, client_id: u64, channel_ids: &[String]) {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get_mut(&client_id) {
            for id in channel_ids {
                client.subscribed.remove(id);
            }
        }
    }

    /// Fan an event out to every client of its workspace (or all clients for
    /// workspace-less events). `new_message` additionally honors the
    /// subscription set: a non-empty set that lacks the channel filters the
    /// client out. Clients whose queue is gone are swept after the iteration.
    pub fn broadcast(&self, event: &ChatEvent) {
        let frame = event.to_frame().to_string();
        let workspace = event.workspace_id();
        let channel = event.channel_id();

        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        let mut dead: Vec<u64> = Vec::new();
        for (id, client) in clients.iter() {
            if let Some(ws) = workspace
                && client.workspace_id != ws
            {
                continue;
            }
            if let Some(ch) = channel
                && !client.subscribed.is_empty()
                && !client.subscribed.contains(ch)
            {
                continue;
            }
            if client.tx.send(frame.clone()).is_err() {
                dead.push(*id);
            }
        }
        for id in dead {
            clients.remove(&id);
        }
    }

    /// Narrow echo to a single channel's subscribers, optionally excluding a
    /// client (used for frames the sender already knows about).
    pub fn broadcast_to_channel(
        &self,
        channel_id: &str,
        frame: &serde_json::Value,
        exclude: Option<u64>,
    ) {
        let text = frame.to_string();
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        let mut dead: Vec<u64> = Vec::new();
        for (id, client) in clients.iter() {
            if Some(*id) == exclude {
                continue;
            }
            if !client.subscribed.is_empty() && !client.subscribed.contains(channel_id) {
                continue;
            }
            if client.tx.send(text.clone()).is_err() {
                dead.push(*id);
            }
        }
        for id in dead {
            clients.remove(&id);
        }
    }

    fn send_to(&self, client_id: u64, frame: serde_json::Value) {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(&client_id)
            && client.tx.send(frame.to_string()).is_err()
        {
            clients.remove(&client_id);
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Subscribes to the event bus and drives WebSocket fan-out. Single consumer,
/// so ordering toward each client follows `publish` order.
pub fn spawn_dispatcher(mut receiver: broadcast::Receiver<ChatEvent>, manager: Arc<WsManager>) {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => manager.broadcast(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    eprintln!("⚠️ WebSocket dispatcher lagged, missed {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn string_array(value: Option<&serde_json::Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

/// Process one inbound control frame, replying through the client's queue so
/// responses stay ordered with broadcasts.
fn handle_frame(manager: &WsManager, client_id: u64, raw: &str) {
    let parsed: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(_) => {
            manager.send_to(
                client_id,
                serde_json::json!({"type": "error", "data": {"detail": "malformed frame"}}),
            );
            return;
        }
    };
    match parsed.get("type").and_then(|t| t.as_str()) {
        Some("ping") => {
            manager.send_to(client_id, serde_json::json!({"type": "pong", "data": {}}));
        }
        Some("subscribe") => {
            let ids = string_array(parsed.get("channel_ids"));
            manager.subscribe(client_id, &ids);
            manager.send_to(
                client_id,
                serde_json::json!({"type": "subscribed", "data": {"channel_ids": ids}}),
            );
        }
        Some("unsubscribe") => {
            let ids = string_array(parsed.get("channel_ids"));
            manager.unsubscribe(client_id, &ids);
            manager.send_to(
                client_id,
                serde_json::json!({"type": "unsubscribed", "data": {"channel_ids": ids}}),
            );
        }
        _ => {
            manager.send_to(
                client_id,
                serde_json::json!({"type": "error", "data": {"detail": "unknown frame type"}}),
            );
        }
    }
}

/// WebSocket upgrade. Accepts `?token=<session>` for browsers or the usual
/// Authorization / localhost auth paths; the resolved identity is frozen into
/// the client record for the connection's lifetime.
#[get("/ws?<token>")]
pub fn ws_connect(
    ws: rocket_ws::WebSocket,
    token: Option<String>,
    auth: Option<AuthContext>,
    db: &State<Db>,
    manager: &State<Arc<WsManager>>,
    limiter: &State<Arc<RateLimiter>>,
    rate_config: &State<RateLimitConfig>,
) -> Result<rocket_ws::Channel<'static>, ApiError> {
    let identity: (Option<String>, String) = if let Some(ref t) = token {
        let conn = db.conn();
        match crate::auth::resolve_session(&conn, t) {
            Some((user_id, workspace_id, _)) => (Some(user_id), workspace_id),
            None => return Err(ApiError::Unauthenticated),
        }
    } else if let Some(ctx) = auth {
        (ctx.user_id, ctx.workspace_id)
    } else {
        return Err(ApiError::Unauthenticated);
    };

    let (user_id, workspace_id) = identity;
    let manager = manager.inner().clone();
    let limiter = limiter.inner().clone();
    let frames_max = rate_config.ws_frames_max;
    let window_secs = rate_config.ws_window_secs;

    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let client_id = manager.accept(workspace_id, user_id, tx);

    // The channel handler is FnMut; the receiver moves out through an Option.
    let mut rx = Some(rx);
    Ok(ws.channel(move |stream| {
        let rx = rx.take();
        let manager = manager.clone();
        let limiter = limiter.clone();
        Box::pin(async move {
            let Some(mut rx) = rx else {
                return Ok(());
            };
            let (mut sink, mut source) = stream.split();
            loop {
                tokio::select! {
                    outbound = rx.recv() => match outbound {
                        Some(text) => {
                            if sink.send(rocket_ws::Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        None => break, // swept as dead by a broadcast
                    },
                    inbound = source.next() => match inbound {
                        Some(Ok(rocket_ws::Message::Text(text))) => {
                            let key = format!("ws:{client_id}");
                            if !limiter.check(&key, frames_max, window_secs) {
                                manager.send_to(
                                    client_id,
                                    serde_json::json!({"type": "error", "data": {"detail": "rate limited"}}),
                                );
                                continue;
                            }
                            handle_frame(&manager, client_id, &text);
                        }
                        Some(Ok(rocket_ws::Message::Close(_))) | None => break,
                        Some(Ok(_)) => {} // binary/ping/pong frames are ignored
                        Some(Err(_)) => break,
                    },
                }
            }
            manager.remove(client_id);
            limiter.forget(&format!("ws:{client_id}"));
            Ok(())
        })
    }))
}
