use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{Connection, params};
use tokio::sync::{broadcast, mpsc};

use crate::db::{AGENT_COLS, MESSAGE_COLS, agent_from_row, apply_pragmas, message_from_row};
use crate::events::ChatEvent;
use crate::models::{Agent, Channel, Message};
use crate::sdk::{SdkClient, extract_text};

/// Hard deadline for a single prompt dispatch.
pub const PROMPT_TIMEOUT_SECS: u64 = 120;
/// An agent-authored message may invoke further agents up to this depth.
pub const MAX_CHAIN_DEPTH: u32 = 2;
/// Channel history lines prepended to an @-mention prompt.
const HISTORY_LIMIT: i64 = 10;
/// Localhost ports probed when an agent has no stored credentials.
pub const DISCOVERY_PORTS: [u16; 6] = [4096, 4097, 4098, 4099, 4100, 4101];

/// Extract `@name` mentions from message content, order-preserving, deduped.
pub fn parse_mentions(content: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for (i, c) in content.char_indices() {
        if c != '@' {
            continue;
        }
        // an @ must start a token
        if i > 0 {
            let prev = content[..i].chars().next_back().unwrap_or(' ');
            if prev.is_alphanumeric() || prev == '@' {
                continue;
            }
        }
        let rest = &content[i + 1..];
        let name: String = rest
            .chars()
            .take_while(|ch| ch.is_alphanumeric() || *ch == '_' || *ch == '-')
            .collect();
        if !name.is_empty() && !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

/// Score a candidate session directory against an agent's project path.
/// Trailing slashes are normalized; exact match beats parent beats child.
pub fn match_score(project_path: &str, session_dir: &str) -> u8 {
    let project = normalize_path(project_path);
    let dir = normalize_path(session_dir);
    if project.is_empty() || dir.is_empty() {
        return 0;
    }
    if project == dir {
        3
    } else if project.starts_with(&format!("{dir}/")) {
        2 // session sits above the project
    } else if dir.starts_with(&format!("{project}/")) {
        1 // session sits inside the project
    } else {
        0
    }
}

fn normalize_path(p: &str) -> String {
    let trimmed = p.trim().trim_end_matches('/');
    if trimmed.is_empty() && p.trim().starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Prompt for a channel @-mention: recent history as `<sender>: <content>`
/// lines, then the triggering message tagged with the channel name.
pub fn build_channel_prompt(history: &[Message], trigger: &Message, channel_name: &str) -> String {
    let mut lines: Vec<String> = history
        .iter()
        .map(|m| format!("{}: {}", m.sender_name, m.content))
        .collect();
    if !lines.is_empty() {
        lines.push(String::new());
    }
    lines.push(format!(
        "[{}] {}: {}",
        channel_name, trigger.sender_name, trigger.content
    ));
    lines.join("\n")
}

/// One scheduled invocation: agent, triggering message, channel, chain depth.
pub struct InvocationJob {
    agent: Agent,
    message: Message,
    channel: Channel,
    depth: u32,
}

/// Dispatches prompts to external agent runtimes when a message addresses an
/// agent, and posts the answers back into the channel.
///
/// Handlers schedule work by queueing jobs; the worker task (spawned at
/// liftoff) runs each invocation on its own task. Handlers never block on
/// the external runtime.
pub struct InvocationEngine {
    sdk: SdkClient,
    db_path: String,
    events: broadcast::Sender<ChatEvent>,
    jobs: mpsc::UnboundedSender<InvocationJob>,
    /// agent_id → per-agent slot holding the cached invocation session id.
    /// The per-key async lock serializes createSession races (one create per
    /// agent, ever, unless the session goes stale).
    sessions: Mutex<HashMap<String, Arc<tokio::sync::Mutex<Option<String>>>>>,
    debug: bool,
}

impl InvocationEngine {
    pub fn new(
        db_path: String,
        events: broadcast::Sender<ChatEvent>,
        debug: bool,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<InvocationJob>) {
        let (jobs, rx) = mpsc::unbounded_channel();
        let engine = Arc::new(InvocationEngine {
            sdk: SdkClient::new(),
            db_path,
            events,
            jobs,
            sessions: Mutex::new(HashMap::new()),
            debug,
        });
        (engine, rx)
    }

    /// Consume queued jobs, one spawned task per invocation.
    pub fn spawn_worker(engine: Arc<Self>, mut rx: mpsc::UnboundedReceiver<InvocationJob>) {
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine
                        .invoke_agent(job.agent, job.message, job.channel, job.depth)
                        .await;
                });
            }
        });
    }

    fn open_conn(&self) -> Option<Connection> {
        match Connection::open(&self.db_path) {
            Ok(conn) => {
                apply_pragmas(&conn);
                Some(conn)
            }
            Err(e) => {
                eprintln!("⚠️ Invocation engine: failed to open DB: {e}");
                None
            }
        }
    }

    /// Resolve the addressed agents of a freshly stored message and queue
    /// one invocation per agent. Synchronous: the calling handler returns
    /// as soon as scheduling is done.
    pub fn dispatch_for_message(
        &self,
        conn: &Connection,
        message: &Message,
        channel: &Channel,
        depth: u32,
    ) {
        if depth >= MAX_CHAIN_DEPTH {
            eprintln!(
                "🔁 Invocation chain capped at depth {MAX_CHAIN_DEPTH} in {}",
                channel.name
            );
            return;
        }

        for agent in self.addressed_agents(conn, message, channel) {
            let _ = self.jobs.send(InvocationJob {
                agent,
                message: message.clone(),
                channel: channel.clone(),
                depth,
            });
        }
    }

    fn addressed_agents(&self, conn: &Connection, message: &Message, channel: &Channel) -> Vec<Agent> {
        if channel.channel_type == "dm" {
            let sql = format!(
                "SELECT {AGENT_COLS} FROM agents a
                 JOIN channel_members cm ON cm.user_id = a.id
                 WHERE cm.channel_id = ?1 AND a.id != ?2 AND a.agent_type != 'system'"
            );
            let Ok(mut stmt) = conn.prepare(&sql) else {
                return vec![];
            };
            return stmt
                .query_map(params![&channel.id, &message.sender_id], agent_from_row)
                .map(|rows| rows.filter_map(|r| r.ok()).collect())
                .unwrap_or_default();
        }

        let names = match &message.mentions {
            Some(m) if !m.is_empty() => m.clone(),
            _ => parse_mentions(&message.content),
        };
        let mut agents = Vec::new();
        for name in names {
            let sql = format!(
                "SELECT {AGENT_COLS} FROM agents a
                 WHERE a.agent_name = ?1 AND a.workspace_id = ?2 AND a.agent_type != 'system'"
            );
            if let Ok(agent) = conn.query_row(&sql, params![&name, &channel.workspace_id], agent_from_row)
                && agent.id != message.sender_id
            {
                agents.push(agent);
            }
        }
        agents
    }

    async fn invoke_agent(self: Arc<Self>, agent: Agent, trigger: Message, channel: Channel, depth: u32) {
        // Credentials may have changed since the agent row was loaded.
        let creds = {
            let Some(conn) = self.open_conn() else { return };
            conn.query_row(
                "SELECT server_url, provider_session_id FROM agents WHERE id = ?1",
                params![&agent.id],
                |r| {
                    Ok((
                        r.get::<_, Option<String>>(0)?,
                        r.get::<_, Option<String>>(1)?,
                    ))
                },
            )
            .unwrap_or((None, None))
        };

        let (server_url, provider_session_id) = match creds {
            (Some(url), Some(sid)) => (url, sid),
            _ => match self.auto_discover(&agent).await {
                Some((url, sid)) => {
                    if let Some(conn) = self.open_conn() {
                        conn.execute(
                            "UPDATE agents SET server_url = ?1, provider_session_id = ?2 WHERE id = ?3",
                            params![&url, &sid, &agent.id],
                        )
                        .ok();
                    }
                    (url, sid)
                }
                None => {
                    // Delivered but unanswered: the agent sees it on its next get_messages.
                    if self.debug {
                        eprintln!(
                            "📭 No runtime found for {}, message left for pickup",
                            agent.agent_name
                        );
                    }
                    return;
                }
            },
        };

        // Health check before anything else; stale credentials are cleared so
        // the next attempt rediscovers.
        let listed = match self.sdk.list_sessions(&server_url).await {
            Ok(sessions) => sessions,
            Err(e) => {
                eprintln!(
                    "⚠️ Runtime for {} unreachable ({e}), clearing credentials",
                    agent.agent_name
                );
                if let Some(conn) = self.open_conn() {
                    conn.execute(
                        "UPDATE agents SET server_url = NULL, provider_session_id = NULL WHERE id = ?1",
                        params![&agent.id],
                    )
                    .ok();
                }
                return;
            }
        };

        // Obtain the dedicated invocation session. Never the agent's own
        // interactive session: prompting a busy session hangs indefinitely.
        let slot = {
            let mut map = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(agent.id.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(None)))
                .clone()
        };
        let session_id = {
            let mut guard = slot.lock().await;
            let mut current = guard.clone();
            if let Some(ref sid) = current
                && (*sid == provider_session_id || !listed.iter().any(|s| s.id == *sid))
            {
                current = None;
            }
            match current {
                Some(sid) => sid,
                None => match self.sdk.create_session(&server_url).await {
                    Ok(session) => {
                        *guard = Some(session.id.clone());
                        session.id
                    }
                    Err(e) => {
                        eprintln!(
                            "⚠️ Could not create invocation session for {}: {e}",
                            agent.agent_name
                        );
                        return;
                    }
                },
            }
        };

        let prompt = if channel.channel_type == "dm" {
            trigger.content.clone()
        } else {
            let history = self.channel_history(&channel.id, &trigger.id);
            build_channel_prompt(&history, &trigger, &channel.name)
        };

        if self.debug {
            eprintln!(
                "🤖 Prompting {} via {} (session {session_id}, depth {depth})",
                agent.agent_name, server_url
            );
        }

        self.emit_typing(&channel, &agent.agent_name, true, None);

        let outcome = tokio::time::timeout(
            Duration::from_secs(PROMPT_TIMEOUT_SECS),
            self.sdk.prompt_session(&server_url, &session_id, &prompt),
        )
        .await;

        let parts = match outcome {
            Ok(Ok(parts)) => parts,
            Ok(Err(e)) => {
                self.emit_typing(&channel, &agent.agent_name, false, Some(e.to_string()));
                return;
            }
            Err(_) => {
                // A session that times out is assumed wedged; drop the cache
                // so the next invocation starts fresh.
                let mut guard = slot.lock().await;
                *guard = None;
                self.emit_typing(
                    &channel,
                    &agent.agent_name,
                    false,
                    Some(format!("timed out after {PROMPT_TIMEOUT_SECS}s")),
                );
                return;
            }
        };

        let text = extract_text(&parts);
        if text.is_empty() {
            self.emit_typing(&channel, &agent.agent_name, false, None);
            return;
        }

        let _ = self.events.send(ChatEvent::AgentStreaming {
            workspace_id: channel.workspace_id.clone(),
            channel_id: channel.id.clone(),
            agent_name: agent.agent_name.clone(),
            chunk: text.clone(),
        });

        let Some(conn) = self.open_conn() else {
            self.emit_typing(&channel, &agent.agent_name, false, Some("store unavailable".into()));
            return;
        };
        let response = insert_agent_message(&conn, &channel, &agent, &text);
        self.emit_typing(&channel, &agent.agent_name, false, None);

        if let Some(response) = response {
            let _ = self.events.send(ChatEvent::NewMessage {
                workspace_id: channel.workspace_id.clone(),
                message: response.clone(),
            });
            // An agent answer may itself address other agents.
            self.dispatch_for_message(&conn, &response, &channel, depth + 1);
        }
    }

    fn channel_history(&self, channel_id: &str, exclude_id: &str) -> Vec<Message> {
        let Some(conn) = self.open_conn() else {
            return vec![];
        };
        let sql = format!(
            "SELECT {MESSAGE_COLS} FROM messages m JOIN users u ON u.id = m.sender_id
             WHERE m.channel_id = ?1 AND m.id != ?2
             ORDER BY m.created_at DESC, m.rowid DESC LIMIT ?3"
        );
        let Ok(mut stmt) = conn.prepare(&sql) else {
            return vec![];
        };
        let mut rows: Vec<Message> = stmt
            .query_map(params![channel_id, exclude_id, HISTORY_LIMIT], message_from_row)
            .map(|r| r.filter_map(|m| m.ok()).collect())
            .unwrap_or_default();
        rows.reverse();
        rows
    }

    fn emit_typing(&self, channel: &Channel, agent_name: &str, is_typing: bool, error: Option<String>) {
        let _ = self.events.send(ChatEvent::AgentTyping {
            workspace_id: channel.workspace_id.clone(),
            channel_id: channel.id.clone(),
            agent_name: agent_name.to_string(),
            is_typing,
            error,
        });
    }

    /// Probe well-known local runtime ports and pick the session whose
    /// working directory best matches the agent's project path.
    async fn auto_discover(&self, agent: &Agent) -> Option<(String, String)> {
        let mut best: Option<(u8, String, String)> = None;
        for port in DISCOVERY_PORTS {
            let url = format!("http://127.0.0.1:{port}");
            let Ok(sessions) = self.sdk.list_sessions(&url).await else {
                continue;
            };
            for session in sessions {
                let Some(ref dir) = session.directory else {
                    continue;
                };
                let score = match_score(&agent.project_path, dir);
                if score == 0 {
                    continue;
                }
                let better = match best {
                    Some((s, _, _)) => score > s,
                    None => true,
                };
                if better {
                    best = Some((score, url.clone(), session.id.clone()));
                }
            }
        }
        best.map(|(_, url, sid)| (url, sid))
    }
}

/// Insert a message authored by an agent and return the stored row.
pub fn insert_agent_message(
    conn: &Connection,
    channel: &Channel,
    agent: &Agent,
    content: &str,
) -> Option<Message> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let mentions = parse_mentions(content);
    let mentions_json = if mentions.is_empty() {
        None
    } else {
        serde_json::to_string(&mentions).ok()
    };
    conn.execute(
        "INSERT INTO messages (id, channel_id, sender_id, content, mentions, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![&id, &channel.id, &agent.id, content, &mentions_json, &now],
    )
    .ok()?;
    Some(Message {
        id,
        channel_id: channel.id.clone(),
        sender_id: agent.id.clone(),
        sender_name: agent.agent_name.clone(),
        content: content.to_string(),
        mentions: if mentions.is_empty() { None } else { Some(mentions) },
        parent_id: None,
        is_pinned: false,
        pinned_at: None,
        pinned_by: None,
        edited_at: None,
        created_at: now,
    })
}
