use rusqlite::{Connection, Row, params};
use std::sync::{Mutex, MutexGuard};

use crate::models::{Agent, Channel, Message, Workspace};

/// Reserved id of the default workspace, created on first boot and used by
/// the localhost bypass and pre-workspace database backfills.
pub const DEFAULT_WORKSPACE_ID: &str = "00000000-0000-0000-0000-000000000000";

pub struct Db {
    pub conn: Mutex<Connection>,
}

/// Apply the standard connection pragmas. Background tasks that open their
/// own connection call this too.
pub fn apply_pragmas(conn: &Connection) {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA foreign_keys=ON;
         PRAGMA busy_timeout=5000;
         PRAGMA synchronous=NORMAL;",
    )
    .ok();
}

impl Db {
    pub fn new(path: &str) -> Self {
        let conn = Connection::open(path).expect("Failed to open database");
        apply_pragmas(&conn);
        let db = Db {
            conn: Mutex::new(conn),
        };
        db.migrate();
        db
    }

    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn migrate(&self) {
        let conn = self.conn();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS workspaces (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                ws_type TEXT NOT NULL DEFAULT 'personal',
                description TEXT DEFAULT '',
                onboarding_prompt TEXT,
                human_welcome TEXT,
                created_by TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                user_type TEXT NOT NULL,
                display_name TEXT,
                about TEXT,
                agent_instructions TEXT,
                email TEXT,
                avatar_url TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS workspace_members (
                workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                role TEXT NOT NULL DEFAULT 'member',
                joined_at TEXT NOT NULL,
                PRIMARY KEY (workspace_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
                agent_name TEXT NOT NULL UNIQUE,
                agent_type TEXT NOT NULL DEFAULT 'generic',
                project_path TEXT NOT NULL DEFAULT '',
                project_name TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'offline',
                description TEXT,
                personality TEXT,
                current_task TEXT,
                gender TEXT,
                server_url TEXT,
                provider_session_id TEXT,
                workspace_id TEXT REFERENCES workspaces(id)
            );

            CREATE TABLE IF NOT EXISTS agent_sessions (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
                pid INTEGER,
                tty TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                last_heartbeat TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_agent_sessions_agent ON agent_sessions(agent_id, is_active);

            CREATE TABLE IF NOT EXISTS channels (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                channel_type TEXT NOT NULL DEFAULT 'custom',
                topic TEXT,
                project_path TEXT,
                workspace_id TEXT REFERENCES workspaces(id),
                created_by TEXT,
                created_at TEXT NOT NULL,
                is_archived INTEGER NOT NULL DEFAULT 0,
                archived_at TEXT,
                UNIQUE (workspace_id, name)
            );

            CREATE TABLE IF NOT EXISTS channel_members (
                channel_id TEXT NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                joined_at TEXT NOT NULL,
                PRIMARY KEY (channel_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                channel_id TEXT NOT NULL REFERENCES channels(id),
                sender_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                content TEXT NOT NULL,
                mentions TEXT,
                parent_id TEXT,
                is_pinned INTEGER NOT NULL DEFAULT 0,
                pinned_at TEXT,
                pinned_by TEXT,
                edited_at TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_channel ON messages(channel_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender_id);

            CREATE TABLE IF NOT EXISTS message_reactions (
                message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                emoji TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (message_id, user_id, emoji)
            );

            CREATE TABLE IF NOT EXISTS read_receipts (
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                channel_id TEXT NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
                last_read_at TEXT NOT NULL,
                PRIMARY KEY (user_id, channel_id)
            );

            CREATE TABLE IF NOT EXISTS feature_requests (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'open',
                reason TEXT,
                created_by TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT
            );

            CREATE TABLE IF NOT EXISTS feature_votes (
                feature_id TEXT NOT NULL REFERENCES feature_requests(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL,
                vote INTEGER NOT NULL,
                PRIMARY KEY (feature_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS workspace_api_keys (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                key_hash TEXT NOT NULL UNIQUE,
                key_prefix TEXT NOT NULL,
                name TEXT,
                created_by TEXT,
                created_at TEXT NOT NULL,
                expires_at TEXT,
                revoked_at TEXT,
                last_used_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_api_keys_prefix ON workspace_api_keys(key_prefix);

            CREATE TABLE IF NOT EXISTS workspace_invites (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                token TEXT NOT NULL UNIQUE,
                role TEXT NOT NULL DEFAULT 'member',
                max_uses INTEGER,
                use_count INTEGER NOT NULL DEFAULT 0,
                expires_at TEXT,
                created_at TEXT NOT NULL,
                revoked_at TEXT
            );

            CREATE TABLE IF NOT EXISTS user_sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                token_hash TEXT NOT NULL UNIQUE,
                workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                last_active_at TEXT
            );",
        )
        .expect("Failed to run migrations");

        // Workspace backfill for databases that predate workspaces.
        // Each ALTER is idempotent — .ok() ignores "duplicate column" errors.
        conn.execute_batch("ALTER TABLE channels ADD COLUMN workspace_id TEXT;")
            .ok();
        conn.execute_batch("ALTER TABLE agents ADD COLUMN workspace_id TEXT;")
            .ok();
        conn.execute_batch("ALTER TABLE agents ADD COLUMN server_url TEXT;")
            .ok();
        conn.execute_batch("ALTER TABLE agents ADD COLUMN provider_session_id TEXT;")
            .ok();
        conn.execute_batch(
            "ALTER TABLE channels ADD COLUMN is_archived INTEGER NOT NULL DEFAULT 0;",
        )
        .ok();
        conn.execute_batch("ALTER TABLE channels ADD COLUMN archived_at TEXT;")
            .ok();
        conn.execute_batch("ALTER TABLE messages ADD COLUMN parent_id TEXT;")
            .ok();

        seed(&conn);

        conn.execute(
            "UPDATE channels SET workspace_id = ?1 WHERE workspace_id IS NULL",
            params![DEFAULT_WORKSPACE_ID],
        )
        .ok();
        conn.execute(
            "UPDATE agents SET workspace_id = ?1 WHERE workspace_id IS NULL",
            params![DEFAULT_WORKSPACE_ID],
        )
        .ok();

        // Pre-workspace databases have a lone human with no membership row.
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT OR IGNORE INTO workspace_members (workspace_id, user_id, role, joined_at)
             SELECT ?1, id, 'admin', ?2 FROM users WHERE user_type = 'human'
             AND id NOT IN (SELECT user_id FROM workspace_members WHERE workspace_id = ?1)",
            params![DEFAULT_WORKSPACE_ID, &now],
        )
        .ok();
    }
}

/// First-boot seed: the default workspace, the creator agent, and `#general`.
/// Idempotent: every insert is keyed or guarded by an existence check.
fn seed(conn: &Connection) {
    let now = chrono::Utc::now().to_rfc3339();

    conn.execute(
        "INSERT OR IGNORE INTO workspaces (id, name, slug, ws_type, description, created_at)
         VALUES (?1, 'Default', 'default', 'personal', 'Local workspace', ?2)",
        params![DEFAULT_WORKSPACE_ID, &now],
    )
    .ok();

    // Creator agent: the system user that authors seeded rows and hub notices.
    let creator_id: Option<String> = conn
        .query_row(
            "SELECT id FROM agents WHERE agent_type = 'system' LIMIT 1",
            [],
            |r| r.get(0),
        )
        .ok();
    let creator_id = match creator_id {
        Some(id) => id,
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO users (id, name, user_type, display_name, created_at)
                 VALUES (?1, 'talkto', 'agent', 'TalkTo', ?2)",
                params![&id, &now],
            )
            .ok();
            conn.execute(
                "INSERT INTO agents (id, agent_name, agent_type, status, workspace_id)
                 VALUES (?1, 'talkto', 'system', 'online', ?2)",
                params![&id, DEFAULT_WORKSPACE_ID],
            )
            .ok();
            conn.execute(
                "INSERT OR IGNORE INTO workspace_members (workspace_id, user_id, role, joined_at)
                 VALUES (?1, ?2, 'admin', ?3)",
                params![DEFAULT_WORKSPACE_ID, &id, &now],
            )
            .ok();
            id
        }
    };

    let general_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM channels WHERE workspace_id = ?1 AND name = '#general'",
            params![DEFAULT_WORKSPACE_ID],
            |r| r.get(0),
        )
        .unwrap_or(0);
    if general_count == 0 {
        conn.execute(
            "INSERT INTO channels (id, name, channel_type, topic, workspace_id, created_by, created_at)
             VALUES (?1, '#general', 'general', 'Anything goes', ?2, ?3, ?4)",
            params![uuid::Uuid::new_v4().to_string(), DEFAULT_WORKSPACE_ID, &creator_id, &now],
        )
        .ok();
    }
}

// --- Shared row mappers ---
// Column order matches the *_COLS constants; every query that maps into one
// of these models uses the matching constant in its SELECT list.

pub const MESSAGE_COLS: &str = "m.id, m.channel_id, m.sender_id, u.name, m.content, m.mentions, \
     m.parent_id, m.is_pinned, m.pinned_at, m.pinned_by, m.edited_at, m.created_at";

pub fn message_from_row(row: &Row) -> rusqlite::Result<Message> {
    let mentions_str: Option<String> = row.get(5)?;
    Ok(Message {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_name: row.get(3)?,
        content: row.get(4)?,
        mentions: mentions_str.and_then(|s| serde_json::from_str(&s).ok()),
        parent_id: row.get(6)?,
        is_pinned: row.get::<_, i64>(7)? != 0,
        pinned_at: row.get(8)?,
        pinned_by: row.get(9)?,
        edited_at: row.get(10)?,
        created_at: row.get(11)?,
    })
}

pub const CHANNEL_COLS: &str = "id, name, channel_type, topic, project_path, workspace_id, \
     created_by, created_at, is_archived, archived_at";

pub fn channel_from_row(row: &Row) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: row.get(0)?,
        name: row.get(1)?,
        channel_type: row.get(2)?,
        topic: row.get(3)?,
        project_path: row.get(4)?,
        workspace_id: row.get(5)?,
        created_by: row.get(6)?,
        created_at: row.get(7)?,
        is_archived: row.get::<_, i64>(8)? != 0,
        archived_at: row.get(9)?,
    })
}

pub const AGENT_COLS: &str = "a.id, a.agent_name, a.agent_type, a.project_path, a.project_name, \
     a.status, a.description, a.personality, a.current_task, a.gender, a.server_url, \
     a.provider_session_id, a.workspace_id";

pub fn agent_from_row(row: &Row) -> rusqlite::Result<Agent> {
    Ok(Agent {
        id: row.get(0)?,
        agent_name: row.get(1)?,
        agent_type: row.get(2)?,
        project_path: row.get(3)?,
        project_name: row.get(4)?,
        status: row.get(5)?,
        description: row.get(6)?,
        personality: row.get(7)?,
        current_task: row.get(8)?,
        gender: row.get(9)?,
        server_url: row.get(10)?,
        provider_session_id: row.get(11)?,
        workspace_id: row.get(12)?,
    })
}

pub const WORKSPACE_COLS: &str =
    "id, name, slug, ws_type, description, onboarding_prompt, human_welcome, created_by, created_at";

pub fn workspace_from_row(row: &Row) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        ws_type: row.get(3)?,
        description: row.get(4)?,
        onboarding_prompt: row.get(5)?,
        human_welcome: row.get(6)?,
        created_by: row.get(7)?,
        created_at: row.get(8)?,
    })
}

/// Escape `%`, `_` and the escape character itself so user queries match
/// literally inside a `LIKE ... ESCAPE '\'` pattern.
pub fn escape_like(query: &str) -> String {
    query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Resolve a channel within a workspace by id or by `#name` / bare name.
pub fn resolve_channel(conn: &Connection, workspace_id: &str, name_or_id: &str) -> Option<Channel> {
    let sql = format!("SELECT {CHANNEL_COLS} FROM channels WHERE workspace_id = ?1 AND id = ?2");
    if let Ok(ch) = conn.query_row(&sql, params![workspace_id, name_or_id], channel_from_row) {
        return Some(ch);
    }
    let name = if name_or_id.starts_with('#') {
        name_or_id.to_string()
    } else {
        format!("#{name_or_id}")
    };
    let sql = format!("SELECT {CHANNEL_COLS} FROM channels WHERE workspace_id = ?1 AND name = ?2");
    conn.query_row(&sql, params![workspace_id, &name], channel_from_row)
        .ok()
}
