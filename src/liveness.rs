use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use rusqlite::{Connection, params};

use crate::db::apply_pragmas;
use crate::sdk::SdkClient;

pub const SWEEP_INTERVAL_SECS: u64 = 30;
/// With no PID to probe, a heartbeat older than this marks the agent a ghost.
const HEARTBEAT_STALE_SECS: i64 = 90;

/// Advisory liveness verdicts, rebuilt wholesale every sweep. Readers see
/// either the previous or the new map, never a partial one.
#[derive(Clone, Default)]
pub struct GhostMap {
    inner: Arc<RwLock<HashMap<String, bool>>>,
}

impl GhostMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ghost(&self, agent_id: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(agent_id)
            .copied()
            .unwrap_or(false)
    }

    fn replace(&self, map: HashMap<String, bool>) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = map;
    }
}

/// Spawns the periodic health sweep. Errors are logged, never fatal; the
/// next tick retries naturally.
pub fn spawn_liveness_task(db_path: String, ghosts: GhostMap) {
    tokio::spawn(async move {
        let sdk = SdkClient::new();
        loop {
            sweep(&db_path, &sdk, &ghosts).await;
            purge_expired_sessions(&db_path);
            tokio::time::sleep(Duration::from_secs(SWEEP_INTERVAL_SECS)).await;
        }
    });
}

async fn sweep(db_path: &str, sdk: &SdkClient, ghosts: &GhostMap) {
    let agents: Vec<(String, String, Option<String>, Option<String>)> = {
        let Ok(conn) = Connection::open(db_path) else {
            return;
        };
        apply_pragmas(&conn);
        let Ok(mut stmt) = conn.prepare(
            "SELECT id, agent_type, server_url, provider_session_id FROM agents",
        ) else {
            return;
        };
        stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    };

    // One session listing per server per sweep; None = unreachable.
    let mut listings: HashMap<String, Option<Vec<String>>> = HashMap::new();
    let mut map = HashMap::new();

    for (id, agent_type, server_url, provider_session_id) in agents {
        if agent_type == "system" {
            map.insert(id, false);
            continue;
        }
        let ghost = match (server_url, provider_session_id) {
            (Some(url), Some(session_id)) => {
                if !listings.contains_key(&url) {
                    let listed = sdk
                        .list_sessions(&url)
                        .await
                        .ok()
                        .map(|sessions| sessions.into_iter().map(|s| s.id).collect());
                    listings.insert(url.clone(), listed);
                }
                match listings.get(&url) {
                    Some(Some(ids)) => !ids.contains(&session_id),
                    _ => true, // server unreachable
                }
            }
            _ => os_session_ghost(db_path, &id),
        };
        map.insert(id, ghost);
    }

    ghosts.replace(map);
}

/// Fallback for agents without runtime credentials: the most recent active
/// OS session decides. A recorded PID is probed with signal 0; otherwise
/// heartbeat freshness stands in.
fn os_session_ghost(db_path: &str, agent_id: &str) -> bool {
    let Ok(conn) = Connection::open(db_path) else {
        return true;
    };
    apply_pragmas(&conn);
    let row: Option<(Option<i64>, String)> = conn
        .query_row(
            "SELECT pid, last_heartbeat FROM agent_sessions
             WHERE agent_id = ?1 AND is_active = 1
             ORDER BY started_at DESC LIMIT 1",
            params![agent_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .ok();

    match row {
        None => true,
        Some((Some(pid), _)) => !pid_alive(pid),
        Some((None, heartbeat)) => match chrono::DateTime::parse_from_rfc3339(&heartbeat) {
            Ok(t) => {
                (chrono::Utc::now() - t.with_timezone(&chrono::Utc)).num_seconds()
                    > HEARTBEAT_STALE_SECS
            }
            Err(_) => true,
        },
    }
}

fn pid_alive(pid: i64) -> bool {
    if pid <= 0 {
        return false;
    }
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

/// Expired browser sessions are dead weight; sweep them while we're here.
fn purge_expired_sessions(db_path: &str) {
    let Ok(conn) = Connection::open(db_path) else {
        return;
    };
    apply_pragmas(&conn);
    let now = chrono::Utc::now().to_rfc3339();
    if let Ok(n) = conn.execute(
        "DELETE FROM user_sessions WHERE expires_at < ?1",
        params![&now],
    ) && n > 0
    {
        eprintln!("🧹 Purged {n} expired browser sessions");
    }
}
