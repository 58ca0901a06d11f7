use rusqlite::{Connection, OptionalExtension, params};
use std::sync::Mutex;

use crate::error::{BrokerError, BrokerResult};
use crate::models::{Message, Protocol, Session, SessionStatus};

use super::Store;

/// Durable backend for broker + meeting state. A single mutex-guarded
/// connection is an acceptable serialization point given SQLite's
/// single-writer model, matching the reference crate's own `Mutex<Connection>`.
pub struct SqliteStore {
    pub conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(path: &str) -> Self {
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path).expect("failed to open broker database");
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .expect("failed to set pragmas");
        let store = SqliteStore { conn: Mutex::new(conn) };
        store.migrate();
        store
    }

    pub fn in_memory() -> Self {
        let conn = Connection::open_in_memory().expect("failed to open in-memory sqlite");
        let store = SqliteStore { conn: Mutex::new(conn) };
        store.migrate();
        store
    }

    fn migrate(&self) {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS projects (
                project_id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS protocols (
                project_id TEXT NOT NULL,
                name TEXT NOT NULL,
                version TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (project_id, name, version)
            );

            CREATE TABLE IF NOT EXISTS sessions (
                project_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                status TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (project_id, session_id)
            );

            CREATE TABLE IF NOT EXISTS queues (
                project_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                priority_rank INTEGER NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_queues_session ON queues(project_id, session_id);

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS agent_api_keys (
                agent_id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                nickname TEXT NOT NULL,
                created_by_id TEXT REFERENCES users(id) ON DELETE SET NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_agent_keys_created_by ON agent_api_keys(created_by_id);

            CREATE TABLE IF NOT EXISTS meetings (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS meeting_participants (
                meeting_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                speaking_order INTEGER NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (meeting_id, agent_id),
                UNIQUE (meeting_id, speaking_order)
            );

            CREATE TABLE IF NOT EXISTS meeting_messages (
                meeting_id TEXT NOT NULL,
                sequence_number INTEGER NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (meeting_id, sequence_number)
            );

            CREATE TABLE IF NOT EXISTS decisions (
                id TEXT PRIMARY KEY,
                meeting_id TEXT NOT NULL,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id);

            CREATE TABLE IF NOT EXISTS audit_logs (
                id TEXT PRIMARY KEY,
                at TEXT NOT NULL,
                actor TEXT,
                action TEXT NOT NULL,
                detail TEXT
            );
            ",
        )
        .expect("failed to run broker migrations");
    }
}

impl Store for SqliteStore {
    fn save_protocol(&self, project_id: &str, protocol: &Protocol) -> BrokerResult<()> {
        let conn = self.conn.lock().unwrap();
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM protocols WHERE project_id=?1 AND name=?2 AND version=?3",
                params![project_id, protocol.name, protocol.version],
                |r| r.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(BrokerError::Duplicate(format!(
                "protocol {} v{} already registered in project {project_id}",
                protocol.name, protocol.version
            )));
        }
        let data = serde_json::to_string(protocol).map_err(|e| BrokerError::Internal(e.to_string()))?;
        conn.execute(
            "INSERT INTO protocols (project_id, name, version, data) VALUES (?1, ?2, ?3, ?4)",
            params![project_id, protocol.name, protocol.version, data],
        )?;
        Ok(())
    }

    fn get_protocol(&self, project_id: &str, name: &str, version: &str) -> BrokerResult<Option<Protocol>> {
        let conn = self.conn.lock().unwrap();
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM protocols WHERE project_id=?1 AND name=?2 AND version=?3",
                params![project_id, name, version],
                |r| r.get(0),
            )
            .optional()?;
        data.map(|d| serde_json::from_str(&d).map_err(|e| BrokerError::Internal(e.to_string())))
            .transpose()
    }

    fn list_protocols(
        &self,
        project_id: &str,
        name: Option<&str>,
        version: Option<&str>,
    ) -> BrokerResult<Vec<Protocol>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT data FROM protocols WHERE project_id=?1")?;
        let rows = stmt.query_map(params![project_id], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            let protocol: Protocol =
                serde_json::from_str(&row?).map_err(|e| BrokerError::Internal(e.to_string()))?;
            if name.is_none_or(|n| protocol.name == n) && version.is_none_or(|v| protocol.version == v) {
                out.push(protocol);
            }
        }
        Ok(out)
    }

    fn delete_protocol(&self, project_id: &str, name: &str, version: &str) -> BrokerResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM protocols WHERE project_id=?1 AND name=?2 AND version=?3",
            params![project_id, name, version],
        )?;
        Ok(())
    }

    fn save_session(&self, project_id: &str, session: &Session) -> BrokerResult<()> {
        let conn = self.conn.lock().unwrap();
        let data = serde_json::to_string(session).map_err(|e| BrokerError::Internal(e.to_string()))?;
        let status = format!("{:?}", session.status).to_lowercase();
        conn.execute(
            "INSERT INTO sessions (project_id, session_id, status, data) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(project_id, session_id) DO UPDATE SET status=excluded.status, data=excluded.data",
            params![project_id, session.session_id, status, data],
        )?;
        Ok(())
    }

    fn get_session(&self, project_id: &str, session_id: &str) -> BrokerResult<Option<Session>> {
        let conn = self.conn.lock().unwrap();
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM sessions WHERE project_id=?1 AND session_id=?2",
                params![project_id, session_id],
                |r| r.get(0),
            )
            .optional()?;
        data.map(|d| serde_json::from_str(&d).map_err(|e| BrokerError::Internal(e.to_string())))
            .transpose()
    }

    fn list_sessions(
        &self,
        project_id: &str,
        status: Option<SessionStatus>,
    ) -> BrokerResult<Vec<Session>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT data FROM sessions WHERE project_id=?1")?;
        let rows = stmt.query_map(params![project_id], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            let session: Session =
                serde_json::from_str(&row?).map_err(|e| BrokerError::Internal(e.to_string()))?;
            if status.is_none_or(|s| session.status == s) {
                out.push(session);
            }
        }
        Ok(out)
    }

    fn list_all_sessions(&self) -> BrokerResult<Vec<Session>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT data FROM sessions")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?).map_err(|e| BrokerError::Internal(e.to_string()))?);
        }
        Ok(out)
    }

    fn delete_session(&self, project_id: &str, session_id: &str) -> BrokerResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM sessions WHERE project_id=?1 AND session_id=?2",
            params![project_id, session_id],
        )?;
        conn.execute(
            "DELETE FROM queues WHERE project_id=?1 AND session_id=?2",
            params![project_id, session_id],
        )?;
        Ok(())
    }

    fn enqueue(
        &self,
        project_id: &str,
        session_id: &str,
        message: &Message,
        capacity: usize,
    ) -> BrokerResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queues WHERE project_id=?1 AND session_id=?2",
            params![project_id, session_id],
            |r| r.get(0),
        )?;
        if count as usize >= capacity {
            return Err(BrokerError::QueueFull(format!(
                "session {session_id} queue at capacity ({capacity})"
            )));
        }
        let next_seq: i64 = conn.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM queues WHERE project_id=?1 AND session_id=?2",
            params![project_id, session_id],
            |r| r.get(0),
        )?;
        let data = serde_json::to_string(message).map_err(|e| BrokerError::Internal(e.to_string()))?;
        conn.execute(
            "INSERT INTO queues (project_id, session_id, seq, priority_rank, data) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![project_id, session_id, next_seq, message.headers.priority.rank() as i64, data],
        )?;
        let size = count as usize + 1;
        conn.execute(
            "UPDATE sessions SET data = json_set(data, '$.queue_size', ?3) WHERE project_id=?1 AND session_id=?2",
            params![project_id, session_id, size as i64],
        )
        .ok();
        let ratio = size as f64 / capacity as f64;
        if ratio >= 0.9 {
            tracing::warn!(project_id, session_id, size, capacity, "session queue at 90% watermark");
        }
        Ok(size)
    }

    fn dequeue(&self, project_id: &str, session_id: &str, limit: usize) -> BrokerResult<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT rowid, data FROM queues WHERE project_id=?1 AND session_id=?2
             ORDER BY priority_rank DESC, seq ASC LIMIT ?3",
        )?;
        let rows: Vec<(i64, String)> = stmt
            .query_map(params![project_id, session_id, limit as i64], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })?
            .collect::<Result<_, _>>()?;
        drop(stmt);
        let mut out = Vec::new();
        for (rowid, data) in rows {
            conn.execute("DELETE FROM queues WHERE rowid=?1", params![rowid])?;
            out.push(serde_json::from_str(&data).map_err(|e| BrokerError::Internal(e.to_string()))?);
        }
        let remaining: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queues WHERE project_id=?1 AND session_id=?2",
            params![project_id, session_id],
            |r| r.get(0),
        )?;
        conn.execute(
            "UPDATE sessions SET data = json_set(data, '$.queue_size', ?3) WHERE project_id=?1 AND session_id=?2",
            params![project_id, session_id, remaining],
        )
        .ok();
        Ok(out)
    }

    fn queue_size(&self, project_id: &str, session_id: &str) -> BrokerResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queues WHERE project_id=?1 AND session_id=?2",
            params![project_id, session_id],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    fn clear_queue(&self, project_id: &str, session_id: &str) -> BrokerResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM queues WHERE project_id=?1 AND session_id=?2",
            params![project_id, session_id],
        )?;
        conn.execute(
            "UPDATE sessions SET data = json_set(data, '$.queue_size', 0) WHERE project_id=?1 AND session_id=?2",
            params![project_id, session_id],
        )
        .ok();
        Ok(())
    }
}
