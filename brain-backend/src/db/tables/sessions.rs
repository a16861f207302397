//! Session and session turn database operations

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};

use super::super::Database;
use crate::models::{ActionRecord, Session, SessionSummary, Turn, TurnRole, WorkingMemory};

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Decode a JSON text column; a corrupt value is an error, never an empty default
fn decode_json<T: serde::de::DeserializeOwned>(column: usize, text: &str) -> SqliteResult<T> {
    serde_json::from_str(text).map_err(|e| {
        log::error!("[STORE] Unreadable JSON in column {}: {}", column, e);
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_turn(row: &Row) -> SqliteResult<Turn> {
    let role: String = row.get(0)?;
    let actions_json: String = row.get(4)?;
    let created_at: String = row.get(5)?;

    let actions: Vec<ActionRecord> = decode_json(4, &actions_json)?;

    Ok(Turn {
        role: role.parse().unwrap_or(TurnRole::Agent),
        agent_id: row.get(1)?,
        content: row.get(2)?,
        prompt: row.get(3)?,
        timestamp: parse_timestamp(&created_at),
        actions,
    })
}

/// Insert the session row if the id is new
fn ensure_session(conn: &Connection, session_id: &str, requester_id: &str, now: &str) -> SqliteResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO sessions (session_id, requester_id, working_memory, created_at, updated_at)
         VALUES (?1, ?2, '{}', ?3, ?3)",
        params![session_id, requester_id, now],
    )?;
    Ok(())
}

fn insert_turn(conn: &Connection, session_id: &str, turn: &Turn) -> SqliteResult<()> {
    let seq: i64 = conn.query_row(
        "SELECT COALESCE(MAX(seq), -1) + 1 FROM session_turns WHERE session_id = ?1",
        [session_id],
        |row| row.get(0),
    )?;
    let actions = serde_json::to_string(&turn.actions)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

    conn.execute(
        "INSERT INTO session_turns (session_id, seq, role, agent_id, content, prompt, actions, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            session_id,
            seq,
            turn.role.to_string(),
            turn.agent_id,
            turn.content,
            turn.prompt,
            actions,
            turn.timestamp.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Last-writer-wins merge of `partial` into the stored memory
fn merge_memory(conn: &Connection, session_id: &str, partial: &WorkingMemory) -> SqliteResult<()> {
    if partial.is_empty() {
        return Ok(());
    }
    let current: String = conn.query_row(
        "SELECT working_memory FROM sessions WHERE session_id = ?1",
        [session_id],
        |row| row.get(0),
    )?;
    let mut memory: WorkingMemory = decode_json(0, &current)?;
    for (key, value) in partial {
        memory.insert(key.clone(), value.clone());
    }
    let encoded = serde_json::to_string(&memory)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

    conn.execute(
        "UPDATE sessions SET working_memory = ?1 WHERE session_id = ?2",
        params![encoded, session_id],
    )?;
    Ok(())
}

fn touch(conn: &Connection, session_id: &str, now: &str) -> SqliteResult<()> {
    conn.execute(
        "UPDATE sessions SET updated_at = ?1 WHERE session_id = ?2",
        params![now, session_id],
    )?;
    Ok(())
}

impl Database {
    // ============================================
    // Session methods
    // ============================================

    /// Load a full session with its turns in insertion order
    pub fn get_session(&self, session_id: &str) -> SqliteResult<Option<Session>> {
        let conn = self.conn.lock();

        let header = conn
            .query_row(
                "SELECT requester_id, working_memory, created_at, updated_at FROM sessions WHERE session_id = ?1",
                [session_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((requester_id, memory_json, created_at, updated_at)) = header else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT role, agent_id, content, prompt, actions, created_at
             FROM session_turns WHERE session_id = ?1 ORDER BY seq ASC",
        )?;
        let turns = stmt
            .query_map([session_id], row_to_turn)?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok(Some(Session {
            session_id: session_id.to_string(),
            requester_id,
            turns,
            working_memory: decode_json(1, &memory_json)?,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        }))
    }

    /// Append a turn, creating the session on first use
    pub fn append_session_turn(&self, session_id: &str, requester_id: &str, turn: &Turn) -> SqliteResult<()> {
        let mut conn = self.conn.lock();
        let now = Utc::now().to_rfc3339();

        let tx = conn.transaction()?;
        ensure_session(&tx, session_id, requester_id, &now)?;
        insert_turn(&tx, session_id, turn)?;
        touch(&tx, session_id, &now)?;
        tx.commit()
    }

    /// Merge working memory, creating the session on first use
    pub fn merge_session_memory(
        &self,
        session_id: &str,
        requester_id: &str,
        partial: &WorkingMemory,
    ) -> SqliteResult<()> {
        let mut conn = self.conn.lock();
        let now = Utc::now().to_rfc3339();

        let tx = conn.transaction()?;
        ensure_session(&tx, session_id, requester_id, &now)?;
        merge_memory(&tx, session_id, partial)?;
        touch(&tx, session_id, &now)?;
        tx.commit()
    }

    /// Append a turn and merge memory in one transaction
    pub fn record_session_exchange(
        &self,
        session_id: &str,
        requester_id: &str,
        turn: &Turn,
        partial: &WorkingMemory,
    ) -> SqliteResult<()> {
        let mut conn = self.conn.lock();
        let now = Utc::now().to_rfc3339();

        let tx = conn.transaction()?;
        ensure_session(&tx, session_id, requester_id, &now)?;
        insert_turn(&tx, session_id, turn)?;
        merge_memory(&tx, session_id, partial)?;
        touch(&tx, session_id, &now)?;
        tx.commit()
    }

    /// Most recently updated sessions first
    pub fn list_sessions(&self, limit: usize) -> SqliteResult<Vec<SessionSummary>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            "SELECT s.session_id, s.requester_id, s.updated_at,
                    (SELECT COUNT(*) FROM session_turns t WHERE t.session_id = s.session_id)
             FROM sessions s ORDER BY s.updated_at DESC LIMIT ?1",
        )?;

        let sessions = stmt
            .query_map([limit as i64], |row| {
                let updated_at: String = row.get(2)?;
                Ok(SessionSummary {
                    session_id: row.get(0)?,
                    requester_id: row.get(1)?,
                    updated_at: parse_timestamp(&updated_at),
                    turn_count: row.get::<_, i64>(3)? as usize,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(sessions)
    }
}
