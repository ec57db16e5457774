//! Session Manager for marksync.
//!
//! Persists the signed-in session in SQLite so that a restarted client
//! comes back signed in, and forgets it on sign-out.

use std::sync::{Mutex, MutexGuard};

use rusqlite::params;

use crate::database::connection::Database;
use crate::types::errors::SessionError;
use crate::types::session::Session;

/// Trait defining session cache operations.
pub trait SessionManagerTrait {
    fn save_session(&self, session: &Session) -> Result<(), SessionError>;
    fn restore_session(&self) -> Result<Option<Session>, SessionError>;
    fn has_session(&self) -> bool;
    fn clear_session(&self) -> Result<(), SessionError>;
}

/// Session cache backed by a single-row SQLite table.
pub struct SessionManager {
    db: Mutex<Database>,
}

impl SessionManager {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        match self.db.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl SessionManagerTrait for SessionManager {
    /// Stores `session`, replacing any previous one.
    fn save_session(&self, session: &Session) -> Result<(), SessionError> {
        let json = serde_json::to_string(session)
            .map_err(|e| SessionError::SerializationError(e.to_string()))?;
        let now = chrono::Utc::now().timestamp();

        self.db()
            .connection()
            .execute(
                "INSERT OR REPLACE INTO auth_session (id, user_id, session_json, saved_at) VALUES ('current', ?1, ?2, ?3)",
                params![session.user_id(), json, now],
            )
            .map_err(|e| SessionError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    /// Returns the stored session, if any.
    fn restore_session(&self) -> Result<Option<Session>, SessionError> {
        let db = self.db();
        let result = db.connection().query_row(
            "SELECT session_json FROM auth_session WHERE id = 'current'",
            [],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(json) => {
                let session: Session = serde_json::from_str(&json)
                    .map_err(|e| SessionError::SerializationError(e.to_string()))?;
                Ok(Some(session))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(SessionError::DatabaseError(e.to_string())),
        }
    }

    fn has_session(&self) -> bool {
        let count: i64 = self
            .db()
            .connection()
            .query_row("SELECT COUNT(*) FROM auth_session", [], |row| row.get(0))
            .unwrap_or(0);
        count > 0
    }

    fn clear_session(&self) -> Result<(), SessionError> {
        self.db()
            .connection()
            .execute("DELETE FROM auth_session", [])
            .map_err(|e| SessionError::DatabaseError(e.to_string()))?;
        Ok(())
    }
}
