//! The local SQLite handle behind the session cache.

use rusqlite::Connection;
use std::path::Path;

use super::migrations;

/// A migrated SQLite connection.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens the cache file at `path`, creating it if needed, and brings its
    /// schema up to date.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, rusqlite::Error> {
        let path = path.as_ref();
        log::debug!("opening session cache {}", path.display());
        Self::migrated(Connection::open(path)?)
    }

    /// A throwaway cache for tests and for runs without a data directory.
    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        Self::migrated(Connection::open_in_memory()?)
    }

    fn migrated(conn: Connection) -> Result<Self, rusqlite::Error> {
        migrations::run_all(&conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}
