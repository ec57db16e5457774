//! marksync database layer.
//!
//! Provides SQLite connection management and schema migrations for the
//! local session cache.
//!
//! # Usage
//!
//! ```no_run
//! use marksync::database::Database;
//!
//! let db = Database::open("marksync.db").expect("failed to open database");
//! let conn = db.connection();
//! ```

pub mod connection;
pub mod migrations;

pub use connection::Database;
