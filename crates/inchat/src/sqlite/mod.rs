//! SQLite persistence for InChat.
//!
//! [`Database`] owns the connection. The per-aggregate tables in [`tables`]
//! implement the versioned backing-store contract over it; the lookups here
//! answer questions the versioned contract cannot (by name, by reference).

mod error;
pub mod migrations;
mod rows;
pub mod tables;

pub use error::{DatabaseError, DatabaseResult};
pub use tables::{AccountTable, ChannelTable, EventTable, SessionTable, Table, UserTable};

use crate::types::{ChannelRole, UserName};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::path::Path;
use tracing::{debug, info};
use versioned_store::{Identity, Version};

/// A single SQLite connection shared by every table.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open a database at the given path, running migrations if needed.
    pub fn open(path: &Path) -> DatabaseResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
        ",
        )?;
        migrations::run_migrations(&conn)?;

        info!(path = %path.display(), "Opened database");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database for testing.
    pub fn open_in_memory() -> DatabaseResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Runs `f` with the connection locked.
    pub(crate) fn with_conn<R>(
        &self,
        f: impl FnOnce(&Connection) -> DatabaseResult<R>,
    ) -> DatabaseResult<R> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Runs `f` inside one transaction; commits only if `f` succeeds.
    ///
    /// The write lock is taken at `BEGIN`, so a read-then-write inside `f`
    /// cannot be invalidated by another connection to the same file. Waiting
    /// for that lock is bounded by `busy_timeout`.
    pub(crate) fn with_transaction<R>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> DatabaseResult<R>,
    ) -> DatabaseResult<R> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    pub fn schema_version(&self) -> DatabaseResult<i32> {
        self.with_conn(migrations::schema_version)
    }

    // ==========================================
    // Lookups
    // ==========================================

    /// Identity of the user registered under `name`.
    pub fn user_by_name(&self, name: &UserName) -> DatabaseResult<Option<Identity>> {
        self.with_conn(|conn| {
            let id: Option<String> = conn
                .prepare_cached("SELECT id FROM users WHERE name = ?1")?
                .query_row(params![name.as_str()], |row| row.get(0))
                .optional()?;
            id.map(parse_identity).transpose()
        })
    }

    /// Identity of the account belonging to the user named `name`.
    pub fn account_by_username(&self, name: &UserName) -> DatabaseResult<Option<Identity>> {
        self.with_conn(|conn| {
            let id: Option<String> = conn
                .prepare_cached(
                    "SELECT a.id FROM accounts a
                     JOIN users u ON u.id = a.user
                     WHERE u.name = ?1",
                )?
                .query_row(params![name.as_str()], |row| row.get(0))
                .optional()?;
            id.map(parse_identity).transpose()
        })
    }

    /// Role of `account` in `channel`, if one was recorded.
    pub fn channel_role(
        &self,
        channel: &Identity,
        account: &Identity,
    ) -> DatabaseResult<Option<ChannelRole>> {
        self.with_conn(|conn| {
            let role: Option<String> = conn
                .prepare_cached("SELECT role FROM channel_roles WHERE channel = ?1 AND account = ?2")?
                .query_row(params![channel.to_string(), account.to_string()], |row| {
                    row.get(0)
                })
                .optional()?;
            role.map(|r| r.parse::<ChannelRole>().map_err(DatabaseError::invalid))
                .transpose()
        })
    }

    /// Records `role` for `account` in `channel`, replacing any previous role.
    pub fn set_channel_role(
        &self,
        channel: &Identity,
        account: &Identity,
        role: ChannelRole,
    ) -> DatabaseResult<()> {
        self.with_conn(|conn| {
            conn.prepare_cached(
                "INSERT INTO channel_roles (channel, account, role) VALUES (?1, ?2, ?3)
                 ON CONFLICT (channel, account) DO UPDATE SET role = excluded.role",
            )?
            .execute(params![channel.to_string(), account.to_string(), role.as_str()])?;
            debug!(channel = %channel, account = %account, role = %role, "Set channel role");
            Ok(())
        })
    }

    /// Records `role` unless the account already has one. Returns whether a
    /// row was inserted.
    pub fn grant_channel_role(
        &self,
        channel: &Identity,
        account: &Identity,
        role: ChannelRole,
    ) -> DatabaseResult<bool> {
        self.with_conn(|conn| {
            let inserted = conn
                .prepare_cached(
                    "INSERT OR IGNORE INTO channel_roles (channel, account, role)
                     VALUES (?1, ?2, ?3)",
                )?
                .execute(params![channel.to_string(), account.to_string(), role.as_str()])?;
            Ok(inserted > 0)
        })
    }

    /// Channels whose current event list references `event`.
    pub fn channels_containing(&self, event: &Identity) -> DatabaseResult<Vec<Identity>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT DISTINCT channel FROM channel_events WHERE event = ?1",
            )?;
            let ids = stmt
                .query_map(params![event.to_string()], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids.into_iter().map(parse_identity).collect()
        })
    }
}

pub(crate) fn parse_identity(s: String) -> DatabaseResult<Identity> {
    s.parse()
        .map_err(|e| DatabaseError::invalid(format!("identity: {e}")))
}

pub(crate) fn parse_version(s: String) -> DatabaseResult<Version> {
    s.parse()
        .map_err(|e| DatabaseError::invalid(format!("version: {e}")))
}

/// Timestamps keep full precision so a re-read record compares equal.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_datetime(s: String) -> DatabaseResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::invalid(format!("timestamp {s:?}: {e}")))
}
