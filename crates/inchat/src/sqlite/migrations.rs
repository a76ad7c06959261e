//! Database migrations.
//!
//! Migrations are run in order and tracked in the `migrations` table.
//!
//! Aggregate tables hold one row per live identity with its current version.
//! Rows that reference another aggregate store its identity without a foreign
//! key, so deleting a channel or event never rewrites anyone else's record.
//! Only owned child rows cascade.

use super::DatabaseResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> DatabaseResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version = schema_version(conn)?;

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_accounts(conn)?;
    }
    if current_version < 2 {
        migrate_v2_channels_and_events(conn)?;
    }
    if current_version < 3 {
        migrate_v3_channel_roles(conn)?;
    }

    info!("Migrations complete");
    Ok(())
}

/// Highest applied migration, 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> DatabaseResult<i32> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: users, accounts with their memberships, sessions.
fn migrate_v1_accounts(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v1: accounts");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            version TEXT NOT NULL,
            name TEXT NOT NULL UNIQUE,
            joined TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            version TEXT NOT NULL,
            user TEXT NOT NULL,
            password_hash TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_accounts_user
            ON accounts(user);

        CREATE TABLE IF NOT EXISTS account_channels (
            account TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
            ordinal INTEGER NOT NULL,
            alias TEXT NOT NULL,
            channel TEXT NOT NULL,
            PRIMARY KEY (account, ordinal)
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            version TEXT NOT NULL,
            account TEXT NOT NULL,
            expiry TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_account
            ON sessions(account);
        ",
    )?;

    record_migration(conn, 1, "accounts")?;
    Ok(())
}

/// V2: events with per-kind detail rows, channels with their event lists.
fn migrate_v2_channels_and_events(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v2: channels and events");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            version TEXT NOT NULL,
            kind INTEGER NOT NULL,
            time TEXT NOT NULL,
            sender TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS event_messages (
            event TEXT PRIMARY KEY REFERENCES events(id) ON DELETE CASCADE,
            text TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS event_joins (
            event TEXT PRIMARY KEY REFERENCES events(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS channels (
            id TEXT PRIMARY KEY,
            version TEXT NOT NULL,
            name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS channel_events (
            channel TEXT NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
            ordinal INTEGER NOT NULL,
            event TEXT NOT NULL,
            event_version TEXT NOT NULL,
            PRIMARY KEY (channel, ordinal)
        );

        CREATE INDEX IF NOT EXISTS idx_channel_events_event
            ON channel_events(event);
        ",
    )?;

    record_migration(conn, 2, "channels_and_events")?;
    Ok(())
}

/// V3: per-channel roles.
fn migrate_v3_channel_roles(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v3: channel roles");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS channel_roles (
            channel TEXT NOT NULL,
            account TEXT NOT NULL,
            role TEXT NOT NULL,
            PRIMARY KEY (channel, account)
        );
        ",
    )?;

    record_migration(conn, 3, "channel_roles")?;
    Ok(())
}
