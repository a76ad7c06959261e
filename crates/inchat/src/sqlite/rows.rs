//! Row codecs: how each aggregate maps onto its tables.

use super::{
    format_datetime, parse_datetime, parse_identity, parse_version, DatabaseError, DatabaseResult,
};
use crate::types::{Account, Channel, Event, EventKind, EventRef, Membership, Session, User, UserName};
use rusqlite::{params, Connection, OptionalExtension};
use versioned_store::{Identity, Stored};

/// An aggregate persisted as one main row plus optional owned child rows.
///
/// The main table has `id` and `version` columns; child rows reference `id`
/// with `ON DELETE CASCADE`.
pub trait AggregateRow: Sized {
    /// Main table name.
    const TABLE: &'static str;

    /// Inserts the main row and all child rows.
    fn insert(conn: &Connection, record: &Stored<Self>) -> DatabaseResult<()>;

    /// Rewrites the main row and replaces all child rows.
    fn overwrite(conn: &Connection, record: &Stored<Self>) -> DatabaseResult<()>;

    /// Reads the live record, if any.
    fn load(conn: &Connection, identity: &Identity) -> DatabaseResult<Option<Stored<Self>>>;
}

fn parse_name(s: String) -> DatabaseResult<UserName> {
    UserName::parse(s).map_err(DatabaseError::invalid)
}

// ==========================================
// Users
// ==========================================

impl AggregateRow for User {
    const TABLE: &'static str = "users";

    fn insert(conn: &Connection, record: &Stored<Self>) -> DatabaseResult<()> {
        let user = record.value();
        conn.prepare_cached("INSERT INTO users (id, version, name, joined) VALUES (?1, ?2, ?3, ?4)")?
            .execute(params![
                record.identity().to_string(),
                record.version().to_string(),
                user.name.as_str(),
                format_datetime(&user.joined),
            ])?;
        Ok(())
    }

    fn overwrite(conn: &Connection, record: &Stored<Self>) -> DatabaseResult<()> {
        let user = record.value();
        conn.prepare_cached("UPDATE users SET version = ?2, name = ?3, joined = ?4 WHERE id = ?1")?
            .execute(params![
                record.identity().to_string(),
                record.version().to_string(),
                user.name.as_str(),
                format_datetime(&user.joined),
            ])?;
        Ok(())
    }

    fn load(conn: &Connection, identity: &Identity) -> DatabaseResult<Option<Stored<Self>>> {
        let row = conn
            .prepare_cached("SELECT version, name, joined FROM users WHERE id = ?1")?
            .query_row(params![identity.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .optional()?;

        let Some((version, name, joined)) = row else {
            return Ok(None);
        };
        let user = User::new(parse_name(name)?, parse_datetime(joined)?);
        Ok(Some(Stored::from_parts(*identity, parse_version(version)?, user)))
    }
}

// ==========================================
// Accounts
// ==========================================

fn write_memberships(conn: &Connection, account: &Identity, channels: &[Membership]) -> DatabaseResult<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO account_channels (account, ordinal, alias, channel) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (ordinal, membership) in channels.iter().enumerate() {
        stmt.execute(params![
            account.to_string(),
            ordinal as i64,
            membership.alias,
            membership.channel.to_string(),
        ])?;
    }
    Ok(())
}

impl AggregateRow for Account {
    const TABLE: &'static str = "accounts";

    fn insert(conn: &Connection, record: &Stored<Self>) -> DatabaseResult<()> {
        let account = record.value();
        conn.prepare_cached(
            "INSERT INTO accounts (id, version, user, password_hash) VALUES (?1, ?2, ?3, ?4)",
        )?
        .execute(params![
            record.identity().to_string(),
            record.version().to_string(),
            account.user.to_string(),
            account.password_hash,
        ])?;
        write_memberships(conn, &record.identity(), &account.channels)
    }

    fn overwrite(conn: &Connection, record: &Stored<Self>) -> DatabaseResult<()> {
        let account = record.value();
        conn.prepare_cached(
            "UPDATE accounts SET version = ?2, user = ?3, password_hash = ?4 WHERE id = ?1",
        )?
        .execute(params![
            record.identity().to_string(),
            record.version().to_string(),
            account.user.to_string(),
            account.password_hash,
        ])?;
        conn.prepare_cached("DELETE FROM account_channels WHERE account = ?1")?
            .execute(params![record.identity().to_string()])?;
        write_memberships(conn, &record.identity(), &account.channels)
    }

    fn load(conn: &Connection, identity: &Identity) -> DatabaseResult<Option<Stored<Self>>> {
        let row = conn
            .prepare_cached("SELECT version, user, password_hash FROM accounts WHERE id = ?1")?
            .query_row(params![identity.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .optional()?;

        let Some((version, user, password_hash)) = row else {
            return Ok(None);
        };

        let mut stmt = conn.prepare_cached(
            "SELECT alias, channel FROM account_channels WHERE account = ?1 ORDER BY ordinal ASC",
        )?;
        let rows = stmt
            .query_map(params![identity.to_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let channels = rows
            .into_iter()
            .map(|(alias, channel)| {
                Ok(Membership {
                    alias,
                    channel: parse_identity(channel)?,
                })
            })
            .collect::<DatabaseResult<Vec<_>>>()?;

        let account = Account {
            user: parse_identity(user)?,
            channels,
            password_hash,
        };
        Ok(Some(Stored::from_parts(*identity, parse_version(version)?, account)))
    }
}

// ==========================================
// Sessions
// ==========================================

impl AggregateRow for Session {
    const TABLE: &'static str = "sessions";

    fn insert(conn: &Connection, record: &Stored<Self>) -> DatabaseResult<()> {
        let session = record.value();
        conn.prepare_cached(
            "INSERT INTO sessions (id, version, account, expiry) VALUES (?1, ?2, ?3, ?4)",
        )?
        .execute(params![
            record.identity().to_string(),
            record.version().to_string(),
            session.account.to_string(),
            format_datetime(&session.expiry),
        ])?;
        Ok(())
    }

    fn overwrite(conn: &Connection, record: &Stored<Self>) -> DatabaseResult<()> {
        let session = record.value();
        conn.prepare_cached(
            "UPDATE sessions SET version = ?2, account = ?3, expiry = ?4 WHERE id = ?1",
        )?
        .execute(params![
            record.identity().to_string(),
            record.version().to_string(),
            session.account.to_string(),
            format_datetime(&session.expiry),
        ])?;
        Ok(())
    }

    fn load(conn: &Connection, identity: &Identity) -> DatabaseResult<Option<Stored<Self>>> {
        let row = conn
            .prepare_cached("SELECT version, account, expiry FROM sessions WHERE id = ?1")?
            .query_row(params![identity.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .optional()?;

        let Some((version, account, expiry)) = row else {
            return Ok(None);
        };
        let session = Session {
            account: parse_identity(account)?,
            expiry: parse_datetime(expiry)?,
        };
        Ok(Some(Stored::from_parts(*identity, parse_version(version)?, session)))
    }
}

// ==========================================
// Events
// ==========================================

fn write_event_detail(conn: &Connection, event: &Identity, value: &Event) -> DatabaseResult<()> {
    match value {
        Event::Message { text, .. } => {
            conn.prepare_cached("INSERT INTO event_messages (event, text) VALUES (?1, ?2)")?
                .execute(params![event.to_string(), text])?;
        }
        Event::Join { .. } => {
            conn.prepare_cached("INSERT INTO event_joins (event) VALUES (?1)")?
                .execute(params![event.to_string()])?;
        }
    }
    Ok(())
}

impl AggregateRow for Event {
    const TABLE: &'static str = "events";

    fn insert(conn: &Connection, record: &Stored<Self>) -> DatabaseResult<()> {
        let event = record.value();
        conn.prepare_cached(
            "INSERT INTO events (id, version, kind, time, sender) VALUES (?1, ?2, ?3, ?4, ?5)",
        )?
        .execute(params![
            record.identity().to_string(),
            record.version().to_string(),
            event.kind().code(),
            format_datetime(&event.time()),
            event.sender().as_str(),
        ])?;
        write_event_detail(conn, &record.identity(), event)
    }

    fn overwrite(conn: &Connection, record: &Stored<Self>) -> DatabaseResult<()> {
        let event = record.value();
        let id = record.identity().to_string();
        conn.prepare_cached(
            "UPDATE events SET version = ?2, kind = ?3, time = ?4, sender = ?5 WHERE id = ?1",
        )?
        .execute(params![
            id,
            record.version().to_string(),
            event.kind().code(),
            format_datetime(&event.time()),
            event.sender().as_str(),
        ])?;
        conn.prepare_cached("DELETE FROM event_messages WHERE event = ?1")?
            .execute(params![id])?;
        conn.prepare_cached("DELETE FROM event_joins WHERE event = ?1")?
            .execute(params![id])?;
        write_event_detail(conn, &record.identity(), event)
    }

    fn load(conn: &Connection, identity: &Identity) -> DatabaseResult<Option<Stored<Self>>> {
        let row = conn
            .prepare_cached(
                "SELECT e.version, e.kind, e.time, e.sender, m.text
                 FROM events e
                 LEFT JOIN event_messages m ON m.event = e.id
                 WHERE e.id = ?1",
            )?
            .query_row(params![identity.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })
            .optional()?;

        let Some((version, kind, time, sender, text)) = row else {
            return Ok(None);
        };

        let time = parse_datetime(time)?;
        let sender = parse_name(sender)?;
        let event = match EventKind::from_code(kind) {
            Some(EventKind::Message) => {
                let text = text.ok_or_else(|| {
                    DatabaseError::invalid(format!("message event {identity} has no text"))
                })?;
                Event::message(time, sender, text)
            }
            Some(EventKind::Join) => Event::join(time, sender),
            None => {
                return Err(DatabaseError::invalid(format!(
                    "event {identity} has unknown kind {kind}"
                )))
            }
        };
        Ok(Some(Stored::from_parts(*identity, parse_version(version)?, event)))
    }
}

// ==========================================
// Channels
// ==========================================

fn write_channel_events(conn: &Connection, channel: &Identity, events: &[EventRef]) -> DatabaseResult<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO channel_events (channel, ordinal, event, event_version) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (ordinal, event) in events.iter().enumerate() {
        stmt.execute(params![
            channel.to_string(),
            ordinal as i64,
            event.identity.to_string(),
            event.version.to_string(),
        ])?;
    }
    Ok(())
}

impl AggregateRow for Channel {
    const TABLE: &'static str = "channels";

    fn insert(conn: &Connection, record: &Stored<Self>) -> DatabaseResult<()> {
        let channel = record.value();
        conn.prepare_cached("INSERT INTO channels (id, version, name) VALUES (?1, ?2, ?3)")?
            .execute(params![
                record.identity().to_string(),
                record.version().to_string(),
                channel.name,
            ])?;
        write_channel_events(conn, &record.identity(), &channel.events)
    }

    fn overwrite(conn: &Connection, record: &Stored<Self>) -> DatabaseResult<()> {
        let channel = record.value();
        conn.prepare_cached("UPDATE channels SET version = ?2, name = ?3 WHERE id = ?1")?
            .execute(params![
                record.identity().to_string(),
                record.version().to_string(),
                channel.name,
            ])?;
        conn.prepare_cached("DELETE FROM channel_events WHERE channel = ?1")?
            .execute(params![record.identity().to_string()])?;
        write_channel_events(conn, &record.identity(), &channel.events)
    }

    fn load(conn: &Connection, identity: &Identity) -> DatabaseResult<Option<Stored<Self>>> {
        let row = conn
            .prepare_cached("SELECT version, name FROM channels WHERE id = ?1")?
            .query_row(params![identity.to_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .optional()?;

        let Some((version, name)) = row else {
            return Ok(None);
        };

        let mut stmt = conn.prepare_cached(
            "SELECT event, event_version FROM channel_events WHERE channel = ?1 ORDER BY ordinal ASC",
        )?;
        let rows = stmt
            .query_map(params![identity.to_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let events = rows
            .into_iter()
            .map(|(event, version)| {
                Ok(EventRef {
                    identity: parse_identity(event)?,
                    version: parse_version(version)?,
                })
            })
            .collect::<DatabaseResult<Vec<_>>>()?;

        let channel = Channel { name, events };
        Ok(Some(Stored::from_parts(*identity, parse_version(version)?, channel)))
    }
}
