//! SQLite tables as versioned backing stores.
//!
//! Each primitive runs inside one transaction, which makes it atomic per
//! identity. A replace rewrites the main row and every owned child row.

use super::rows::AggregateRow;
use super::{parse_version, Database, DatabaseResult};
use crate::types::{Account, Channel, Event, Session, User};
use rusqlite::{params, Connection, OptionalExtension};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;
use versioned_store::{BackendError, BackingStore, CasOutcome, Identity, Stored, Version};

/// The table holding one aggregate type.
pub struct Table<T> {
    db: Arc<Database>,
    _aggregate: PhantomData<fn() -> T>,
}

pub type UserTable = Table<User>;
pub type AccountTable = Table<Account>;
pub type SessionTable = Table<Session>;
pub type EventTable = Table<Event>;
pub type ChannelTable = Table<Channel>;

impl<T> Table<T> {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            _aggregate: PhantomData,
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }
}

impl<T> Clone for Table<T> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.db))
    }
}

impl<T: AggregateRow> Table<T> {
    fn stored_version(conn: &Connection, identity: &Identity) -> DatabaseResult<Option<Version>> {
        let sql = format!("SELECT version FROM {} WHERE id = ?1", T::TABLE);
        let version: Option<String> = conn
            .prepare_cached(&sql)?
            .query_row(params![identity.to_string()], |row| row.get(0))
            .optional()?;
        version.map(parse_version).transpose()
    }

    fn compare(conn: &Connection, identity: &Identity, expected: &Version) -> DatabaseResult<CasOutcome<T>> {
        match Self::stored_version(conn, identity)? {
            None => Ok(CasOutcome::Missing),
            Some(current) if current == *expected => Ok(CasOutcome::Applied),
            Some(_) => match T::load(conn, identity)? {
                Some(current) => Ok(CasOutcome::Conflict(current)),
                None => Ok(CasOutcome::Missing),
            },
        }
    }
}

impl<T> BackingStore<T> for Table<T>
where
    T: AggregateRow + Send + Sync,
{
    fn persist(&self, record: &Stored<T>) -> Result<(), BackendError> {
        self.db
            .with_transaction(|tx| T::insert(tx, record))
            .map_err(BackendError::from)?;
        trace!(table = T::TABLE, identity = %record.identity(), "Inserted row");
        Ok(())
    }

    fn fetch(&self, identity: &Identity) -> Result<Option<Stored<T>>, BackendError> {
        Ok(self.db.with_conn(|conn| T::load(conn, identity))?)
    }

    fn conditional_replace(
        &self,
        expected: &Version,
        next: &Stored<T>,
    ) -> Result<CasOutcome<T>, BackendError> {
        let outcome = self.db.with_transaction(|tx| {
            let outcome = Self::compare(tx, &next.identity(), expected)?;
            if matches!(outcome, CasOutcome::Applied) {
                T::overwrite(tx, next)?;
            }
            Ok(outcome)
        })?;
        Ok(outcome)
    }

    fn conditional_delete(
        &self,
        identity: &Identity,
        expected: &Version,
    ) -> Result<CasOutcome<T>, BackendError> {
        let outcome = self.db.with_transaction(|tx| {
            let outcome = Self::compare(tx, identity, expected)?;
            if matches!(outcome, CasOutcome::Applied) {
                let sql = format!("DELETE FROM {} WHERE id = ?1", T::TABLE);
                tx.prepare_cached(&sql)?
                    .execute(params![identity.to_string()])?;
            }
            Ok(outcome)
        })?;
        Ok(outcome)
    }
}
