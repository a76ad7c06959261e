//! The InChat engine.
//!
//! Composes the versioned stores for the login, posting and joining use
//! cases. Every write goes through the versioned contract; nothing here takes
//! a lock that spans more than one aggregate.

use crate::channel::{Appended, ChannelLog, ChannelView};
use crate::credentials::{CredentialPolicy, ScryptCredentials};
use crate::error::{InChatError, InChatResult};
use crate::sqlite::{
    AccountTable, ChannelTable, Database, EventTable, SessionTable, Table, UserTable,
};
use crate::types::{Account, Channel, ChannelRole, Event, Membership, Session, User, UserName};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use versioned_store::{Identity, RetryPolicy, Storage, StorageError, Stored, Version, VersionedStore};

/// Tunables supplied at construction.
#[derive(Debug, Clone, Copy)]
pub struct InChatOptions {
    /// How long a new session stays valid.
    pub session_ttl: chrono::Duration,
    /// Wait applied when a long-poll caller gives no timeout.
    pub long_poll_timeout: Duration,
    /// Retry policy for every store.
    pub retry: RetryPolicy,
}

impl Default for InChatOptions {
    fn default() -> Self {
        Self {
            session_ttl: chrono::Duration::hours(24),
            long_poll_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// Everything created by a successful registration.
#[derive(Debug, Clone)]
pub struct Registered {
    pub user: Stored<User>,
    pub account: Stored<Account>,
    pub session: Stored<Session>,
}

/// The InChat engine.
pub struct InChat<P = ScryptCredentials> {
    db: Arc<Database>,
    users: VersionedStore<User, UserTable>,
    accounts: VersionedStore<Account, AccountTable>,
    sessions: VersionedStore<Session, SessionTable>,
    log: ChannelLog<ChannelTable, EventTable>,
    credentials: P,
    options: InChatOptions,
}

impl InChat<ScryptCredentials> {
    /// Opens (or creates) the database at `path`.
    pub fn open(path: &Path, options: InChatOptions) -> InChatResult<Self> {
        let db = Database::open(path)?;
        Ok(Self::from_database(Arc::new(db), options, ScryptCredentials::default()))
    }

    /// An engine over a fresh in-memory database.
    pub fn in_memory(options: InChatOptions) -> InChatResult<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self::from_database(Arc::new(db), options, ScryptCredentials::default()))
    }
}

impl<P: CredentialPolicy> InChat<P> {
    pub fn from_database(db: Arc<Database>, options: InChatOptions, credentials: P) -> Self {
        fn store<T: Clone>(db: &Arc<Database>, retry: RetryPolicy) -> VersionedStore<T, Table<T>>
        where
            Table<T>: versioned_store::BackingStore<T>,
        {
            VersionedStore::new(Table::new(Arc::clone(db))).with_retry_policy(retry)
        }

        let retry = options.retry;
        let log = ChannelLog::new(store(&db, retry), store(&db, retry));
        info!("InChat engine ready");

        Self {
            users: store(&db, retry),
            accounts: store(&db, retry),
            sessions: store(&db, retry),
            log,
            db,
            credentials,
            options,
        }
    }

    /// Replaces the credential policy.
    pub fn with_credentials<Q: CredentialPolicy>(self, credentials: Q) -> InChat<Q> {
        InChat {
            db: self.db,
            users: self.users,
            accounts: self.accounts,
            sessions: self.sessions,
            log: self.log,
            credentials,
            options: self.options,
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn options(&self) -> &InChatOptions {
        &self.options
    }

    pub fn channel_log(&self) -> &ChannelLog<ChannelTable, EventTable> {
        &self.log
    }

    /// Releases every long-poll waiter and refuses new ones.
    pub fn shutdown(&self) {
        self.users.hub().shutdown();
        self.accounts.hub().shutdown();
        self.sessions.hub().shutdown();
        self.log.shutdown();
        info!("InChat engine shut down");
    }

    // ==========================================
    // Accounts and sessions
    // ==========================================

    pub fn register(
        &self,
        username: &str,
        password: &str,
        repeat: &str,
    ) -> InChatResult<Registered> {
        let name = UserName::parse(username)?;
        if password != repeat {
            return Err(InChatError::PasswordMismatch);
        }
        self.credentials
            .check_strength(password)
            .map_err(InChatError::WeakPassword)?;
        if self.db.user_by_name(&name)?.is_some() {
            return Err(InChatError::UsernameTaken(name));
        }
        let password_hash = self.credentials.hash(password)?;

        let user = match self.users.save(User::new(name.clone(), Utc::now())) {
            Ok(user) => user,
            Err(err) => {
                // Lost a race with another registration of the same name.
                if self.db.user_by_name(&name)?.is_some() {
                    debug!(user = %name, error = %err, "Concurrent registration");
                    return Err(InChatError::UsernameTaken(name));
                }
                return Err(err.into());
            }
        };
        let account = self
            .accounts
            .save(Account::new(user.identity(), password_hash))?;
        let session = self.start_session(&account)?;

        info!(user = %name, account = %account.identity(), "Registered user");
        Ok(Registered {
            user,
            account,
            session,
        })
    }

    pub fn login(&self, username: &str, password: &str) -> InChatResult<Stored<Session>> {
        let Ok(name) = UserName::parse(username) else {
            return Err(InChatError::InvalidCredentials);
        };
        let Some(account) = self.db.account_by_username(&name)? else {
            return Err(InChatError::InvalidCredentials);
        };
        let account = self.accounts.get(&account)?;
        if !self.credentials.verify(password, &account.value().password_hash) {
            return Err(InChatError::InvalidCredentials);
        }

        let session = self.start_session(&account)?;
        info!(user = %name, session = %session.identity(), "Logged in");
        Ok(session)
    }

    fn start_session(&self, account: &Stored<Account>) -> InChatResult<Stored<Session>> {
        let session = Session::starting(account.identity(), Utc::now(), self.options.session_ttl);
        Ok(self.sessions.save(session)?)
    }

    /// Returns a live session. Expired sessions are removed.
    pub fn restore_session(&self, session: &Identity) -> InChatResult<Stored<Session>> {
        let current = self.sessions.get(session)?;
        if current.value().is_expired(Utc::now()) {
            if let Err(err) = self.sessions.delete_from(current) {
                warn!(session = %session, error = %err, "Failed to remove expired session");
            }
            return Err(InChatError::SessionExpired(*session));
        }
        Ok(current)
    }

    pub fn logout(&self, session: &Identity) -> InChatResult<()> {
        let current = self.sessions.get(session)?;
        self.sessions.delete_from(current)?;
        info!(session = %session, "Logged out");
        Ok(())
    }

    pub fn account(&self, account: &Identity) -> InChatResult<Stored<Account>> {
        Ok(self.accounts.get(account)?)
    }

    pub fn user(&self, user: &Identity) -> InChatResult<Stored<User>> {
        Ok(self.users.get(user)?)
    }

    fn account_user(
        &self,
        account: &Identity,
    ) -> InChatResult<(Stored<Account>, Stored<User>)> {
        let account = self.accounts.get(account)?;
        let user = self.users.get(&account.value().user)?;
        Ok((account, user))
    }

    // ==========================================
    // Channels
    // ==========================================

    /// Creates a channel owned by `account` and joins it.
    pub fn create_channel(&self, account: &Identity, name: &str) -> InChatResult<Stored<Channel>> {
        self.accounts.get(account)?;
        let channel = self.log.create(name)?;
        self.db
            .set_channel_role(&channel.identity(), account, ChannelRole::Owner)?;
        info!(channel = %channel.identity(), account = %account, name, "Created channel");
        self.join_channel(account, &channel.identity())
    }

    /// Adds the channel to the account and records a join event.
    ///
    /// Joining a channel the account already belongs to changes nothing.
    pub fn join_channel(
        &self,
        account: &Identity,
        channel: &Identity,
    ) -> InChatResult<Stored<Channel>> {
        let (account_record, user) = self.account_user(account)?;
        let current = self.log.channel(channel)?;
        if account_record.value().is_member(channel) {
            return Ok(current);
        }

        self.db
            .grant_channel_role(channel, account, ChannelRole::Participant)?;
        let alias = current.value().name.clone();
        let added = self.accounts.update_if(account_record, |value| {
            let mut next = value.clone();
            let joined = next.join_channel(alias.clone(), *channel);
            joined.then_some(next)
        })?;
        if added.is_none() {
            // A concurrent join for the same account committed first.
            return Ok(self.log.channel(channel)?);
        }

        let joined = self.log.record_join(channel, &user.value().name)?;
        debug!(channel = %channel, account = %account, "Joined channel");
        Ok(joined.channel)
    }

    pub fn post_message(
        &self,
        account: &Identity,
        channel: &Identity,
        text: &str,
    ) -> InChatResult<Appended> {
        let (_, user) = self.account_user(account)?;
        self.log.post_message(channel, &user.value().name, text)
    }

    /// Blocks until `channel` moves past `version`.
    ///
    /// `None` uses the configured long-poll timeout. `Ok(None)` means the
    /// timeout elapsed with `version` still current.
    pub fn wait_next_channel_version(
        &self,
        channel: &Identity,
        version: &Version,
        timeout: Option<Duration>,
    ) -> InChatResult<Option<Stored<Channel>>> {
        let timeout = timeout.unwrap_or(self.options.long_poll_timeout);
        self.log.wait_next_version(channel, version, Some(timeout))
    }

    pub fn get_event(&self, event: &Identity) -> InChatResult<Stored<Event>> {
        self.log.get_event(event)
    }

    pub fn edit_message(
        &self,
        channel: &Identity,
        event: &Identity,
        text: &str,
    ) -> InChatResult<Stored<Event>> {
        self.log.edit_message(channel, event, text)
    }

    pub fn delete_event(&self, channel: &Identity, event: &Identity) -> InChatResult<()> {
        self.log.delete_event(channel, event)
    }

    pub fn materialize_channel(&self, channel: &Identity) -> InChatResult<ChannelView> {
        self.log.materialize(channel)
    }

    /// The account's memberships with their channels, newest first.
    ///
    /// Channels deleted since they were joined are skipped.
    pub fn account_channels(
        &self,
        account: &Identity,
    ) -> InChatResult<Vec<(Membership, Stored<Channel>)>> {
        let account = self.accounts.get(account)?;
        let mut channels = Vec::with_capacity(account.value().channels.len());
        for membership in &account.value().channels {
            match self.log.channels().get(&membership.channel) {
                Ok(channel) => channels.push((membership.clone(), channel)),
                Err(StorageError::NotFound(_)) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(channels)
    }

    /// Records a role for `account`. The channel owner's role is fixed.
    pub fn set_channel_role(
        &self,
        channel: &Identity,
        account: &Identity,
        role: ChannelRole,
    ) -> InChatResult<()> {
        self.log.channel(channel)?;
        if self.db.channel_role(channel, account)? == Some(ChannelRole::Owner) {
            return Err(InChatError::OwnerRoleLocked(*channel));
        }
        self.db.set_channel_role(channel, account, role)?;
        Ok(())
    }

    pub fn channel_role(
        &self,
        channel: &Identity,
        account: &Identity,
    ) -> InChatResult<Option<ChannelRole>> {
        Ok(self.db.channel_role(channel, account)?)
    }

    /// The account of the user who sent `event`, if it still exists.
    pub fn message_owner(&self, event: &Identity) -> InChatResult<Option<Stored<Account>>> {
        let event = self.log.get_event(event)?;
        let Some(account) = self.db.account_by_username(event.value().sender())? else {
            return Ok(None);
        };
        match self.accounts.get(&account) {
            Ok(account) => Ok(Some(account)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// The live channel whose event list references `event`.
    pub fn channel_for_event(&self, event: &Identity) -> InChatResult<Option<Stored<Channel>>> {
        let candidates = self.db.channels_containing(event)?;
        self.log.channel_for_event(event, candidates)
    }
}
