//! Domain types for InChat.
//!
//! Every aggregate here is stored through the versioned contract; references
//! between aggregates are identities, never embedded records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use versioned_store::{Identity, Stored, Version};

/// Longest accepted user name, in characters.
pub const MAX_USERNAME_CHARS: usize = 64;

/// Error returned when a user name fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid user name {name:?}: {reason}")]
pub struct InvalidUserName {
    name: String,
    reason: &'static str,
}

/// A validated user name.
///
/// Non-empty, at most [`MAX_USERNAME_CHARS`] characters, and free of
/// whitespace and control characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserName(String);

impl UserName {
    pub fn parse(name: impl Into<String>) -> Result<Self, InvalidUserName> {
        let name = name.into();
        let reason = if name.is_empty() {
            Some("must not be empty")
        } else if name.chars().count() > MAX_USERNAME_CHARS {
            Some("too long")
        } else if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
            Some("must not contain whitespace or control characters")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(InvalidUserName { name, reason }),
            None => Ok(Self(name)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserName {
    type Error = InvalidUserName;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<UserName> for String {
    fn from(name: UserName) -> Self {
        name.0
    }
}

impl FromStr for UserName {
    type Err = InvalidUserName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: UserName,
    pub joined: DateTime<Utc>,
}

impl User {
    pub fn new(name: UserName, joined: DateTime<Utc>) -> Self {
        Self { name, joined }
    }
}

/// A channel the account belongs to, under a local alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub alias: String,
    pub channel: Identity,
}

/// Credentials and channel memberships of a user.
///
/// The account exclusively owns its membership list; channels are shared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user: Identity,
    pub channels: Vec<Membership>,
    /// Never serialized; reads back empty.
    #[serde(skip)]
    pub password_hash: String,
}

impl Account {
    pub fn new(user: Identity, password_hash: impl Into<String>) -> Self {
        Self {
            user,
            channels: Vec::new(),
            password_hash: password_hash.into(),
        }
    }

    /// Adds a membership at the front of the list.
    ///
    /// Returns `false` and leaves the list untouched if the channel is
    /// already present.
    pub fn join_channel(&mut self, alias: impl Into<String>, channel: Identity) -> bool {
        if self.is_member(&channel) {
            return false;
        }
        self.channels.insert(
            0,
            Membership {
                alias: alias.into(),
                channel,
            },
        );
        true
    }

    pub fn is_member(&self, channel: &Identity) -> bool {
        self.channels.iter().any(|m| m.channel == *channel)
    }
}

/// A login session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub account: Identity,
    pub expiry: DateTime<Utc>,
}

impl Session {
    /// Starts a session at `now` lasting `ttl`.
    pub fn starting(account: Identity, now: DateTime<Utc>, ttl: chrono::Duration) -> Self {
        Self {
            account,
            expiry: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }
}

/// Persisted discriminant of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Message,
    Join,
}

impl EventKind {
    /// Code stored in the `events.kind` column.
    pub fn code(self) -> i64 {
        match self {
            Self::Message => 0,
            Self::Join => 1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Message),
            1 => Some(Self::Join),
            _ => None,
        }
    }
}

/// An immutable channel event.
///
/// Editing a message stores a new version of the event; the value itself is
/// never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Event {
    Message {
        time: DateTime<Utc>,
        sender: UserName,
        text: String,
    },
    Join {
        time: DateTime<Utc>,
        sender: UserName,
    },
}

impl Event {
    pub fn message(time: DateTime<Utc>, sender: UserName, text: impl Into<String>) -> Self {
        Self::Message {
            time,
            sender,
            text: text.into(),
        }
    }

    pub fn join(time: DateTime<Utc>, sender: UserName) -> Self {
        Self::Join { time, sender }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Message { .. } => EventKind::Message,
            Self::Join { .. } => EventKind::Join,
        }
    }

    pub fn time(&self) -> DateTime<Utc> {
        match self {
            Self::Message { time, .. } | Self::Join { time, .. } => *time,
        }
    }

    pub fn sender(&self) -> &UserName {
        match self {
            Self::Message { sender, .. } | Self::Join { sender, .. } => sender,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Message { text, .. } => Some(text),
            Self::Join { .. } => None,
        }
    }

    /// The same event with its text replaced. Join events carry no text and
    /// are returned unchanged.
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        match self {
            Self::Message { time, sender, .. } => Self::Message {
                time: *time,
                sender: sender.clone(),
                text: text.into(),
            },
            Self::Join { .. } => self.clone(),
        }
    }
}

/// An event reference captured when it was appended to a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    pub identity: Identity,
    pub version: Version,
}

impl<T> From<&Stored<T>> for EventRef {
    fn from(record: &Stored<T>) -> Self {
        Self {
            identity: record.identity(),
            version: record.version(),
        }
    }
}

/// A named, event-sourced channel.
///
/// `events` is stored newest first. Display order is the reverse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub events: Vec<EventRef>,
}

impl Channel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            events: Vec::new(),
        }
    }

    /// Prepends a reference to `event`.
    ///
    /// No two entries share an identity: posting an event already present
    /// returns `false` and changes nothing.
    pub fn post_event(&mut self, event: &Stored<Event>) -> bool {
        if self.contains(&event.identity()) {
            return false;
        }
        self.events.insert(0, EventRef::from(event));
        true
    }

    pub fn contains(&self, event: &Identity) -> bool {
        self.events.iter().any(|r| r.identity == *event)
    }

    /// Event references oldest first.
    pub fn display_order(&self) -> impl DoubleEndedIterator<Item = &EventRef> + '_ {
        self.events.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// A member's role in a channel.
///
/// Roles are recorded for callers to act on; the engine does not enforce them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelRole {
    Owner,
    Moderator,
    Participant,
    Observer,
    Banned,
}

impl ChannelRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Moderator => "moderator",
            Self::Participant => "participant",
            Self::Observer => "observer",
            Self::Banned => "banned",
        }
    }
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown role name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown channel role {0:?}")]
pub struct UnknownRole(pub String);

impl FromStr for ChannelRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "owner" => Ok(Self::Owner),
            "moderator" => Ok(Self::Moderator),
            "participant" => Ok(Self::Participant),
            "observer" => Ok(Self::Observer),
            "banned" => Ok(Self::Banned),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}
