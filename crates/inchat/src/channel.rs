//! The event-sourced channel log.
//!
//! A channel's value is only a list of event references. Content lives in the
//! event store, so:
//!
//! - appending saves the event first, then prepends its reference
//! - editing or deleting an event changes the event's own record, then bumps
//!   the channel's version so long-pollers notice
//! - materializing resolves every reference against the event store

use crate::error::{InChatError, InChatResult};
use crate::types::{Channel, Event, EventKind, UserName};
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, warn};
use versioned_store::{BackingStore, Identity, Storage, StorageError, Stored, Version, VersionedStore};

/// A channel event resolved for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedEvent {
    /// The event's current record.
    Live(Stored<Event>),
    /// The event was deleted after it was appended.
    Deleted(Identity),
}

impl ResolvedEvent {
    pub fn identity(&self) -> Identity {
        match self {
            Self::Live(event) => event.identity(),
            Self::Deleted(identity) => *identity,
        }
    }

    pub fn live(&self) -> Option<&Stored<Event>> {
        match self {
            Self::Live(event) => Some(event),
            Self::Deleted(_) => None,
        }
    }
}

/// A channel with its events resolved, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelView {
    pub channel: Stored<Channel>,
    pub events: Vec<ResolvedEvent>,
}

/// Result of appending an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appended {
    pub channel: Stored<Channel>,
    pub event: Stored<Event>,
}

/// Channels and their events, over any pair of backing stores.
pub struct ChannelLog<CB, EB> {
    channels: VersionedStore<Channel, CB>,
    events: VersionedStore<Event, EB>,
}

impl<CB, EB> ChannelLog<CB, EB>
where
    CB: BackingStore<Channel>,
    EB: BackingStore<Event>,
{
    pub fn new(channels: VersionedStore<Channel, CB>, events: VersionedStore<Event, EB>) -> Self {
        Self { channels, events }
    }

    pub fn channels(&self) -> &VersionedStore<Channel, CB> {
        &self.channels
    }

    pub fn events(&self) -> &VersionedStore<Event, EB> {
        &self.events
    }

    pub fn create(&self, name: impl Into<String>) -> InChatResult<Stored<Channel>> {
        let channel = self.channels.save(Channel::new(name))?;
        debug!(channel = %channel.identity(), name = %channel.value().name, "Created channel");
        Ok(channel)
    }

    pub fn channel(&self, channel: &Identity) -> InChatResult<Stored<Channel>> {
        Ok(self.channels.get(channel)?)
    }

    pub fn get_event(&self, event: &Identity) -> InChatResult<Stored<Event>> {
        Ok(self.events.get(event)?)
    }

    /// Saves `event` and prepends it to `channel`.
    ///
    /// If the reference cannot be added for any reason, the saved event is
    /// deleted again and the channel's error is returned.
    pub fn append(&self, channel: &Identity, event: Event) -> InChatResult<Appended> {
        let event = self.events.save(event)?;

        let updated = self.channels.update_with(channel, |current| {
            let mut next = current.clone();
            next.post_event(&event);
            next
        });

        match updated {
            Ok(channel) => {
                debug!(
                    channel = %channel.identity(),
                    event = %event.identity(),
                    version = %channel.version(),
                    "Appended event"
                );
                Ok(Appended { channel, event })
            }
            Err(err) => {
                let orphan = event.identity();
                if let Err(cleanup) = self.events.delete_from(event) {
                    warn!(event = %orphan, error = %cleanup, "Failed to remove orphaned event");
                }
                Err(err.into())
            }
        }
    }

    pub fn post_message(
        &self,
        channel: &Identity,
        sender: &UserName,
        text: impl Into<String>,
    ) -> InChatResult<Appended> {
        self.append(channel, Event::message(Utc::now(), sender.clone(), text))
    }

    pub fn record_join(&self, channel: &Identity, sender: &UserName) -> InChatResult<Appended> {
        self.append(channel, Event::join(Utc::now(), sender.clone()))
    }

    /// Replaces a message's text, then bumps the channel's version.
    pub fn edit_message(
        &self,
        channel: &Identity,
        event: &Identity,
        text: &str,
    ) -> InChatResult<Stored<Event>> {
        let current = self.events.get(event)?;
        if current.value().kind() != EventKind::Message {
            return Err(InChatError::NotAMessage(*event));
        }

        let edited = self.events.update_from(current, |value| value.with_text(text))?;
        self.channels.touch(channel)?;
        debug!(channel = %channel, event = %event, "Edited message");
        Ok(edited)
    }

    /// Deletes an event, then bumps the channel's version.
    ///
    /// The channel keeps its reference; materializing shows it as deleted.
    pub fn delete_event(&self, channel: &Identity, event: &Identity) -> InChatResult<()> {
        let current = self.events.get(event)?;
        self.events.delete_from(current)?;
        self.channels.touch(channel)?;
        debug!(channel = %channel, event = %event, "Deleted event");
        Ok(())
    }

    /// Fetches the channel and resolves its events in display order.
    pub fn materialize(&self, channel: &Identity) -> InChatResult<ChannelView> {
        let channel = self.channels.get(channel)?;
        let events = channel
            .value()
            .display_order()
            .map(|reference| match self.events.get(&reference.identity) {
                Ok(event) => Ok(ResolvedEvent::Live(event)),
                Err(StorageError::NotFound(identity)) => Ok(ResolvedEvent::Deleted(identity)),
                Err(err) => Err(InChatError::from(err)),
            })
            .collect::<InChatResult<Vec<_>>>()?;
        Ok(ChannelView { channel, events })
    }

    /// Blocks until `channel` moves past `known`. `Ok(None)` on timeout.
    pub fn wait_next_version(
        &self,
        channel: &Identity,
        known: &Version,
        timeout: Option<Duration>,
    ) -> InChatResult<Option<Stored<Channel>>> {
        Ok(self.channels.wait_next_version(channel, known, timeout)?)
    }

    /// The first live channel among `candidates` whose list references `event`.
    pub fn channel_for_event(
        &self,
        event: &Identity,
        candidates: impl IntoIterator<Item = Identity>,
    ) -> InChatResult<Option<Stored<Channel>>> {
        for candidate in candidates {
            match self.channels.get(&candidate) {
                Ok(channel) if channel.value().contains(event) => return Ok(Some(channel)),
                Ok(_) | Err(StorageError::NotFound(_)) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(None)
    }

    /// Deletes a channel. Its events are left in place.
    pub fn delete_channel(&self, channel: &Identity) -> InChatResult<()> {
        let current = self.channels.get(channel)?;
        self.channels.delete_from(current)?;
        debug!(channel = %channel, "Deleted channel");
        Ok(())
    }

    /// Releases every waiter on either store and refuses new ones.
    pub fn shutdown(&self) {
        self.channels.hub().shutdown();
        self.events.hub().shutdown();
    }
}
