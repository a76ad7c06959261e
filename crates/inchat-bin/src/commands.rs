//! Command dispatch.
//!
//! Each command prints one JSON line per result to `out`. Commands that act
//! on behalf of a user take a session, which must still be live.

use crate::output::{channel_view, emit, membership, record};
use crate::Commands;
use inchat::{CredentialPolicy, InChat, InChatError, InChatResult};
use serde_json::json;
use std::error::Error;
use std::io::Write;
use std::time::Duration;
use tracing::{debug, info};
use versioned_store::Identity;

pub fn run<P: CredentialPolicy>(
    chat: &InChat<P>,
    command: Commands,
    out: &mut impl Write,
) -> Result<(), Box<dyn Error>> {
    match command {
        Commands::Register {
            username,
            password,
            repeat,
        } => {
            let registered = chat.register(&username, &password, &repeat)?;
            emit(
                out,
                &json!({
                    "user": record(&registered.user),
                    "account": record(&registered.account),
                    "session": record(&registered.session),
                }),
            )?;
        }
        Commands::Login { username, password } => {
            let session = chat.login(&username, &password)?;
            emit(out, &record(&session))?;
        }
        Commands::Logout { session } => {
            chat.logout(&session)?;
            emit(out, &json!({ "logged_out": session.to_string() }))?;
        }
        Commands::CreateChannel { session, name } => {
            let account = session_account(chat, &session)?;
            let channel = chat.create_channel(&account, &name)?;
            emit(out, &record(&channel))?;
        }
        Commands::Join { session, channel } => {
            let account = session_account(chat, &session)?;
            let channel = chat.join_channel(&account, &channel)?;
            emit(out, &record(&channel))?;
        }
        Commands::Channels { session } => {
            let account = session_account(chat, &session)?;
            for (joined, channel) in chat.account_channels(&account)? {
                emit(out, &membership(&joined, &channel))?;
            }
        }
        Commands::Post {
            session,
            channel,
            text,
        } => {
            let account = session_account(chat, &session)?;
            let appended = chat.post_message(&account, &channel, &text)?;
            emit(
                out,
                &json!({
                    "channel": record(&appended.channel),
                    "event": record(&appended.event),
                }),
            )?;
        }
        Commands::Show { channel } => {
            let view = chat.materialize_channel(&channel)?;
            emit(out, &channel_view(&view))?;
        }
        Commands::Watch {
            channel,
            since,
            timeout,
            count,
        } => {
            watch(chat, &channel, since, timeout.map(Duration::from_secs), count, out)?;
        }
        Commands::Edit {
            session,
            channel,
            event,
            text,
        } => {
            session_account(chat, &session)?;
            let edited = chat.edit_message(&channel, &event, &text)?;
            emit(out, &record(&edited))?;
        }
        Commands::DeleteEvent {
            session,
            channel,
            event,
        } => {
            session_account(chat, &session)?;
            chat.delete_event(&channel, &event)?;
            emit(out, &json!({ "deleted": event.to_string() }))?;
        }
    }
    Ok(())
}

fn session_account<P: CredentialPolicy>(
    chat: &InChat<P>,
    session: &Identity,
) -> InChatResult<Identity> {
    Ok(chat.restore_session(session)?.value().account)
}

/// Long-polls `channel`, printing its materialized state after each change.
///
/// Returns once `count` changes were printed, or when the channel is deleted.
/// Only commits made through `chat` wake a waiting poll. Commits from another
/// process show up after the current poll times out.
fn watch<P: CredentialPolicy>(
    chat: &InChat<P>,
    channel: &Identity,
    since: Option<versioned_store::Version>,
    timeout: Option<Duration>,
    count: Option<usize>,
    out: &mut impl Write,
) -> Result<(), Box<dyn Error>> {
    let mut known = match since {
        Some(version) => version,
        None => {
            let view = chat.materialize_channel(channel)?;
            emit(out, &channel_view(&view))?;
            view.channel.version()
        }
    };

    let mut printed = 0;
    while count.map_or(true, |limit| printed < limit) {
        let next = match chat.wait_next_channel_version(channel, &known, timeout) {
            Ok(next) => next,
            Err(InChatError::NotFound(_)) => {
                info!(channel = %channel, "Watched channel was deleted");
                emit(out, &json!({ "channel": channel.to_string(), "deleted": true }))?;
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let Some(next) = next else {
            debug!(channel = %channel, version = %known, "Long poll timed out");
            continue;
        };

        let view = match chat.materialize_channel(&next.identity()) {
            Ok(view) => view,
            Err(err) if err.is_not_found() => continue,
            Err(err) => return Err(err.into()),
        };
        known = view.channel.version();
        emit(out, &channel_view(&view))?;
        printed += 1;
    }
    Ok(())
}
