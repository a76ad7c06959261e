//! JSON rendering for command output.

use inchat::{ChannelView, Membership, ResolvedEvent};
use serde::Serialize;
use serde_json::{json, Value};
use std::io::{self, Write};
use versioned_store::Stored;

/// `{identity, version, value}` for any stored record.
pub fn record<T: Serialize>(stored: &Stored<T>) -> Value {
    json!({
        "identity": stored.identity().to_string(),
        "version": stored.version().to_string(),
        "value": stored.value(),
    })
}

pub fn channel_view(view: &ChannelView) -> Value {
    let events: Vec<Value> = view
        .events
        .iter()
        .map(|event| match event {
            ResolvedEvent::Live(event) => record(event),
            ResolvedEvent::Deleted(identity) => json!({
                "identity": identity.to_string(),
                "deleted": true,
            }),
        })
        .collect();

    json!({
        "channel": view.channel.identity().to_string(),
        "version": view.channel.version().to_string(),
        "name": view.channel.value().name,
        "events": events,
    })
}

pub fn membership<T: Serialize>(membership: &Membership, channel: &Stored<T>) -> Value {
    json!({
        "alias": membership.alias,
        "channel": record(channel),
    })
}

/// Writes `value` as one line of JSON.
pub fn emit(out: &mut impl Write, value: &Value) -> io::Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use inchat::{Channel, Event, UserName};

    #[test]
    fn deleted_events_render_as_markers() {
        let alice = UserName::parse("alice").unwrap();
        let kept = Stored::new(Event::message(chrono::Utc::now(), alice, "still here"));
        let gone = versioned_store::Identity::new();

        let view = ChannelView {
            channel: Stored::new(Channel::new("general")),
            events: vec![ResolvedEvent::Deleted(gone), ResolvedEvent::Live(kept.clone())],
        };

        let value = channel_view(&view);
        assert_eq!(value["name"], "general");
        assert_eq!(value["events"][0]["identity"], gone.to_string());
        assert_eq!(value["events"][0]["deleted"], true);
        assert_eq!(value["events"][1]["identity"], kept.identity().to_string());
        assert_eq!(value["events"][1]["value"]["kind"], "message");
        assert_eq!(value["events"][1]["value"]["text"], "still here");
    }

    #[test]
    fn emit_writes_one_line() {
        let mut out = Vec::new();
        emit(&mut out, &json!({ "ok": true })).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "{\"ok\":true}\n");
    }
}
