//! Core types for the event recorder: the append-only `Event` record and the
//! conjunctive filter used by `List`/`Watch`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single entry in the append-only event log (spec.md §3, "Event").
///
/// `seq` is unique and strictly increasing within one recorder, starting at
/// 1, with no gaps. `ts` is filled in by the recorder if the caller leaves
/// it at the Unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Monotone, gap-free sequence number assigned by the recorder.
    pub seq: u64,
    /// Wall-clock time the event was recorded.
    pub ts: DateTime<Utc>,
    /// Dotted tag, e.g. `bead.created`, `agent.started`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Who performed the action.
    pub actor: String,
    /// What the action was about, typically a bead id.
    pub subject: String,
    /// Free-text description.
    pub message: String,
    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Event {
    /// Build an event with `seq` and `ts` left at their zero values, to be
    /// filled in by the recorder at record time.
    pub fn new(
        event_type: impl Into<String>,
        actor: impl Into<String>,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            seq: 0,
            ts: DateTime::<Utc>::from_timestamp(0, 0).unwrap_or_default(),
            event_type: event_type.into(),
            actor: actor.into(),
            subject: subject.into(),
            message: message.into(),
            payload: None,
        }
    }

    /// Attach a structured payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    fn has_ts(&self) -> bool {
        self.ts.timestamp() != 0 || self.ts.timestamp_subsec_nanos() != 0
    }
}

/// Conjunctive filter for `Recorder::list` (spec.md §4.2, "Filter semantics").
///
/// All non-`None`/non-empty fields must match for an event to be included.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_type: Option<String>,
    pub actor: Option<String>,
    pub after_seq: Option<u64>,
    pub since: Option<DateTime<Utc>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_after_seq(mut self, after_seq: u64) -> Self {
        self.after_seq = Some(after_seq);
        self
    }

    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Whether `event` satisfies every set predicate.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref t) = self.event_type {
            if &event.event_type != t {
                return false;
            }
        }
        if let Some(ref a) = self.actor {
            if &event.actor != a {
                return false;
            }
        }
        if let Some(after) = self.after_seq {
            if event.seq <= after {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.ts < since {
                return false;
            }
        }
        true
    }
}

/// Stamps `seq` and, if the caller left `ts` unset, `ts` onto an event
/// before it is appended to the log. Shared by every recorder backend so
/// seq allocation and the zero-`ts` fill-in rule stay in one place.
pub(crate) fn stamp(mut event: Event, seq: u64, now: DateTime<Utc>) -> Event {
    event.seq = seq;
    if !event.has_ts() {
        event.ts = now;
    }
    event
}
