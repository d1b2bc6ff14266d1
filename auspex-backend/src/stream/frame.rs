use std::collections::{HashSet, VecDeque};
use std::hash::{DefaultHasher, Hash, Hasher};

use auspex_state::{Event, EventKind};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// One decoded frame from the event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Echo of the active subscription after a subscribe command.
    SubscriptionAck(Value),
    /// The greeting the service sends with usage hints.
    Help,
    ConnectionStateChanged { connected: bool },
    ServiceStateChanged { detail: String, online: bool },
    Heartbeat,
    Event { event: Event, fingerprint: u64 },
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("frame has no type")]
    MissingType,

    #[error("unknown frame type {0:?}")]
    UnknownType(String),

    #[error("service message has no payload")]
    MissingPayload,

    #[error("undecodable event payload: {0}")]
    Payload(#[source] serde_json::Error),
}

pub fn decode_frame(text: &str) -> Result<Frame, FrameError> {
    let root: Value = serde_json::from_str(text)?;
    let object = root.as_object().ok_or(FrameError::NotAnObject)?;

    if let Some(subscription) = object.get("subscription") {
        return Ok(Frame::SubscriptionAck(subscription.clone()));
    }
    if object.contains_key("send this for help") {
        return Ok(Frame::Help);
    }

    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingType)?;

    match kind {
        "connectionStateChanged" => Ok(Frame::ConnectionStateChanged {
            connected: truthy(object.get("connected")),
        }),
        "serviceStateChanged" => Ok(Frame::ServiceStateChanged {
            detail: object
                .get("detail")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            online: truthy(object.get("online")),
        }),
        "heartbeat" => Ok(Frame::Heartbeat),
        "serviceMessage" => {
            let payload = object.get("payload").ok_or(FrameError::MissingPayload)?;
            let fingerprint = fingerprint(payload);
            let event = serde_json::from_value::<Event>(payload.clone()).map_err(FrameError::Payload)?;
            Ok(Frame::Event { event, fingerprint })
        }
        other => Err(FrameError::UnknownType(other.to_string())),
    }
}

/// The service sends booleans as the strings "true" and "false".
fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Hash of the payload as serialized with sorted keys.
fn fingerprint(payload: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    payload.to_string().hash(&mut hasher);
    hasher.finish()
}

/// The command that subscribes a session to every world and character.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeCommand {
    service: &'static str,
    action: &'static str,
    worlds: [&'static str; 1],
    characters: [&'static str; 1],
    event_names: Vec<&'static str>,
}

impl SubscribeCommand {
    pub fn new(kinds: &[EventKind]) -> Self {
        Self {
            service: "event",
            action: "subscribe",
            worlds: ["all"],
            characters: ["all"],
            event_names: kinds.iter().map(|kind| kind.as_str()).collect(),
        }
    }

    pub fn all() -> Self {
        Self::new(&EventKind::ALL)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Bounded window of recently seen payload fingerprints.
///
/// The service fans the same event out from several endpoints, so repeats are
/// expected within a session.
#[derive(Debug)]
pub struct RecentEvents {
    seen: HashSet<u64>,
    order: VecDeque<u64>,
    capacity: usize,
}

impl RecentEvents {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Remember `fingerprint`. Returns false if it was already in the window.
    pub fn insert(&mut self, fingerprint: u64) -> bool {
        if !self.seen.insert(fingerprint) {
            return false;
        }
        self.order.push_back(fingerprint);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
