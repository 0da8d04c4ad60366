//! Inbound frame parsing and the five event variants.

use {
    crate::error::{Error, Result},
    serde_json::Value,
    std::{collections::HashMap, fmt, sync::Mutex},
};

/// Identity of a parser, used to key per-event cached parse results.
pub type ParserId = u64;

/// Parsed argument values for one command name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArgs {
    pub vals: Vec<String>,
}

/// One parser hit: command name → its parsed arguments.
pub type ArgGroup = HashMap<String, ParsedArgs>;

// ── Event kinds ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Message,
    Notice,
    Request,
    Meta,
    Echo,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Message => "message",
            Self::Notice => "notice",
            Self::Request => "request",
            Self::Meta => "meta",
            Self::Echo => "echo",
        };
        f.write_str(s)
    }
}

// ── Event ───────────────────────────────────────────────────────────────────

/// An inbound frame, parsed. Immutable once built; the only mutation allowed
/// is the lazy parser-args cache on [`MessageEvent`].
#[derive(Debug)]
pub enum Event {
    Message(MessageEvent),
    Notice(NoticeEvent),
    Request(RequestEvent),
    Meta(MetaEvent),
    Echo(EchoEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Message(_) => EventKind::Message,
            Self::Notice(_) => EventKind::Notice,
            Self::Request(_) => EventKind::Request,
            Self::Meta(_) => EventKind::Meta,
            Self::Echo(_) => EventKind::Echo,
        }
    }

    /// The original payload, byte-for-byte equivalent to the wire frame.
    pub fn raw(&self) -> &Value {
        match self {
            Self::Message(e) => &e.raw,
            Self::Notice(e) => &e.raw,
            Self::Request(e) => &e.raw,
            Self::Meta(e) => &e.raw,
            Self::Echo(e) => &e.raw,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Message(e) => &e.id,
            Self::Notice(e) => &e.id,
            Self::Request(e) => &e.id,
            Self::Meta(e) => &e.id,
            Self::Echo(e) => &e.echo_id,
        }
    }

    pub fn time(&self) -> u64 {
        match self {
            Self::Message(e) => e.time,
            Self::Notice(e) => e.time,
            Self::Request(e) => e.time,
            Self::Meta(e) => e.time,
            Self::Echo(_) => 0,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Message(e) => Some(&e.text),
            _ => None,
        }
    }

    pub fn sender_id(&self) -> Option<i64> {
        match self {
            Self::Message(e) => Some(e.user_id),
            Self::Notice(e) => e.user_id,
            Self::Request(e) => e.user_id,
            _ => None,
        }
    }

    pub fn group_id(&self) -> Option<i64> {
        match self {
            Self::Message(e) => e.group_id,
            Self::Notice(e) => e.group_id,
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&MessageEvent> {
        match self {
            Self::Message(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_echo(&self) -> Option<&EchoEvent> {
        match self {
            Self::Echo(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_echo(&self) -> bool {
        matches!(self, Self::Echo(_))
    }

    /// Serialize back to the wire form.
    pub fn to_wire(&self) -> String {
        self.raw().to_string()
    }
}

// ── Variants ────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct MessageEvent {
    pub raw: Value,
    pub time: u64,
    pub id: String,
    pub self_id: Option<i64>,
    /// `private` or `group`.
    pub message_type: String,
    pub sub_type: Option<String>,
    pub user_id: i64,
    pub group_id: Option<i64>,
    /// All text segments of the message, joined.
    pub text: String,
    /// Lazy parse cache: parser id → its result (`None` = parsed, no hit).
    args: Mutex<HashMap<ParserId, Option<ArgGroup>>>,
}

impl MessageEvent {
    pub fn is_private(&self) -> bool {
        self.message_type == "private"
    }

    pub fn is_group(&self) -> bool {
        self.message_type == "group"
    }

    /// The cached parse result for `parser`, if that parser already ran.
    pub fn cached_args(&self, parser: ParserId) -> Option<Option<ArgGroup>> {
        self.args
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&parser)
            .cloned()
    }

    /// Record a parse result. First write wins; distinct parsers never collide.
    pub fn store_args(&self, parser: ParserId, group: Option<ArgGroup>) {
        self.args
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(parser)
            .or_insert(group);
    }
}

#[derive(Debug)]
pub struct NoticeEvent {
    pub raw: Value,
    pub time: u64,
    pub id: String,
    pub self_id: Option<i64>,
    pub notice_type: String,
    pub user_id: Option<i64>,
    pub group_id: Option<i64>,
}

#[derive(Debug)]
pub struct RequestEvent {
    pub raw: Value,
    pub time: u64,
    pub id: String,
    pub self_id: Option<i64>,
    pub request_type: String,
    pub user_id: Option<i64>,
    /// Opaque token quoted back when answering the request.
    pub flag: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug)]
pub struct MetaEvent {
    pub raw: Value,
    pub time: u64,
    pub id: String,
    pub meta_type: String,
}

/// Acknowledgement of a previously sent action, correlated by `echo_id`.
#[derive(Debug, Clone)]
pub struct EchoEvent {
    pub raw: Value,
    pub echo_id: String,
    pub status: String,
    pub retcode: i64,
    pub data: Value,
}

impl EchoEvent {
    pub fn is_ok(&self) -> bool {
        self.retcode == 0
    }
}

// ── Builder ─────────────────────────────────────────────────────────────────

/// Parses raw connector frames into [`Event`]s.
///
/// Frames carrying an `echo` field and a status code are echoes regardless of
/// any type tag; everything else switches on `post_type`.
pub struct EventBuilder;

impl EventBuilder {
    pub fn build(frame: &str) -> Result<Event> {
        let value: Value = serde_json::from_str(frame)?;
        Self::build_value(value)
    }

    pub fn build_value(value: Value) -> Result<Event> {
        if value.get("echo").is_some()
            && (value.get("status").is_some() || value.get("retcode").is_some())
        {
            return Self::build_echo(value);
        }

        let tag = value
            .get("post_type")
            .and_then(Value::as_str)
            .ok_or(Error::MissingField("post_type"))?
            .to_owned();

        match tag.as_str() {
            "message" | "message_sent" => Self::build_message(value),
            "notice" => Ok(Event::Notice(Self::build_notice(value))),
            "request" => Ok(Event::Request(Self::build_request(value))),
            "meta_event" => Ok(Event::Meta(Self::build_meta(value))),
            _ => Err(Error::UnknownKind { tag }),
        }
    }

    fn build_message(value: Value) -> Result<Event> {
        let id = value
            .get("message_id")
            .map(json_id)
            .ok_or(Error::MissingField("message_id"))?;
        let user_id = value
            .get("user_id")
            .and_then(Value::as_i64)
            .ok_or(Error::MissingField("user_id"))?;

        Ok(Event::Message(MessageEvent {
            time: field_u64(&value, "time"),
            id,
            self_id: value.get("self_id").and_then(Value::as_i64),
            message_type: field_str(&value, "message_type").unwrap_or_else(|| "private".into()),
            sub_type: field_str(&value, "sub_type"),
            user_id,
            group_id: value.get("group_id").and_then(Value::as_i64),
            text: extract_text(&value),
            args: Mutex::new(HashMap::new()),
            raw: value,
        }))
    }

    fn build_notice(value: Value) -> NoticeEvent {
        NoticeEvent {
            time: field_u64(&value, "time"),
            id: synth_id(),
            self_id: value.get("self_id").and_then(Value::as_i64),
            notice_type: field_str(&value, "notice_type").unwrap_or_default(),
            user_id: value.get("user_id").and_then(Value::as_i64),
            group_id: value.get("group_id").and_then(Value::as_i64),
            raw: value,
        }
    }

    fn build_request(value: Value) -> RequestEvent {
        RequestEvent {
            time: field_u64(&value, "time"),
            id: synth_id(),
            self_id: value.get("self_id").and_then(Value::as_i64),
            request_type: field_str(&value, "request_type").unwrap_or_default(),
            user_id: value.get("user_id").and_then(Value::as_i64),
            flag: field_str(&value, "flag"),
            comment: field_str(&value, "comment"),
            raw: value,
        }
    }

    fn build_meta(value: Value) -> MetaEvent {
        MetaEvent {
            time: field_u64(&value, "time"),
            id: synth_id(),
            meta_type: field_str(&value, "meta_event_type").unwrap_or_default(),
            raw: value,
        }
    }

    fn build_echo(value: Value) -> Result<Event> {
        let echo_id = value
            .get("echo")
            .map(json_id)
            .ok_or(Error::MissingField("echo"))?;
        Ok(Event::Echo(EchoEvent {
            echo_id,
            status: field_str(&value, "status").unwrap_or_default(),
            retcode: value.get("retcode").and_then(Value::as_i64).unwrap_or(0),
            data: value.get("data").cloned().unwrap_or(Value::Null),
            raw: value,
        }))
    }
}

/// Wire ids may be numbers or strings; normalize to a string.
fn json_id(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn field_str(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn field_u64(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn synth_id() -> String {
    format!("e{}", botway_common::id::next_u64())
}

/// Join all text segments. Accepts both a plain string message and the
/// segment-array form `[{"type":"text","data":{"text":..}}, ..]`.
fn extract_text(value: &Value) -> String {
    if let Some(s) = value.get("raw_message").and_then(Value::as_str) {
        return s.to_owned();
    }
    match value.get("message") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(segments)) => segments
            .iter()
            .filter(|seg| seg.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|seg| seg.pointer("/data/text").and_then(Value::as_str))
            .collect(),
        _ => String::new(),
    }
}
