//! Outbound actions and their wire form.

use {
    crate::{
        error::{Error, Result},
        event::Event,
    },
    serde::{Deserialize, Serialize},
    serde_json::{Value, json},
    std::sync::Arc,
};

/// An outbound command destined for the connector.
///
/// Immutable except for the late-bound `trigger`, which the session layer
/// fills with the event that caused the action before it is enqueued.
#[derive(Debug, Clone)]
pub struct Action {
    pub kind: String,
    pub params: Value,
    /// Present iff an echo is awaited for this action.
    pub resp_id: Option<String>,
    pub trigger: Option<Arc<Event>>,
}

impl Action {
    pub fn new(kind: impl Into<String>, params: Value) -> Self {
        Self {
            kind: kind.into(),
            params,
            resp_id: None,
            trigger: None,
        }
    }

    /// Ask for an echo; the assigned id correlates the response.
    #[must_use]
    pub fn with_echo(mut self) -> Self {
        self.resp_id = Some(botway_common::id::echo_id());
        self
    }

    /// Bind the originating event. The first binding wins.
    pub fn fill_trigger(&mut self, event: Arc<Event>) {
        if self.trigger.is_none() {
            self.trigger = Some(event);
        }
    }

    /// The wire form of this action.
    pub fn flatten(&self) -> OutPacket {
        OutPacket {
            action: self.kind.clone(),
            params: self.params.clone(),
            echo: self.resp_id.clone(),
        }
    }
}

/// Outbound frame: `{action, params, echo?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutPacket {
    pub action: String,
    pub params: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub echo: Option<String>,
}

impl OutPacket {
    pub fn to_wire(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ── Message construction ────────────────────────────────────────────────────

pub fn text_segment(text: &str) -> Value {
    json!({"type": "text", "data": {"text": text}})
}

pub fn reply_segment(message_id: &str) -> Value {
    json!({"type": "reply", "data": {"id": message_id}})
}

/// Build a send-message action. `content` is either a plain string or a
/// segment array.
pub fn message_action(
    content: Value,
    private: bool,
    user_id: Option<i64>,
    group_id: Option<i64>,
) -> Result<Action> {
    let params = if private {
        let user_id = user_id.ok_or(Error::ActionTarget("private", "user_id"))?;
        json!({
            "message_type": "private",
            "user_id": user_id,
            "message": content,
        })
    } else {
        let group_id = group_id.ok_or(Error::ActionTarget("group", "group_id"))?;
        json!({
            "message_type": "group",
            "group_id": group_id,
            "message": content,
        })
    };
    Ok(Action::new("send_msg", params))
}
