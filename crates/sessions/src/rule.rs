//! Conversation grouping rules.

use botway_protocol::Event;

/// Decides whether two events belong to the same conversation.
pub trait SessionRule: Send + Sync {
    fn compare(&self, a: &Event, b: &Event) -> bool;
}

/// Groups events by an extracted key; events without a key never match.
pub struct KeyRule {
    extract: Box<dyn Fn(&Event) -> Option<String> + Send + Sync>,
}

impl KeyRule {
    pub fn new(extract: impl Fn(&Event) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            extract: Box::new(extract),
        }
    }
}

impl SessionRule for KeyRule {
    fn compare(&self, a: &Event, b: &Event) -> bool {
        match ((self.extract)(a), (self.extract)(b)) {
            (Some(ka), Some(kb)) => ka == kb,
            _ => false,
        }
    }
}

/// Same sender id.
pub struct SenderRule;

impl SessionRule for SenderRule {
    fn compare(&self, a: &Event, b: &Event) -> bool {
        matches!((a.sender_id(), b.sender_id()), (Some(x), Some(y)) if x == y)
    }
}

/// Same group id.
pub struct GroupRule;

impl SessionRule for GroupRule {
    fn compare(&self, a: &Event, b: &Event) -> bool {
        matches!((a.group_id(), b.group_id()), (Some(x), Some(y)) if x == y)
    }
}
