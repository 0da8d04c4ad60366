//! Matching building blocks the dispatcher consumes: text matchers, event
//! checkers, and command parsers, with logic composition.

use {
    botway_protocol::{ArgGroup, Event, ParsedArgs, ParserId},
    std::{collections::HashSet, sync::Arc},
};

// ── Traits ──────────────────────────────────────────────────────────────────

/// Pure predicate over a message's text.
pub trait Matcher: Send + Sync {
    fn matches(&self, text: &str) -> bool;
}

/// Pure predicate over a whole event (permission-style checks).
pub trait Checker: Send + Sync {
    fn check(&self, event: &Event) -> bool;
}

/// Extracts command arguments from a message's text. A parser's result is
/// cached on the event under its id, so distinct handlers sharing one parser
/// parse each event once.
pub trait Parser: Send + Sync {
    fn id(&self) -> ParserId;

    /// Parse the text; `None` means no command hit.
    fn parse(&self, text: &str) -> Option<ArgGroup>;

    /// Whether this handler accepts the parsed group.
    fn test(&self, group: &ArgGroup) -> bool;
}

// ── Logic composition ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicMode {
    And,
    Or,
    Not,
    Xor,
}

impl LogicMode {
    fn calc(self, a: bool, b: bool) -> bool {
        match self {
            Self::And => a && b,
            Self::Or => a || b,
            Self::Not => !a,
            Self::Xor => a ^ b,
        }
    }
}

/// Two matchers joined by a logic mode. `Not` ignores the second side.
pub struct WrappedMatcher {
    mode: LogicMode,
    first: Arc<dyn Matcher>,
    second: Option<Arc<dyn Matcher>>,
}

impl WrappedMatcher {
    pub fn and(first: Arc<dyn Matcher>, second: Arc<dyn Matcher>) -> Self {
        Self {
            mode: LogicMode::And,
            first,
            second: Some(second),
        }
    }

    pub fn or(first: Arc<dyn Matcher>, second: Arc<dyn Matcher>) -> Self {
        Self {
            mode: LogicMode::Or,
            first,
            second: Some(second),
        }
    }

    pub fn not(inner: Arc<dyn Matcher>) -> Self {
        Self {
            mode: LogicMode::Not,
            first: inner,
            second: None,
        }
    }

    pub fn xor(first: Arc<dyn Matcher>, second: Arc<dyn Matcher>) -> Self {
        Self {
            mode: LogicMode::Xor,
            first,
            second: Some(second),
        }
    }
}

impl Matcher for WrappedMatcher {
    fn matches(&self, text: &str) -> bool {
        let a = self.first.matches(text);
        let b = self
            .second
            .as_ref()
            .map(|m| m.matches(text))
            .unwrap_or(false);
        self.mode.calc(a, b)
    }
}

/// Two checkers joined by a logic mode. `Not` ignores the second side.
pub struct WrappedChecker {
    mode: LogicMode,
    first: Arc<dyn Checker>,
    second: Option<Arc<dyn Checker>>,
}

impl WrappedChecker {
    pub fn and(first: Arc<dyn Checker>, second: Arc<dyn Checker>) -> Self {
        Self {
            mode: LogicMode::And,
            first,
            second: Some(second),
        }
    }

    pub fn or(first: Arc<dyn Checker>, second: Arc<dyn Checker>) -> Self {
        Self {
            mode: LogicMode::Or,
            first,
            second: Some(second),
        }
    }

    pub fn not(inner: Arc<dyn Checker>) -> Self {
        Self {
            mode: LogicMode::Not,
            first: inner,
            second: None,
        }
    }
}

impl Checker for WrappedChecker {
    fn check(&self, event: &Event) -> bool {
        let a = self.first.check(event);
        let b = self
            .second
            .as_ref()
            .map(|c| c.check(event))
            .unwrap_or(false);
        self.mode.calc(a, b)
    }
}

// ── Stock matchers ──────────────────────────────────────────────────────────

pub struct FullMatcher(pub String);

impl Matcher for FullMatcher {
    fn matches(&self, text: &str) -> bool {
        text == self.0
    }
}

pub struct StartMatcher(pub String);

impl Matcher for StartMatcher {
    fn matches(&self, text: &str) -> bool {
        text.starts_with(&self.0)
    }
}

pub struct EndMatcher(pub String);

impl Matcher for EndMatcher {
    fn matches(&self, text: &str) -> bool {
        text.ends_with(&self.0)
    }
}

pub struct ContainMatcher(pub String);

impl Matcher for ContainMatcher {
    fn matches(&self, text: &str) -> bool {
        text.contains(&self.0)
    }
}

pub struct RegexMatcher(pub regex::Regex);

impl RegexMatcher {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self(regex::Regex::new(pattern)?))
    }
}

impl Matcher for RegexMatcher {
    fn matches(&self, text: &str) -> bool {
        self.0.is_match(text)
    }
}

// ── Stock checkers ──────────────────────────────────────────────────────────

/// Sender allow/block lists. An empty allow list admits everyone not blocked.
#[derive(Default)]
pub struct SenderChecker {
    pub allow: Option<HashSet<i64>>,
    pub block: HashSet<i64>,
}

impl Checker for SenderChecker {
    fn check(&self, event: &Event) -> bool {
        let Some(sender) = event.sender_id() else {
            return false;
        };
        if self.block.contains(&sender) {
            return false;
        }
        match &self.allow {
            Some(allow) => allow.contains(&sender),
            None => true,
        }
    }
}

// ── Command parser ──────────────────────────────────────────────────────────

/// Splits `<start><name><sep><arg><sep><arg>…` into a command name and its
/// argument values.
pub struct CmdParser {
    id: ParserId,
    start: String,
    sep: String,
    /// Command names this handler accepts; `None` accepts any parsed command.
    targets: Option<Vec<String>>,
}

impl CmdParser {
    pub fn new(start: impl Into<String>, sep: impl Into<String>) -> Self {
        Self {
            id: botway_common::id::next_u64(),
            start: start.into(),
            sep: sep.into(),
            targets: None,
        }
    }

    #[must_use]
    pub fn targeting(mut self, targets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.targets = Some(targets.into_iter().map(Into::into).collect());
        self
    }
}

impl Parser for CmdParser {
    fn id(&self) -> ParserId {
        self.id
    }

    fn parse(&self, text: &str) -> Option<ArgGroup> {
        let rest = text.trim().strip_prefix(&self.start)?;
        let mut parts = rest.split(self.sep.as_str()).filter(|p| !p.is_empty());
        let name = parts.next()?.to_owned();
        let vals: Vec<String> = parts.map(str::to_owned).collect();
        let mut group = ArgGroup::new();
        group.insert(name, ParsedArgs { vals });
        Some(group)
    }

    fn test(&self, group: &ArgGroup) -> bool {
        match &self.targets {
            None => !group.is_empty(),
            Some(targets) => targets.iter().any(|t| group.contains_key(t)),
        }
    }
}
