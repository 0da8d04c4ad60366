//! Per-conversation session state and its manager.
//!
//! A session is the state shared across all events that one handler's
//! [`SessionRule`] groups into the same conversation: the event stream, a
//! string-keyed store, and the signals that track whether the session is
//! free, working, or suspended. The [`SessionManager`] owns the live and
//! suspended session sets per handler space and implements attach, get,
//! suspend (`hup`), wake, and expiry with the deadlock-flag escape that lets
//! an attach proceed while a `get` is parked on a suspended session.
//!
//! [`context`] installs the current session into a task-local slot so the
//! action helpers (`send`, `send_reply`, `pause`, …) can find their trigger
//! without the user threading it through.

pub mod context;
pub mod error;
pub mod manager;
pub mod rule;
pub mod session;

use botway_protocol::{Action, EchoEvent};

pub use {
    error::{Error, Result},
    manager::{SessionManager, SessionPolicy},
    rule::{GroupRule, KeyRule, SenderRule, SessionRule},
    session::{Session, SpaceKey},
};

/// Receives the echo correlated to an action sent with `take_action_wait`.
pub type EchoReceiver = tokio::sync::oneshot::Receiver<EchoEvent>;

/// Where sessions hand their outbound actions. Implemented by the responder;
/// sessions depend only on this seam.
#[async_trait::async_trait]
pub trait ActionOutput: Send + Sync {
    /// Enqueue an action, fire-and-forget.
    async fn take_action(&self, action: Action) -> anyhow::Result<()>;

    /// Enqueue an action that awaits an echo. The returned receiver resolves
    /// when the matching echo arrives.
    async fn take_action_wait(&self, action: Action) -> anyhow::Result<EchoReceiver>;
}
