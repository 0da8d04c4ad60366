//! Task-local current session and the action helpers that use it.
//!
//! The handler loop installs the session here before calling user code; the
//! helpers below find their trigger event through the slot instead of the
//! user threading it. The slot is task-local, not thread-local: many
//! callbacks run concurrently on the same OS thread.

use {
    crate::{
        error::Error,
        manager::SessionManager,
        session::Session,
    },
    botway_protocol::{
        Action, ArgGroup, EchoEvent, Event, ParserId, message_action, reply_segment, text_segment,
    },
    serde_json::{Value, json},
    std::{sync::Arc, time::Duration},
};

tokio::task_local! {
    static CURRENT: CurrentSession;
}

/// Everything a running callback needs from its surroundings.
#[derive(Clone)]
pub struct CurrentSession {
    pub session: Arc<Session>,
    pub manager: Arc<SessionManager>,
    /// The handler's parser id, for reading cached parse results.
    pub parser: Option<ParserId>,
}

/// Run `fut` with `current` installed as the task's session.
pub async fn scope<F: Future>(current: CurrentSession, fut: F) -> F::Output {
    CURRENT.scope(current, fut).await
}

/// The current session context, if any.
pub fn try_current() -> crate::Result<CurrentSession> {
    CURRENT.try_with(|c| c.clone()).map_err(|_| Error::NoContext)
}

/// The current session's newest event.
pub fn event() -> anyhow::Result<Arc<Event>> {
    Ok(try_current()?.session.event()?)
}

/// The current event's text, if it is a message.
pub fn msg_text() -> Option<String> {
    event().ok()?.text().map(str::to_owned)
}

/// The cached parse result of this handler's parser for the current event.
pub fn args() -> anyhow::Result<Option<ArgGroup>> {
    let current = try_current()?;
    let Some(parser) = current.parser else {
        return Ok(None);
    };
    let event = current.session.event()?;
    let Some(msg) = event.as_message() else {
        return Ok(None);
    };
    Ok(msg.cached_args(parser).flatten())
}

// ── Session store ───────────────────────────────────────────────────────────

pub fn store_get(key: &str) -> anyhow::Result<Option<Value>> {
    Ok(try_current()?.session.store_get(key))
}

pub fn store_put(key: impl Into<String>, val: Value) -> anyhow::Result<()> {
    try_current()?.session.store_put(key, val);
    Ok(())
}

pub fn store_remove(key: &str) -> anyhow::Result<Option<Value>> {
    Ok(try_current()?.session.store_remove(key))
}

// ── Actions ─────────────────────────────────────────────────────────────────

/// Launch a prepared action from the current session. Fills the trigger,
/// and waits for the echo iff the action carries a `resp_id`.
pub async fn custom_action(mut action: Action) -> anyhow::Result<Option<EchoEvent>> {
    let current = try_current()?;
    if current.session.is_expired() {
        return Err(Error::Expired.into());
    }
    if let Ok(trigger) = current.session.event() {
        action.fill_trigger(trigger);
    }

    let responder = current.session.responder();
    if action.resp_id.is_some() {
        let rx = responder.take_action_wait(action).await?;
        let echo = rx
            .await
            .map_err(|_| Error::message("echo awaiter dropped before the echo arrived"))?;
        Ok(Some(echo))
    } else {
        responder.take_action(action).await?;
        Ok(None)
    }
}

fn outgoing_message(content: Value) -> anyhow::Result<Action> {
    let event = event()?;
    let (private, user_id, group_id) = match event.as_message() {
        Some(msg) => (msg.is_private(), Some(msg.user_id), msg.group_id),
        None => (
            event.group_id().is_none(),
            event.sender_id(),
            event.group_id(),
        ),
    };
    Ok(message_action(content, private, user_id, group_id)?)
}

/// Send a message back to where the current event came from.
pub async fn send(text: &str) -> anyhow::Result<()> {
    let action = outgoing_message(json!(text))?;
    custom_action(action).await?;
    Ok(())
}

/// Like [`send`], but wait for the connector's echo.
pub async fn send_wait(text: &str) -> anyhow::Result<EchoEvent> {
    let action = outgoing_message(json!(text))?.with_echo();
    custom_action(action)
        .await?
        .ok_or_else(|| Error::message("echoing action yielded no echo").into())
}

/// Send a message quoting the triggering message.
pub async fn send_reply(text: &str) -> anyhow::Result<()> {
    let event = event()?;
    let content = json!([reply_segment(event.id()), text_segment(text)]);
    let action = outgoing_message(content)?;
    custom_action(action).await?;
    Ok(())
}

/// Suspend the current session until a matching event attaches. With a
/// timeout, resumes with [`Error::SuspendTimeout`] if nothing attaches in
/// time.
pub async fn pause(timeout: Option<Duration>) -> anyhow::Result<()> {
    let current = try_current()?;
    current.manager.hup(&current.session, timeout).await?;
    Ok(())
}

/// Reply, expire the current session, and unwind the callback. The returned
/// error is the finish sentinel; propagate it with `?`.
pub async fn finish(text: &str) -> anyhow::Result<()> {
    send(text).await?;
    let current = try_current()?;
    current.manager.destroy(&current.session);
    Err(Error::Finished.into())
}
