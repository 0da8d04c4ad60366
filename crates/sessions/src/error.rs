use {botway_common::FromMessage, thiserror::Error};

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error("session has no event yet")]
    NoEvent,

    #[error("a one-shot or empty session cannot suspend: it has no rule to wake it")]
    NoSpace,

    #[error("session is expired")]
    Expired,

    #[error("suspend timeout must be positive")]
    BadTimeout,

    #[error("session suspend timed out")]
    SuspendTimeout,

    #[error("no session in the current task context")]
    NoContext,

    /// Sentinel raised by `finish()`; the handler loop treats it as a normal
    /// return, everything else must not swallow it.
    #[error("handler finished")]
    Finished,

    #[error(transparent)]
    Protocol(#[from] botway_protocol::Error),
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

botway_common::impl_context!();
