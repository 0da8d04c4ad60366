use {botway_common::FromMessage, thiserror::Error};

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown event kind: {tag}")]
    UnknownKind { tag: String },

    #[error("frame missing field `{0}`")]
    MissingField(&'static str),

    #[error("a {0} message action needs a {1}")]
    ActionTarget(&'static str, &'static str),

    #[error("transport closed")]
    TransportClosed,
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

botway_common::impl_context!();
