use {botway_common::FromMessage, thiserror::Error};

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error("action queue closed")]
    QueueClosed,
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

botway_common::impl_context!();
