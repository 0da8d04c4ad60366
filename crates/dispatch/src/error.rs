use {botway_common::FromMessage, thiserror::Error};

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error("invalid handler registration: {0}")]
    Registration(String),

    #[error(transparent)]
    Session(#[from] botway_sessions::Error),

    #[error(transparent)]
    Protocol(#[from] botway_protocol::Error),
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

botway_common::impl_context!();
