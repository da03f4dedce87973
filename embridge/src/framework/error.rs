use std::io;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Invalid channel name {0:?}: {1}")]
    InvalidChannel(String, &'static str),

    #[error("Messenger is not available")]
    MessengerUnavailable,

    #[error("Engine rejected message on channel '{0}'")]
    SendFailed(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
