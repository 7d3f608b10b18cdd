use std::fmt;

use crate::mumble::events::Rejection;

#[derive(Clone, Debug, PartialEq)]
pub enum ClientError {
    Config(String),
    AlreadyConnected,
    NotConnected,
    Protocol(String),
    Timeout,
    Transport(String),
    Rejected(Rejection),
    ServerClosed,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Config(message) => write!(f, "invalid config: {message}"),
            ClientError::AlreadyConnected => write!(f, "already connected"),
            ClientError::NotConnected => write!(f, "not connected"),
            ClientError::Protocol(message) => write!(f, "protocol error: {message}"),
            ClientError::Timeout => write!(f, "ping timeout"),
            ClientError::Transport(message) => write!(f, "transport error: {message}"),
            ClientError::Rejected(rejection) => match &rejection.reason {
                Some(reason) => write!(f, "connection rejected: {reason}"),
                None => write!(f, "connection rejected"),
            },
            ClientError::ServerClosed => write!(f, "server closed the connection"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<std::io::Error> for ClientError {
    fn from(error: std::io::Error) -> Self {
        ClientError::Transport(error.to_string())
    }
}
