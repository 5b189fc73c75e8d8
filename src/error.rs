//! Error types for the intercom

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transport errors
///
/// Only `LocalResolution`, `SocketOpen` and `Bind` are fatal to the
/// process; everything that can happen on an established socket is
/// absorbed by the streaming loops (best-effort link, an errored datagram
/// is simply skipped).
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to resolve local endpoint '{host}': {source}")]
    LocalResolution {
        host: String,
        source: std::io::Error,
    },

    #[error("Socket open failed: {0}")]
    SocketOpen(std::io::Error),

    #[error("Socket bind failed on {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    #[error("Peer wait cancelled while resolving '{0}'")]
    Cancelled(String),

    #[error("Send failed: {0}")]
    Send(std::io::Error),

    #[error("Receive failed: {0}")]
    Receive(std::io::Error),

    #[error("Transport already torn down")]
    Closed,
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Chunk length {0} is odd; packed DAC words are two bytes each")]
    OddChunkLength(usize),
}

/// Streaming engine errors
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Cannot access audio file '{path}': {source}")]
    FileAccess {
        path: String,
        source: std::io::Error,
    },

    #[error("Audio file '{0}' is shorter than its header")]
    FileTooShort(String),

    #[error("Transport error during stream: {0}")]
    Transport(#[from] TransportError),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subsystem_errors_convert_into_the_crate_error() {
        let e: Error = TransportError::Closed.into();
        assert!(matches!(e, Error::Transport(_)));

        let e: Error = CodecError::OddChunkLength(3).into();
        assert!(matches!(e, Error::Codec(_)));

        let e: Error = StreamError::FileTooShort("clip.wav".to_string()).into();
        assert!(matches!(e, Error::Stream(_)));
    }

    #[test]
    fn messages_name_the_failing_subsystem() {
        let e = Error::from(TransportError::Closed);
        assert_eq!(
            e.to_string(),
            "Transport error: Transport already torn down"
        );
    }
}
