use thiserror::Error;

/// The core error taxonomy for the tunnel engine.
///
/// Handshake failures (`HandshakeRejected`, `HandshakeTimeout`, `DialTimeout`,
/// `DialFailed`) are terminal for the current [`crate::TunnelClient::start`]
/// call and are never retried automatically. Post-handshake channel loss
/// (`ChannelLost`) is always retried by the reconnection loop. Stream-level
/// failures never reach this type at all: they are resolved into a stream
/// `END` frame and logged, never torn down to the engine level.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("timed out dialing the tunnel server")]
    DialTimeout,

    #[error("failed to dial the tunnel server: {0}")]
    DialFailed(String),

    #[error("server rejected the handshake: {0}")]
    HandshakeRejected(String),

    #[error("timed out waiting for the server hello")]
    HandshakeTimeout,

    #[error("control channel lost: {0}")]
    ChannelLost(String),

    #[error("malformed frame: {0}")]
    FrameMalformed(String),

    #[error("stream failed: {0}")]
    StreamFailed(String),

    #[error("tunnel is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Protocol(#[from] tungo_protocol::ProtocolError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TunnelError>;
