mod session;
mod codec;
pub mod message;
pub mod handshake;
pub mod state;

pub use codec::{Frame, WireCodec};
pub use handshake::Handshake;
pub use message::Message;
pub use session::PeerSession;

type Result<T, E = PeerError> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum PeerError {

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake provided incorrect protocol")]
    IncorrectProtocol,

    #[error("handshake provided incorrect info-hash")]
    IncorrectInfoHash,

    #[error("no handshake recieved")]
    NoHandshake,

    #[error("invalid message ID: {0}")]
    InvalidMessageId(u8),

    #[error("invalid message payload")]
    InvalidMessage,

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("connection timeout")]
    Timeout,
}
