#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub enum ConnState {

    // Opening the TCP connection.
    #[default]
    Connecting,

    // Waiting for the peer's handshake.
    Handshaking,

    // Trading messages and requesting blocks.
    Exchanging,

    // Connection lost, waiting to reconnect.
    Retrying,

    // Session is over for good.
    Closed,

}

impl std::fmt::Display for ConnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnState::Connecting => write!(f, "connecting"),
            ConnState::Handshaking => write!(f, "handshaking"),
            ConnState::Exchanging => write!(f, "exchanging"),
            ConnState::Retrying => write!(f, "retrying"),
            ConnState::Closed => write!(f, "closed"),
        }
    }
}

// Why a connection ended without an error.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SessionEnd {

    // Peer choked us, reconnect later.
    Choked,

    // Download finished or was shut down.
    Stopped,

}
