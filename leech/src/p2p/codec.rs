use bytes::BytesMut;
use tokio_util::codec::{Encoder, Decoder};
use super::{
    PeerError,
    handshake::{Handshake, HandshakeCodec},
    message::{Message, MessageCodec},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Handshake(Handshake),
    Message(Message),
}

/// Codec for a whole peer connection.
///
/// The first inbound frame is sized as a handshake, every frame after it by
/// its length prefix. Partial frames stay buffered inside the `Framed`, so
/// switching rules never loses bytes that arrived with the handshake.
#[derive(Debug, Default)]
pub struct WireCodec {
    handshake_received: bool,
}

impl WireCodec {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn handshake_received(&self) -> bool {
        self.handshake_received
    }
}

impl Decoder for WireCodec {

    type Item = Frame;
    type Error = PeerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.handshake_received {
            return Ok(MessageCodec.decode(src)?.map(Frame::Message));
        }
        match HandshakeCodec.decode(src)? {
            Some(handshake) => {
                self.handshake_received = true;
                Ok(Some(Frame::Handshake(handshake)))
            },
            None => Ok(None),
        }
    }
}

impl Encoder<Handshake> for WireCodec {

    type Error = PeerError;

    fn encode(&mut self, item: Handshake, dst: &mut BytesMut) -> Result<(), Self::Error> {
        HandshakeCodec.encode(item, dst)
    }
}

impl Encoder<Message> for WireCodec {

    type Error = PeerError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        MessageCodec.encode(item, dst)
    }
}
