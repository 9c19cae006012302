use bytes::{BufMut, Buf, BytesMut};
use tokio_util::codec::{Encoder, Decoder};
use crate::ID;
use super::PeerError;

pub const PROTOCOL: [u8; 19] = *b"BitTorrent protocol";

// Bytes in a handshake besides the protocol string.
const HANDSHAKE_OVERHEAD: usize = 49;

#[derive(Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol:   [u8; 19],
    pub reserved:   [u8; 8],
    pub info_hash:  ID,
    pub peer_id:    ID,
}

impl Handshake {
    pub fn new(info_hash: ID, peer_id: ID) -> Self {
        Self {
            protocol:   PROTOCOL,
            reserved:   [0; 8],
            info_hash,
            peer_id,
        }
    }
}

/// Whether buf holds exactly one handshake frame.
pub fn is_handshake(buf: &[u8]) -> bool {
    match buf.first() {
        Some(&pstrlen) => {
            buf.len() == pstrlen as usize + HANDSHAKE_OVERHEAD
                && buf.get(1..20) == Some(&PROTOCOL[..])
        },
        None => false,
    }
}

// Size of the handshake frame at the start of buf, if its length byte is buffered.
pub fn frame_len(buf: &[u8]) -> Option<usize> {
    buf.first().map(|&pstrlen| pstrlen as usize + HANDSHAKE_OVERHEAD)
}

pub struct HandshakeCodec;

impl Encoder<Handshake> for HandshakeCodec {

    type Error = PeerError;

    fn encode(&mut self, item: Handshake, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(PROTOCOL.len() + HANDSHAKE_OVERHEAD);
        dst.put_u8(PROTOCOL.len() as u8);
        dst.extend_from_slice(&item.protocol);
        dst.extend_from_slice(&item.reserved);
        dst.extend_from_slice(&item.info_hash);
        dst.extend_from_slice(&item.peer_id);
        Ok(())
    }
}

impl Decoder for HandshakeCodec {

    type Item = Handshake;
    type Error = PeerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {

        let Some(len) = frame_len(src) else {
            return Ok(None);
        };
        if src.len() < len {
            // Handshake not fully received.
            src.reserve(len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(len);
        if !is_handshake(&frame) {
            return Err(PeerError::IncorrectProtocol);
        }

        let mut frame = &frame[1..];
        let mut protocol = [0; 19];
        frame.copy_to_slice(&mut protocol);

        let mut reserved = [0; 8];
        frame.copy_to_slice(&mut reserved);

        let mut info_hash = [0; 20];
        frame.copy_to_slice(&mut info_hash);

        let mut peer_id = [0; 20];
        frame.copy_to_slice(&mut peer_id);

        Ok(Some(Handshake {
            protocol,
            reserved,
            info_hash,
            peer_id,
        }))
    }
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("protocol", &String::from_utf8_lossy(&self.protocol))
            .field("reserved", &self.reserved)
            .field("info_hash", &hex::encode(self.info_hash))
            .field("peer_id", &String::from_utf8_lossy(&self.peer_id))
            .finish()
    }
}
