use bytes::{BufMut, Buf, BytesMut};
use tokio_util::codec::{Encoder, Decoder};
use crate::{block, Bitfield};
use super::PeerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {

    // Zero length message that keeps an idle connection open.
    KeepAlive,

    // Peer will not answer our requests.
    Choke,

    // Peer will answer our requests.
    Unchoke,

    Interested,

    NotInterested,

    // Peer has the piece at the given index.
    Have { idx: u32 },

    // Every piece the peer has, sent once after the handshake.
    Bitfield(Bitfield),

    // request: index, begin and length of a block.
    Request(block::BlockInfo),

    // piece: index, begin and the block's bytes.
    Block(block::BlockData),

    Cancel(block::BlockInfo),

    // DHT port of the peer.
    Port { port: u16 },
}

// Largest frame accepted from a peer, a full block or a bitfield for up to 8M pieces.
pub const MAX_MESSAGE_LEN: usize = 1 << 20;

// Bytes the payload of a fixed size message must hold.
fn payload_len(id: u8) -> Option<usize> {
    match id {
        0..=3 => Some(0),
        4 => Some(4),
        6 | 8 => Some(12),
        9 => Some(2),
        _ => None,
    }
}

pub struct MessageCodec;

impl Encoder<Message> for MessageCodec {

    type Error = PeerError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match msg {

            // [0, 0, 0, 0]
            Message::KeepAlive => dst.put_u32(0),

            // [0, 0, 0, 1, 0]
            Message::Choke => {
                dst.put_u32(1);
                dst.put_u8(0);
            },

            // [0, 0, 0, 1, 1]
            Message::Unchoke => {
                dst.put_u32(1);
                dst.put_u8(1);
            },

            // [0, 0, 0, 1, 2]
            Message::Interested => {
                dst.put_u32(1);
                dst.put_u8(2);
            },

            // [0, 0, 0, 1, 3]
            Message::NotInterested => {
                dst.put_u32(1);
                dst.put_u8(3);
            },

            // have: <len=0005><id=4><piece index>
            Message::Have { idx } => {
                dst.put_u32(5);
                dst.put_u8(4);
                dst.put_u32(idx);
            },

            // bitfield: <len=0001+X><id=5><bitfield>
            Message::Bitfield(bitfield) => {
                let raw = bitfield.as_raw_slice();
                dst.put_u32(1 + raw.len() as u32);
                dst.put_u8(5);
                dst.extend_from_slice(raw);
            },

            // request: <len=0013><id=6><index><begin><length>
            Message::Request(block) => {
                dst.put_u32(13);
                dst.put_u8(6);
                dst.put_u32(block.piece_idx as u32);
                dst.put_u32(block.offset as u32);
                dst.put_u32(block.len as u32);
            },

            // piece: <len=0009+X><id=7><index><begin><block>
            Message::Block(block) => {
                dst.put_u32(9 + block.data.len() as u32);
                dst.put_u8(7);
                dst.put_u32(block.piece_idx as u32);
                dst.put_u32(block.offset as u32);
                dst.extend_from_slice(&block.data);
            },

            // cancel: <len=0013><id=8><index><begin><length>
            Message::Cancel(block) => {
                dst.put_u32(13);
                dst.put_u8(8);
                dst.put_u32(block.piece_idx as u32);
                dst.put_u32(block.offset as u32);
                dst.put_u32(block.len as u32);
            },

            // port: <len=0003><id=9><listen-port>
            Message::Port { port } => {
                dst.put_u32(3);
                dst.put_u8(9);
                dst.put_u16(port);
            },
        }

        Ok(())
    }
}

impl Decoder for MessageCodec {

    type Item = Message;
    type Error = PeerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {

        // Can't read message length.
        if src.len() < 4 { return Ok(None); }

        let msg_len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if msg_len > MAX_MESSAGE_LEN {
            tracing::warn!("message length {} over limit", msg_len);
            return Err(PeerError::InvalidMessage);
        }
        if src.len() < 4 + msg_len {
            // Haven't received all of message.
            src.reserve(4 + msg_len - src.len());
            return Ok(None);
        }

        src.advance(4);
        if msg_len == 0 { return Ok(Some(Message::KeepAlive)); }

        // Only the frame is visible from here, a short payload can't read into the next one.
        let mut frame = src.split_to(msg_len);
        let id = frame.get_u8();
        match payload_len(id) {
            Some(len) if frame.len() < len => return Err(PeerError::InvalidMessage),
            None if id == 7 && frame.len() < 8 => return Err(PeerError::InvalidMessage),
            _ => {},
        }

        let msg = match id {
            0 => Message::Choke,
            1 => Message::Unchoke,
            2 => Message::Interested,
            3 => Message::NotInterested,
            4 => Message::Have { idx: frame.get_u32() },
            5 => Message::Bitfield(Bitfield::from_vec(frame.to_vec())),
            6 => {
                let piece_idx = frame.get_u32() as usize;
                let offset = frame.get_u32() as usize;
                let len = frame.get_u32() as usize;
                Message::Request(block::BlockInfo { piece_idx, offset, len })
            },
            7 => {
                let piece_idx = frame.get_u32() as usize;
                let offset = frame.get_u32() as usize;
                Message::Block(block::BlockData { piece_idx, offset, data: frame.to_vec() })
            },
            8 => {
                let piece_idx = frame.get_u32() as usize;
                let offset = frame.get_u32() as usize;
                let len = frame.get_u32() as usize;
                Message::Cancel(block::BlockInfo { piece_idx, offset, len })
            },
            9 => Message::Port { port: frame.get_u16() },
            id => {
                tracing::warn!("invalid message id: {}", id);
                return Err(PeerError::InvalidMessageId(id));
            }
        };

        Ok(Some(msg))
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::KeepAlive => write!(f, "keep alive"),
            Message::Choke => write!(f, "choke"),
            Message::Unchoke => write!(f, "unchoke"),
            Message::Interested => write!(f, "interested"),
            Message::NotInterested => write!(f, "not interested"),
            Message::Have { idx } => write!(f, "have piece idx: {}", idx),
            Message::Bitfield(bf) => write!(f, "bitfield with {} pieces", bf.count_ones()),
            Message::Request(block) => write!(f, "request for block {{ piece idx: {}, offset {}, length: {} }}",
                block.piece_idx,
                block.offset,
                block.len,
            ),
            Message::Block(block) => write!(f, "block data {{ piece idx: {}, offset: {}, length: {} }}",
                block.piece_idx,
                block.offset,
                block.data.len(),
            ),
            Message::Cancel(block) => write!(f, "cancel for block {{ piece idx: {}, offset: {}, length: {} }}",
                block.piece_idx,
                block.offset,
                block.len
            ),
            Message::Port { port } => write!(f, "port {}", port),
        }
    }
}
