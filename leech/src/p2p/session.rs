use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpStream, time};
use tokio_util::codec::Framed;
use futures::{SinkExt, StreamExt};
use crate::{
    block::{BlockData, BlockInfo},
    manager::DownloadContext,
    picker::RequestQueue,
    Bitfield,
};
use super::{*, state::*};

type Socket = Framed<TcpStream, WireCodec>;

/// One peer's connection, re-established after failures until the download
/// stops.
#[derive(Debug)]
pub struct PeerSession {

    // The peer's IP address.
    address: SocketAddr,

    // Shared by every session of the download.
    ctx: Arc<DownloadContext>,

    state: ConnState,

    // Pieces the peer advertised on the current connection.
    queue: RequestQueue,

    // Block we asked this peer for and haven't received yet.
    outstanding: Option<BlockInfo>,

}

impl PeerSession {

    pub fn new(address: SocketAddr, ctx: Arc<DownloadContext>) -> PeerSession {
        let queue = RequestQueue::new(Arc::clone(&ctx.picker));
        PeerSession {
            address,
            ctx,
            state: ConnState::default(),
            queue,
            outstanding: None,
        }
    }

    /// Runs connections to the peer until the download stops or the
    /// reconnect cap is hit, returns the final state.
    #[tracing::instrument(name = "peer", skip(self), fields(address = %self.address))]
    pub async fn run(mut self) -> ConnState {

        // Failed attempts since the last connection that got past the handshake.
        let mut failures = 0;

        loop {
            let result = self.connect().await;
            let reached_exchange = self.state == ConnState::Exchanging;
            self.disconnect();

            match result {
                Ok(SessionEnd::Stopped) => break,
                Ok(SessionEnd::Choked) => tracing::info!("choked by peer, closing connection"),
                Err(e) => tracing::warn!("session error: {}", e),
            }
            if self.ctx.is_stopped() {
                break;
            }

            failures = if reached_exchange { 0 } else { failures + 1 };
            if let Some(max) = self.ctx.config.max_reconnects {
                if failures > max {
                    tracing::warn!("giving up after {} failed attempts", failures);
                    self.ctx.stats.remove_peer(self.address);
                    break;
                }
            }

            self.set_state(ConnState::Retrying);
            tokio::select! {
                _ = self.ctx.cancel.cancelled() => break,
                _ = time::sleep(self.ctx.config.reconnect_delay) => {},
            }
        }

        self.set_state(ConnState::Closed);
        self.state
    }

    fn set_state(&mut self, state: ConnState) {
        tracing::trace!("{} -> {}", self.state, state);
        self.state = state;
    }

    async fn connect(&mut self) -> Result<SessionEnd> {

        self.set_state(ConnState::Connecting);
        self.queue = RequestQueue::new(Arc::clone(&self.ctx.picker));

        let stream = tokio::select! {
            _ = self.ctx.cancel.cancelled() => return Ok(SessionEnd::Stopped),
            stream = time::timeout(self.ctx.config.connect_timeout, TcpStream::connect(self.address)) => {
                stream.map_err(|_| PeerError::Timeout)??
            },
        };
        tracing::debug!("outbound connection successful");
        self.ctx.stats.set_connected(self.address, true);

        let mut socket = Framed::new(stream, WireCodec::new());
        if let Some(end) = self.exchange_handshake(&mut socket).await? {
            return Ok(end);
        }
        self.exchange(&mut socket).await
    }

    // Gives back the in flight block and marks the peer disconnected.
    fn disconnect(&mut self) {
        if let Some(block) = self.outstanding.take() {
            tracing::debug!("releasing block {:?}", block);
            self.ctx.picker.release(&block);
        }
        self.ctx.stats.set_connected(self.address, false);
    }

    // Next frame from the peer, bounded by the idle timeout. None once the download stops.
    async fn read_frame(&self, socket: &mut Socket) -> Result<Option<Frame>> {
        tokio::select! {
            _ = self.ctx.cancel.cancelled() => Ok(None),
            frame = time::timeout(self.ctx.config.connect_timeout, socket.next()) => {
                match frame.map_err(|_| PeerError::Timeout)? {
                    Some(frame) => Ok(Some(frame?)),
                    None => Err(PeerError::ConnectionClosed),
                }
            },
        }
    }

    async fn exchange_handshake(&mut self, socket: &mut Socket) -> Result<Option<SessionEnd>> {

        self.set_state(ConnState::Handshaking);
        let handshake = Handshake::new(self.ctx.info_hash, self.ctx.config.client_id);
        tracing::debug!("send handshake");
        socket.send(handshake).await?;

        match self.read_frame(socket).await? {
            Some(Frame::Handshake(handshake)) => {
                tracing::debug!("read: {:?}", handshake);
                if handshake.info_hash != self.ctx.info_hash {
                    return Err(PeerError::IncorrectInfoHash);
                }
            },
            Some(Frame::Message(_)) => return Err(PeerError::NoHandshake),
            None => return Ok(Some(SessionEnd::Stopped)),
        }

        tracing::info!("handshake successful, peer connected");
        self.send_message(socket, Message::Interested).await?;
        self.set_state(ConnState::Exchanging);
        Ok(None)
    }

    async fn exchange(&mut self, socket: &mut Socket) -> Result<SessionEnd> {
        let mut released = self.ctx.picker.subscribe();
        loop {
            // An idle session wakes when another one gives a block back.
            let idle = self.outstanding.is_none() && !self.queue.choked;
            let frame = tokio::select! {
                frame = self.read_frame(socket) => frame?,
                Ok(()) = released.changed(), if idle => {
                    self.request_next(socket).await?;
                    continue;
                },
            };
            let msg = match frame {
                Some(Frame::Message(msg)) => msg,
                // The codec only yields one handshake per connection.
                Some(Frame::Handshake(_)) => return Err(PeerError::InvalidMessage),
                None => return Ok(SessionEnd::Stopped),
            };
            if let Some(end) = self.handle_msg(socket, msg).await? {
                return Ok(end);
            }
        }
    }

    // Logs a message and sends to peer.
    async fn send_message(&mut self, socket: &mut Socket, msg: Message) -> Result<()> {
        tracing::debug!("send: {}", msg);
        socket.send(msg).await
    }

    async fn handle_msg(&mut self, socket: &mut Socket, msg: Message) -> Result<Option<SessionEnd>> {
        tracing::trace!("read: {}", msg);

        match msg {

            Message::Choke => {
                self.queue.choked = true;
                return Ok(Some(SessionEnd::Choked));
            },

            Message::Unchoke => {
                self.queue.choked = false;
                self.request_next(socket).await?;
            },

            Message::Have { idx } => {
                let was_empty = self.queue.is_empty();
                self.queue.queue(idx as usize);
                if was_empty {
                    self.request_next(socket).await?;
                }
            },

            Message::Bitfield(bitfield) => self.handle_bitfield(socket, bitfield).await?,

            Message::Block(block) => {
                if self.handle_block(block).await? {
                    self.ctx.complete();
                    return Ok(Some(SessionEnd::Stopped));
                }
                self.request_next(socket).await?;
            },

            // Nothing is seeded, so requests for our pieces go unanswered.
            Message::KeepAlive
            | Message::Interested
            | Message::NotInterested
            | Message::Request(_)
            | Message::Cancel(_)
            | Message::Port { .. } => {},

        }

        Ok(None)
    }

    async fn handle_bitfield(&mut self, socket: &mut Socket, bitfield: Bitfield) -> Result<()> {
        tracing::info!("peer has {}/{} pieces", bitfield.count_ones(), self.ctx.picker.num_pieces());
        let was_empty = self.queue.is_empty();
        for idx in bitfield.iter_ones() {
            self.queue.queue(idx);
        }
        if was_empty {
            self.request_next(socket).await?;
        }
        Ok(())
    }

    // Returns whether the download is done.
    async fn handle_block(&mut self, block: BlockData) -> Result<bool> {

        let info = block.info();
        if self.outstanding == Some(info) {
            self.outstanding = None;
        }

        let received = self.ctx.picker.is_received(&info).map_err(|e| {
            tracing::warn!("invalid block: {}", e);
            PeerError::InvalidMessage
        })?;
        if received {
            tracing::debug!("duplicate block: {:?}", info);
            return Ok(self.ctx.picker.is_done());
        }

        // Unrequested blocks are held while being written so no session asks for them.
        if self.ctx.picker.needed(&info) {
            self.ctx.picker.add_requested(&info).map_err(|_| PeerError::InvalidMessage)?;
        }

        // Marked received only once written, so the last block can't close
        // the files under a write still in flight.
        let file_bytes = self.ctx.files.file_bytes(&block);
        let len = block.data.len();
        if let Err(e) = self.ctx.files.write_block(block).await {
            tracing::error!("failed to write block {:?}: {}", info, e);
        }

        let is_new = self.ctx.picker.add_received(&info).map_err(|_| PeerError::InvalidMessage)?;
        if is_new {
            self.ctx.stats.record_block(len, &file_bytes, self.ctx.picker.progress());
        }

        Ok(self.ctx.picker.is_done())
    }

    // Sends a single request, unless one is already in flight.
    async fn request_next(&mut self, socket: &mut Socket) -> Result<()> {
        if self.outstanding.is_some() {
            return Ok(());
        }
        if let Some(block) = self.queue.next_request() {
            // Set before sending so a failed send still releases the block.
            self.outstanding = Some(block);
            self.send_message(socket, Message::Request(block)).await?;
        }
        Ok(())
    }
}
