use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use crate::{block::BlockInfo, store::StoreInfo};

pub mod piece;
pub mod queue;

pub use piece::BlockState;
pub use queue::RequestQueue;
use piece::PieceState;

type Result<T, E = PickerError> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum PickerError {

    #[error("piece index {0} out of range")]
    InvalidPiece(usize),

    #[error("block {0:?} does not match piece layout")]
    InvalidBlock(BlockInfo),

}

/// Download state of every block in the torrent, shared by all peer sessions.
///
/// Each call locks once, so a check and the update that follows it are
/// atomic with respect to other sessions.
#[derive(Debug)]
pub struct PieceTracker {

    state: Mutex<TrackerState>,

    num_pieces: u32,

    total_blocks: usize,

    // Bumped whenever a block goes back to needed.
    released: watch::Sender<u64>,

}

#[derive(Debug)]
struct TrackerState {

    pieces: Vec<PieceState>,

    num_received: usize,

}

impl PieceTracker {

    pub fn new(num_pieces: u32, piece_len: usize, last_piece_len: usize) -> Self {
        let pieces: Vec<PieceState> = (0..num_pieces as usize)
            .map(|idx| {
                let len = if idx as u32 == num_pieces - 1 { last_piece_len } else { piece_len };
                PieceState::new(idx, len)
            })
            .collect();
        let total_blocks = pieces.iter().map(|p| p.num_blocks()).sum();

        let (released, _) = watch::channel(0);
        Self {
            state: Mutex::new(TrackerState { pieces, num_received: 0 }),
            num_pieces,
            total_blocks,
            released,
        }
    }

    pub fn from_store(info: &StoreInfo) -> Self {
        Self::new(info.num_pieces, info.piece_len, info.last_piece_len)
    }

    // A panicking session can't leave a block half updated, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn num_pieces(&self) -> u32 {
        self.num_pieces
    }

    #[cfg(test)]
    pub fn num_blocks(&self, piece_idx: usize) -> usize {
        self.lock().pieces.get(piece_idx).map_or(0, |p| p.num_blocks())
    }

    pub fn block(&self, piece_idx: usize, block_idx: usize) -> Option<BlockInfo> {
        self.lock().pieces.get(piece_idx).and_then(|p| p.block(block_idx))
    }

    // Received blocks are left alone.
    pub fn add_requested(&self, block: &BlockInfo) -> Result<()> {
        let mut state = self.lock();
        validated(&mut state, block)?.request_block(block);
        Ok(())
    }

    /// Marks a block as received, returns false if it already was.
    pub fn add_received(&self, block: &BlockInfo) -> Result<bool> {
        let mut state = self.lock();
        let new = validated(&mut state, block)?.received_block(block);
        if new {
            state.num_received += 1;
        }
        Ok(new)
    }

    // Errors for blocks that don't match the piece layout.
    pub fn is_received(&self, block: &BlockInfo) -> Result<bool> {
        let mut state = self.lock();
        Ok(validated(&mut state, block)?.state(block) == BlockState::Received)
    }

    pub fn needed(&self, block: &BlockInfo) -> bool {
        let mut state = self.lock();
        validated(&mut state, block)
            .map(|p| p.state(block) == BlockState::Needed)
            .unwrap_or(false)
    }

    /// Moves a needed block to requested, false if it was not needed.
    pub fn claim(&self, block: &BlockInfo) -> bool {
        let mut state = self.lock();
        match validated(&mut state, block) {
            Ok(piece) if piece.state(block) == BlockState::Needed => {
                piece.request_block(block);
                true
            },
            _ => false,
        }
    }

    /// Returns a requested block to needed so another session can pick it up.
    /// Subscribers are woken if the block was in flight.
    pub fn release(&self, block: &BlockInfo) {
        let freed = {
            let mut state = self.lock();
            validated(&mut state, block).map_or(false, |piece| piece.free_block(block))
        };
        if freed {
            self.released.send_modify(|n| *n += 1);
        }
    }

    /// Changes each time a block is released.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.released.subscribe()
    }

    pub fn is_piece_received(&self, piece_idx: usize) -> bool {
        self.lock().pieces.get(piece_idx).map_or(false, |p| p.is_complete())
    }

    pub fn is_done(&self) -> bool {
        self.lock().num_received == self.total_blocks
    }

    pub fn received(&self) -> usize {
        self.lock().num_received
    }

    pub fn total(&self) -> usize {
        self.total_blocks
    }

    // Fraction of blocks received, in [0, 1].
    pub fn progress(&self) -> f64 {
        if self.total_blocks == 0 {
            return 1.0;
        }
        self.received() as f64 / self.total_blocks as f64
    }
}

fn validated<'a>(state: &'a mut TrackerState, block: &BlockInfo) -> Result<&'a mut PieceState> {
    let piece = state.pieces
        .get_mut(block.piece_idx)
        .ok_or(PickerError::InvalidPiece(block.piece_idx))?;
    if !piece.is_valid(block) {
        return Err(PickerError::InvalidBlock(*block));
    }
    Ok(piece)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};
    use crate::BLOCK_SIZE;

    // Two full pieces of two blocks, and a short last piece of one block.
    fn tracker() -> PieceTracker {
        PieceTracker::new(3, BLOCK_SIZE * 2, 1000)
    }

    fn all_blocks(tracker: &PieceTracker) -> Vec<BlockInfo> {
        (0..tracker.num_pieces() as usize)
            .flat_map(|p| (0..tracker.num_blocks(p)).map(move |b| (p, b)))
            .map(|(p, b)| tracker.block(p, b).unwrap())
            .collect()
    }

    #[test]
    fn test_geometry() {
        let tracker = tracker();
        assert_eq!(tracker.total(), 5);
        assert_eq!(tracker.block(2, 0), Some(BlockInfo { piece_idx: 2, offset: 0, len: 1000 }));
        assert_eq!(tracker.block(2, 1), None);
        assert_eq!(tracker.block(3, 0), None);
    }

    #[test]
    fn test_add_received_is_idempotent() {
        let tracker = tracker();
        let block = tracker.block(0, 1).unwrap();
        tracker.add_requested(&block).unwrap();
        assert!(!tracker.needed(&block));
        assert_eq!(tracker.is_received(&block), Ok(false));
        assert_eq!(tracker.add_received(&block), Ok(true));
        assert_eq!(tracker.is_received(&block), Ok(true));
        assert_eq!(tracker.received(), 1);
        assert_eq!(tracker.add_received(&block), Ok(false));
        assert_eq!(tracker.received(), 1);
        assert!(!tracker.needed(&block));
    }

    #[test]
    fn test_is_done_is_monotonic() {
        let tracker = tracker();
        let blocks = all_blocks(&tracker);
        for (i, block) in blocks.iter().enumerate() {
            assert!(!tracker.is_done());
            tracker.add_received(block).unwrap();
            assert_eq!(tracker.received(), i + 1);
        }
        assert!(tracker.is_done());
        assert_eq!(tracker.progress(), 1.0);

        // Replays and releases never undo completion.
        for block in blocks.iter() {
            tracker.add_received(block).unwrap();
            tracker.release(block);
            assert!(tracker.is_done());
        }
    }

    #[test]
    fn test_claim_and_release() {
        let tracker = tracker();
        let block = tracker.block(1, 0).unwrap();
        assert!(tracker.needed(&block));
        assert!(tracker.claim(&block));
        assert!(!tracker.needed(&block));
        assert!(!tracker.claim(&block));

        tracker.release(&block);
        assert!(tracker.needed(&block));
        assert!(tracker.claim(&block));
    }

    #[test]
    fn test_release_notifies_only_in_flight_blocks() {
        let tracker = tracker();
        let mut released = tracker.subscribe();
        let block = tracker.block(0, 0).unwrap();

        // Never claimed, nothing to hand back.
        tracker.release(&block);
        assert!(!released.has_changed().unwrap());

        tracker.claim(&block);
        tracker.release(&block);
        assert!(released.has_changed().unwrap());
        released.borrow_and_update();

        tracker.add_received(&block).unwrap();
        tracker.release(&block);
        assert!(!released.has_changed().unwrap());
    }

    #[test]
    fn test_piece_received() {
        let tracker = tracker();
        tracker.add_received(&tracker.block(0, 0).unwrap()).unwrap();
        assert!(!tracker.is_piece_received(0));
        tracker.add_received(&tracker.block(0, 1).unwrap()).unwrap();
        assert!(tracker.is_piece_received(0));
        assert!(!tracker.is_piece_received(1));
        assert_eq!(tracker.progress(), 2.0 / 5.0);
    }

    #[test]
    fn test_invalid_blocks() {
        let tracker = tracker();
        let out_of_range = BlockInfo { piece_idx: 9, offset: 0, len: BLOCK_SIZE };
        assert_eq!(tracker.add_received(&out_of_range), Err(PickerError::InvalidPiece(9)));
        let misaligned = BlockInfo { piece_idx: 0, offset: 3, len: BLOCK_SIZE };
        assert_eq!(tracker.add_received(&misaligned), Err(PickerError::InvalidBlock(misaligned)));
        assert_eq!(tracker.is_received(&misaligned), Err(PickerError::InvalidBlock(misaligned)));
        assert!(!tracker.needed(&misaligned));
        assert!(!tracker.claim(&misaligned));
        assert_eq!(tracker.received(), 0);
    }

    #[test]
    fn test_concurrent_claims_are_exclusive() {
        let tracker = Arc::new(PieceTracker::new(64, BLOCK_SIZE * 4, BLOCK_SIZE * 4));
        let blocks = Arc::new(all_blocks(&tracker));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = tracker.clone();
                let blocks = blocks.clone();
                thread::spawn(move || blocks.iter().filter(|b| tracker.claim(b)).count())
            })
            .collect();

        let claimed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(claimed, tracker.total());
    }

    #[test]
    fn test_concurrent_duplicate_receipts() {
        let tracker = Arc::new(PieceTracker::new(16, BLOCK_SIZE * 2, BLOCK_SIZE));
        let blocks = Arc::new(all_blocks(&tracker));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tracker = tracker.clone();
                let blocks = blocks.clone();
                thread::spawn(move || blocks.iter().filter(|b| tracker.add_received(b).unwrap()).count())
            })
            .collect();

        let new: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(new, tracker.total());
        assert!(tracker.is_done());
    }
}
