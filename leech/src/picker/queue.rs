use std::{collections::VecDeque, sync::Arc};
use crate::{block::BlockInfo, Bitfield};
use super::PieceTracker;

// Pieces a single peer has advertised, handed out block by block.
#[derive(Debug)]
pub struct RequestQueue {

    tracker: Arc<PieceTracker>,

    // Piece index and the index of the next block to hand out.
    pieces: VecDeque<(usize, usize)>,

    // Every piece the peer has advertised, kept after its blocks are handed out.
    advertised: Bitfield,

    // Peer is refusing requests.
    pub choked: bool,

}

impl RequestQueue {

    pub fn new(tracker: Arc<PieceTracker>) -> Self {
        let advertised = Bitfield::repeat(false, tracker.num_pieces() as usize);
        Self {
            tracker,
            pieces: VecDeque::new(),
            advertised,
            choked: true,
        }
    }

    pub fn queue(&mut self, piece_idx: usize) {
        if piece_idx >= self.tracker.num_pieces() as usize {
            return;
        }
        self.advertised.set(piece_idx, true);
        if self.tracker.is_piece_received(piece_idx)
            || self.pieces.iter().any(|(idx, _)| *idx == piece_idx)
        {
            return;
        }
        self.pieces.push_back((piece_idx, 0));
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    // Next block of the head piece, the head is dropped once it runs out.
    pub fn deque(&mut self) -> Option<BlockInfo> {
        loop {
            let (piece_idx, next_block) = self.pieces.front_mut()?;
            match self.tracker.block(*piece_idx, *next_block) {
                Some(block) => {
                    *next_block += 1;
                    return Some(block);
                },
                None => { self.pieces.pop_front(); },
            }
        }
    }

    /// Picks the next block this session should request and claims it in the
    /// shared tracker. Blocks claimed or received elsewhere are skipped.
    ///
    /// Once the queue runs dry the advertised pieces are queued again, so
    /// blocks released by other sessions are picked up.
    pub fn next_request(&mut self) -> Option<BlockInfo> {
        if self.choked {
            return None;
        }
        if let Some(block) = self.claim_next() {
            return Some(block);
        }
        if self.tracker.is_done() {
            return None;
        }
        self.refill();
        self.claim_next()
    }

    fn claim_next(&mut self) -> Option<BlockInfo> {
        while let Some(block) = self.deque() {
            if self.tracker.claim(&block) {
                return Some(block);
            }
        }
        None
    }

    fn refill(&mut self) {
        let advertised: Vec<usize> = self.advertised.iter_ones().collect();
        for idx in advertised {
            self.queue(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitvec::prelude::*;
    use crate::BLOCK_SIZE;

    fn queue(num_pieces: u32) -> RequestQueue {
        let tracker = Arc::new(PieceTracker::new(num_pieces, BLOCK_SIZE * 2, BLOCK_SIZE * 2));
        RequestQueue::new(tracker)
    }

    #[test]
    fn test_bitfield_enqueues_set_bits() {
        let mut queue = queue(8);
        let bitfield = BitVec::<u8, Msb0>::from_vec(vec![0b1000_0001]);
        for idx in bitfield.iter_ones() {
            queue.queue(idx);
        }
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.deque().map(|b| b.piece_idx), Some(0));
        assert_eq!(queue.deque().map(|b| b.piece_idx), Some(0));
        assert_eq!(queue.deque().map(|b| b.piece_idx), Some(7));
    }

    #[test]
    fn test_queue_rejects_duplicates_and_received() {
        let mut queue = queue(4);
        queue.queue(1);
        queue.queue(1);
        queue.queue(9);
        assert_eq!(queue.len(), 1);

        let tracker = queue.tracker.clone();
        for b in 0..tracker.num_blocks(2) {
            tracker.add_received(&tracker.block(2, b).unwrap()).unwrap();
        }
        queue.queue(2);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_deque_walks_blocks_then_pieces() {
        let mut queue = queue(4);
        queue.queue(3);
        queue.queue(1);
        let blocks: Vec<_> = std::iter::from_fn(|| queue.deque())
            .map(|b| (b.piece_idx, b.offset))
            .collect();
        assert_eq!(blocks, vec![(3, 0), (3, BLOCK_SIZE), (1, 0), (1, BLOCK_SIZE)]);
        assert!(queue.is_empty());

        // Drained pieces may be queued again.
        queue.queue(3);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_no_request_while_choked() {
        let mut queue = queue(2);
        queue.queue(0);
        assert!(queue.choked);
        assert_eq!(queue.next_request(), None);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_single_request_after_unchoke() {
        let mut queue = queue(2);
        queue.queue(0);
        queue.choked = false;

        let block = queue.next_request().unwrap();
        assert_eq!((block.piece_idx, block.offset), (0, 0));
        assert!(!queue.tracker.needed(&block));
        // The rest of the piece stays needed.
        assert!(queue.tracker.needed(&queue.tracker.block(0, 1).unwrap()));
    }

    #[test]
    fn test_skips_blocks_claimed_elsewhere() {
        let tracker = Arc::new(PieceTracker::new(2, BLOCK_SIZE * 2, BLOCK_SIZE * 2));
        let mut a = RequestQueue::new(tracker.clone());
        let mut b = RequestQueue::new(tracker.clone());
        for queue in [&mut a, &mut b] {
            queue.queue(0);
            queue.choked = false;
        }

        let first = a.next_request().unwrap();
        let second = b.next_request().unwrap();
        assert_ne!(first, second);
        assert_eq!(second.offset, BLOCK_SIZE);
        assert_eq!(a.next_request(), None);
    }

    #[test]
    fn test_released_block_is_requested_again() {
        let tracker = Arc::new(PieceTracker::new(1, BLOCK_SIZE * 2, BLOCK_SIZE * 2));
        let mut a = RequestQueue::new(tracker.clone());
        let mut b = RequestQueue::new(tracker.clone());
        b.queue(0);
        b.choked = false;
        let lost = b.next_request().unwrap();
        assert_eq!(lost.offset, 0);

        a.queue(0);
        a.choked = false;
        let got = a.next_request().unwrap();
        assert_eq!(got.offset, BLOCK_SIZE);
        tracker.add_received(&got).unwrap();
        assert_eq!(a.next_request(), None);
        assert!(a.is_empty());

        // The other session goes away without delivering.
        tracker.release(&lost);
        assert_eq!(a.next_request(), Some(lost));
        assert_eq!(a.next_request(), None);
    }

    #[test]
    fn test_refill_only_covers_advertised_pieces() {
        let tracker = Arc::new(PieceTracker::new(2, BLOCK_SIZE, BLOCK_SIZE));
        let mut queue = RequestQueue::new(tracker.clone());
        queue.queue(1);
        queue.choked = false;
        assert_eq!(queue.next_request().map(|b| b.piece_idx), Some(1));

        // Piece 0 is still needed but this peer never had it.
        assert_eq!(queue.next_request(), None);
        assert!(tracker.needed(&tracker.block(0, 0).unwrap()));
    }
}
