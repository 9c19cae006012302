use crate::{block::*, BLOCK_SIZE};

#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub enum BlockState {

    // Block has not been requested, or its request was given up.
    #[default]
    Needed,

    // Block has been requested by exactly one session.
    Requested,

    // Block has been received.
    Received,

}

#[derive(Debug)]
pub struct PieceState {

    // Piece index.
    pub idx: usize,

    // Length of piece.
    pub len: usize,

    // State of all blocks within this piece.
    pub blocks_states: Vec<BlockState>,

    pub num_received: usize,

}

impl PieceState {

    pub fn new(idx: usize, len: usize) -> Self {
        Self {
            idx,
            len,
            blocks_states: vec![BlockState::default(); num_blocks(len) as usize],
            num_received: 0,
        }
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks_states.len()
    }

    pub fn block(&self, block_idx: usize) -> Option<BlockInfo> {
        if block_idx >= self.num_blocks() {
            return None;
        }
        Some(BlockInfo {
            piece_idx: self.idx,
            offset: block_idx * BLOCK_SIZE,
            len: block_len(self.len, block_idx),
        })
    }

    // Whether the block lines up with one of this piece's blocks.
    pub fn is_valid(&self, block: &BlockInfo) -> bool {
        block.piece_idx == self.idx
            && block.offset % BLOCK_SIZE == 0
            && block.idx_in_piece() < self.num_blocks()
            && block.len == block_len(self.len, block.idx_in_piece())
    }

    pub fn state(&self, block: &BlockInfo) -> BlockState {
        self.blocks_states[block.idx_in_piece()]
    }

    pub fn request_block(&mut self, block: &BlockInfo) {
        let state = &mut self.blocks_states[block.idx_in_piece()];
        if *state == BlockState::Needed {
            *state = BlockState::Requested;
        }
    }

    // Only a block that is still in flight goes back to needed, returns whether it did.
    pub fn free_block(&mut self, block: &BlockInfo) -> bool {
        let state = &mut self.blocks_states[block.idx_in_piece()];
        if *state == BlockState::Requested {
            *state = BlockState::Needed;
            return true;
        }
        false
    }

    // Returns whether the block is new, false for duplicates.
    pub fn received_block(&mut self, block: &BlockInfo) -> bool {
        let state = &mut self.blocks_states[block.idx_in_piece()];
        match *state {
            // Peers may send blocks we never asked them for.
            BlockState::Needed | BlockState::Requested => {
                *state = BlockState::Received;
                self.num_received += 1;
                true
            },
            BlockState::Received => false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.num_received == self.num_blocks()
    }
}
