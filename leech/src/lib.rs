mod config;
mod metainfo;
mod tracker;
mod p2p;
mod fs;
mod block;
mod picker;
mod store;
mod de;
mod manager;
pub mod stats;

// Most commonly used block size - 16KB.
const BLOCK_SIZE: usize = 0x4000;

type Bitfield = bitvec::vec::BitVec<u8, bitvec::order::Msb0>;

// 20 byte SHA1 info hash.
pub type ID = [u8; 20];

// Re-exports
pub use config::Config;
pub use metainfo::{File, MetaInfo, MetaInfoError, TorrentMetadata};
pub use manager::{start_download, DownloadError, Handle};
pub use stats::{DownloadSnapshot, Status};
pub use p2p::state::ConnState;
