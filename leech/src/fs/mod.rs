use std::sync::Arc;
use tokio::task;
use crate::{block::BlockData, store::StoreInfo};

mod file;

pub use file::TorrentFile;

#[derive(thiserror::Error, Debug)]
pub enum DiskError {

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("sync error: {0}")]
    SyncError(String),

    #[error("write task failed: {0}")]
    JoinError(#[from] task::JoinError),

}

impl<T> From<std::sync::PoisonError<T>> for DiskError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        DiskError::SyncError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DiskError>;

/// Every output file of a download, opened up front.
#[derive(Debug)]
pub struct OutputFiles {

    info: StoreInfo,

    files: Vec<TorrentFile>,

}

impl OutputFiles {

    pub fn new(info: StoreInfo) -> Result<Self> {

        if !info.output_dir.is_dir() {
            std::fs::create_dir_all(&info.output_dir)?;
            tracing::info!("created missing output directory: {:?}", info.output_dir);
        }

        let files = info.files
            .iter()
            .enumerate()
            .map(|(idx, file)| TorrentFile::new(&info.file_path(idx), file.clone()))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { info, files })
    }

    /// How many bytes of the block land in each file, by file index.
    pub fn file_bytes(&self, block: &BlockData) -> Vec<(usize, u64)> {
        self.info
            .file_slices(self.block_offset(block), block.data.len())
            .into_iter()
            .map(|slice| (slice.file_idx, slice.buf_range.len() as u64))
            .collect()
    }

    fn block_offset(&self, block: &BlockData) -> u64 {
        self.info.piece_byte_offset(block.piece_idx) + block.offset as u64
    }

    /// Writes a block at its absolute torrent offset, split across file
    /// boundaries, on the blocking thread pool.
    pub async fn write_block(self: &Arc<Self>, block: BlockData) -> Result<()> {
        let files = Arc::clone(self);
        task::spawn_blocking(move || files.write_block_sync(&block)).await?
    }

    fn write_block_sync(&self, block: &BlockData) -> Result<()> {
        tracing::trace!("write block offset {} in piece {}", block.offset, block.piece_idx);
        for slice in self.info.file_slices(self.block_offset(block), block.data.len()) {
            self.files[slice.file_idx].write_at(slice.offset, &block.data[slice.buf_range])?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.files.iter().all(|f| !f.is_open())
    }

    // Safe to call more than once.
    pub fn close_all(&self) -> Result<()> {
        for file in self.files.iter() {
            file.close()?;
        }
        Ok(())
    }
}
