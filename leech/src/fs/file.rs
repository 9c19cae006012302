use std::{fs, path, sync::Mutex, io::{Write, Seek, SeekFrom}};
use crate::store::FileInfo;
use super::Result;

#[derive(Debug)]
pub struct TorrentFile {

    pub info: FileInfo,

    // None once the download has closed its files.
    handle: Mutex<Option<fs::File>>,

}

impl TorrentFile {

    // Opens the file for writing, truncating anything already there.
    pub fn new(path: &path::Path, info: FileInfo) -> Result<Self> {

        if let Some(parent) = path.parent() {
            if !parent.is_dir() {
                tracing::info!("creating directory: {:?}", parent);
                fs::create_dir_all(parent)?;
            }
        }

        tracing::info!("creating file: {:?}", path);
        let handle = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            info,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Writes buf at offset, returns the number of bytes written.
    /// Writes to a closed file are skipped.
    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        let mut handle = self.handle.lock()?;
        let Some(file) = handle.as_mut() else {
            tracing::debug!("skipping write to closed file: {:?}", self.info.path);
            return Ok(0);
        };
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        Ok(buf.len())
    }

    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.handle.lock().map(|h| h.is_some()).unwrap_or(false)
    }

    // Flushes and drops the handle, closing an already closed file does nothing.
    pub fn close(&self) -> Result<()> {
        if let Some(mut file) = self.handle.lock()?.take() {
            file.flush()?;
        }
        Ok(())
    }
}
