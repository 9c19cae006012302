use std::{path::PathBuf, ops::Range};
use crate::metainfo::TorrentMetadata;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {

    // Path relative to the output directory.
    pub path: PathBuf,

    // Length of the file in bytes.
    pub length: u64,

    // Offset in bytes from start of torrent when viewed as single array.
    pub offset: u64,

}

impl FileInfo {
    // Byte index range for whole torrent.
    pub fn byte_range(&self) -> Range<u64> {
        self.offset..(self.offset + self.length)
    }
}

// Part of a torrent level byte range that lands in a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSlice {

    // Index into StoreInfo::files.
    pub file_idx: usize,

    // Offset within the file.
    pub offset: u64,

    // Range of the source buffer written at that offset.
    pub buf_range: Range<usize>,

}

// Contains general information on torrent storage.
#[derive(Debug, Clone)]
pub struct StoreInfo {

    // Length of torrent in bytes.
    pub total_len: u64,

    // Length of pieces in bytes.
    pub piece_len: usize,

    // Length of the last piece, will be <= piece_len.
    pub last_piece_len: usize,

    // Number of pieces in torrent.
    pub num_pieces: u32,

    // Files contained in torrent.
    pub files: Vec<FileInfo>,

    // Directory files are written to.
    pub output_dir: PathBuf,

}

impl StoreInfo {

    pub fn new(metadata: &TorrentMetadata, output_dir: PathBuf) -> Self {

        let total_len = metadata.total_len();
        let num_pieces = metadata.num_pieces();
        let piece_len = metadata.piece_len;
        let last_piece_len = total_len
            .saturating_sub(piece_len as u64 * (num_pieces as u64).saturating_sub(1)) as usize;

        let mut offset = 0;
        let files = metadata.files
            .iter()
            .map(|f| {
                let info = FileInfo { path: f.path.clone(), length: f.length, offset };
                offset += f.length;
                info
            })
            .collect();

        // Multi file torrents get a directory named after the torrent.
        let output_dir = if metadata.is_multi_file() {
            output_dir.join(&metadata.name)
        } else {
            output_dir
        };

        Self {
            total_len,
            piece_len,
            last_piece_len,
            num_pieces,
            files,
            output_dir,
        }
    }

    pub fn piece_byte_offset(&self, piece_idx: usize) -> u64 {
        piece_idx as u64 * self.piece_len as u64
    }

    pub fn file_path(&self, file_idx: usize) -> PathBuf {
        self.output_dir.join(&self.files[file_idx].path)
    }

    // Splits the torrent level range [offset, offset + len) into per file writes.
    // Bytes past the end of the torrent are not mapped.
    pub fn file_slices(&self, offset: u64, len: usize) -> Vec<FileSlice> {
        let end = offset + len as u64;
        self.files
            .iter()
            .enumerate()
            .filter_map(|(file_idx, file)| {
                let range = file.byte_range();
                let start = offset.max(range.start);
                let stop = end.min(range.end);
                if start >= stop {
                    return None;
                }
                Some(FileSlice {
                    file_idx,
                    offset: start - range.start,
                    buf_range: (start - offset) as usize..(stop - offset) as usize,
                })
            })
            .collect()
    }
}
