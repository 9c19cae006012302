use std::path::{Path, PathBuf};
use serde_bencode::value::Value;
use serde_derive::Deserialize;
use sha1::Digest;
use url::Url;
use crate::ID;

#[derive(Debug, thiserror::Error)]
pub enum MetaInfoError {

    #[error("bencode error whilst decoding metainfo: {0}")]
    BencodeError(#[from] serde_bencode::Error),

    #[error("invalid file extension, expected .torrent")]
    InvalidExtension,

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("invalid pieces length, must be divisible by 20")]
    InvalidPiecesLength,

    #[error("missing info dictionary")]
    MissingInfo,

    #[error("torrent has neither a length nor a file list")]
    NoFiles,

    #[error("piece length must be greater than 0")]
    InvalidPieceLength,

    #[error("file(s) with no path")]
    FileEmptyPath,

    #[error("file path escapes the download directory")]
    FileInvalidPath,

    #[error("expected {expected} piece hashes for the torrent's length, got {got}")]
    PieceCountMismatch { expected: u64, got: u64 },
}

// A single file within a torrent, path is relative to the download directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {

    pub path: PathBuf,

    pub length: u64,

}

/// Read-only description of a torrent, everything the engine needs to download it.
///
/// Built either by hand or from a `.torrent` file with [`MetaInfo`].
#[derive(Clone)]
pub struct TorrentMetadata {

    // SHA1 of the bencoded info dict.
    pub info_hash: ID,

    // Name of the file, or of the containing directory for multi file torrents.
    pub name: String,

    // Number of bytes in each piece, the last piece may be shorter.
    pub piece_len: usize,

    pub piece_hashes: Vec<[u8; 20]>,

    // Files in the order they appear in the torrent's byte stream.
    pub files: Vec<File>,

    // Tracker urls, in priority order.
    pub announce: Vec<Url>,

    pub multi_file: bool,

}

impl TorrentMetadata {

    pub fn total_len(&self) -> u64 { self.files.iter().map(|f| f.length).sum() }

    pub fn num_pieces(&self) -> u32 { self.piece_hashes.len() as u32 }

    pub fn is_multi_file(&self) -> bool { self.multi_file }

    pub fn info_hash_hex(&self) -> String { hex::encode(self.info_hash) }

}

#[cfg(test)]
impl TorrentMetadata {
    // Metadata with zeroed hashes, one piece hash per started piece.
    pub(crate) fn for_test(name: &str, piece_len: usize, files: &[(&str, u64)]) -> Self {
        let total_len: u64 = files.iter().map(|(_, len)| len).sum();
        let num_pieces = ((total_len + piece_len as u64 - 1) / piece_len as u64) as usize;
        Self {
            info_hash: [0xaa; 20],
            name: name.to_string(),
            piece_len,
            piece_hashes: vec![[0; 20]; num_pieces],
            files: files
                .iter()
                .map(|(path, length)| File { path: PathBuf::from(path), length: *length })
                .collect(),
            announce: Vec::new(),
            multi_file: files.len() > 1,
        }
    }
}

impl std::fmt::Debug for TorrentMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TorrentMetadata")
            .field("info_hash", &self.info_hash_hex())
            .field("name", &self.name)
            .field("piece_len", &self.piece_len)
            .field("num_pieces", &self.piece_hashes.len())
            .field("files", &self.files)
            .field("announce", &self.announce.iter().map(|u| u.as_str()).collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
struct FileDict {

    // A list containing one or more string elements that together represent the path and filename.
    #[serde(deserialize_with = "crate::de::path_deserialize")]
    path: PathBuf,

    // Length of the file in bytes.
    length: u64,

}

#[derive(Clone, Deserialize)]
struct Info {

    name: String,

    // String consisting of the concatenation of all 20-byte SHA1 hash values, one per piece.
    #[serde(with = "serde_bytes")]
    pieces: Vec<u8>,

    #[serde(rename = "piece length")]
    piece_length: u64,

    // Single file torrents.
    #[serde(default)]
    length: Option<u64>,

    // Multi file torrents.
    #[serde(default)]
    files: Option<Vec<FileDict>>,

}

/// Contents of a `.torrent` file.
#[derive(Clone, Deserialize)]
pub struct MetaInfo {

    #[serde(default)]
    #[serde(deserialize_with = "crate::de::url_deserialize")]
    announce: Option<Url>,

    info: Info,

    #[serde(skip)]
    info_hash: ID,

    #[serde(default)]
    #[serde(rename = "announce-list")]
    #[serde(deserialize_with = "crate::de::announce_list_deserialize")]
    announce_list: Option<Vec<Vec<Url>>>,

    #[serde(default)]
    #[serde(rename = "creation date")]
    creation_date: Option<i64>,

    #[serde(default)]
    comment: Option<String>,

    #[serde(default)]
    #[serde(rename = "created by")]
    created_by: Option<String>,

}

impl MetaInfo {

    pub fn new<P: AsRef<Path>>(path: P) -> Result<MetaInfo, MetaInfoError> {

        if path.as_ref().extension().unwrap_or_default() != "torrent" {
            return Err(MetaInfoError::InvalidExtension);
        }
        Self::from_bytes(&std::fs::read(path)?)
    }

    pub fn from_bytes(raw: &[u8]) -> Result<MetaInfo, MetaInfoError> {

        let mut metainfo: MetaInfo = serde_bencode::from_bytes(raw)?;

        if metainfo.info.pieces.len() % 20 != 0 || metainfo.info.pieces.is_empty() {
            return Err(MetaInfoError::InvalidPiecesLength);
        }
        if metainfo.info.piece_length == 0 {
            return Err(MetaInfoError::InvalidPieceLength);
        }
        if metainfo.info.length.is_none() && metainfo.info.files.as_ref().map_or(true, |f| f.is_empty()) {
            return Err(MetaInfoError::NoFiles);
        }

        // An empty torrent still carries one hash.
        let total_len: u64 = metainfo.files().iter().map(|f| f.length).sum();
        let expected = total_len.div_ceil(metainfo.info.piece_length).max(1);
        let got = (metainfo.info.pieces.len() / 20) as u64;
        if got != expected {
            return Err(MetaInfoError::PieceCountMismatch { expected, got });
        }

        metainfo.info_hash = info_hash(raw)?;
        tracing::debug!("metainfo created: {:?}", metainfo);
        Ok(metainfo)
    }

    pub fn info_hash(&self) -> ID { self.info_hash }

    pub fn name(&self) -> &str { &self.info.name }

    pub fn is_multi_file(&self) -> bool { self.info.files.is_some() }

    pub fn piece_hashes(&self) -> Vec<[u8; 20]> {
        self.info.pieces
            .chunks_exact(20)
            .map(|c| {
                let mut hash = [0; 20];
                hash.copy_from_slice(c);
                hash
            })
            .collect()
    }

    // Announce list tiers flattened, falling back to the announce key.
    pub fn trackers(&self) -> Vec<Url> {
        match &self.announce_list {
            Some(tiers) => tiers.iter().flatten().cloned().collect(),
            None => self.announce.iter().cloned().collect(),
        }
    }

    pub fn files(&self) -> Vec<File> {
        match (&self.info.files, self.info.length) {
            (Some(files), _) => files
                .iter()
                .map(|f| File { path: f.path.clone(), length: f.length })
                .collect(),
            (None, length) => vec![File {
                path: PathBuf::from(&self.info.name),
                length: length.unwrap_or(0),
            }],
        }
    }

    pub fn creation_date_fmt(&self) -> Option<String> {
        self.creation_date.map(|v| {
            chrono::DateTime::<chrono::Utc>::from_timestamp(v, 0)
                .map(|v| v.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "Invalid date".to_string())
        })
    }

    pub fn into_metadata(self) -> TorrentMetadata {
        TorrentMetadata {
            info_hash: self.info_hash,
            piece_len: self.info.piece_length as usize,
            piece_hashes: self.piece_hashes(),
            files: self.files(),
            announce: self.trackers(),
            multi_file: self.is_multi_file(),
            name: self.info.name,
        }
    }
}

// The info hash is taken over the info dict exactly as it appears in the file,
// re-encoding a generic value keeps unknown keys and bencode's sorted key order.
fn info_hash(raw: &[u8]) -> Result<ID, MetaInfoError> {
    let info = match serde_bencode::from_bytes::<Value>(raw)? {
        Value::Dict(mut dict) => dict.remove(&b"info"[..]).ok_or(MetaInfoError::MissingInfo)?,
        _ => return Err(MetaInfoError::MissingInfo),
    };
    let encoded = serde_bencode::to_bytes(&info)?;
    let mut hasher = sha1::Sha1::new();
    hasher.update(&encoded);
    Ok(hasher.finalize().into())
}

impl std::fmt::Debug for MetaInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaInfo")
            .field("name", &self.info.name)
            .field("info_hash", &hex::encode(self.info_hash))
            .field("num_pieces", &(self.info.pieces.len() / 20))
            .field("piece_length", &self.info.piece_length)
            .field("trackers", &self.trackers().iter().map(|u| u.as_str()).collect::<Vec<_>>())
            .field("creation_date", &self.creation_date_fmt())
            .field("comment", &self.comment)
            .field("created_by", &self.created_by)
            .finish()
    }
}
