//! Binary storage for vector embeddings.
//!
//! File format: vectors.bin
//!
//! Header (53 bytes):
//! - magic: [u8; 4] (`MSVX`)
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u32 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Payload:
//! - `entry_count * dimensions` f32 values (little-endian), slot-major
//!
//! Trailer:
//! - checksum: u32 (CRC32 of the payload bytes)

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::semantic::index::VectorIndex;

const MAGIC: &[u8; 4] = b"MSVX";

/// Current file format version
pub const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: magic(4) + version(1) + model_id(32) + dimensions(4) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 53;
const CHECKSUMMED_HEADER: usize = HEADER_SIZE - 4;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported vector file version {0} (supported: {1})")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: vectors were produced by a different model")]
    ModelMismatch,

    #[error("Checksum mismatch in {0}: file may be corrupted")]
    ChecksumMismatch(&'static str),

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// What a vectors.bin header claims.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHeader {
    pub version: u8,
    pub model_id: [u8; 32],
    pub dimensions: usize,
    pub entry_count: usize,
}

/// Storage manager for one vectors.bin file.
pub struct VectorStorage {
    path: PathBuf,
}

impl VectorStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the vector index, verifying magic, version, model and checksums.
    pub fn load(&self, expected_model_id: &[u8; 32]) -> Result<(VectorHeader, VectorIndex), VectorStorageError> {
        let file = File::open(&self.path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader)?;
        if header.model_id != *expected_model_id {
            return Err(VectorStorageError::ModelMismatch);
        }

        let payload_len = header
            .entry_count
            .checked_mul(header.dimensions)
            .and_then(|values| values.checked_mul(4))
            .ok_or_else(|| VectorStorageError::InvalidFormat("entry count overflows".into()))?;

        // header and trailer checksum surround the payload
        let available = file_len.saturating_sub((HEADER_SIZE + 4) as u64);
        if payload_len as u64 != available {
            return Err(VectorStorageError::InvalidFormat(format!(
                "header declares {payload_len} payload bytes but the file holds {available}"
            )));
        }

        let mut payload = vec![0u8; payload_len];
        reader.read_exact(&mut payload)?;

        let mut trailer = [0u8; 4];
        reader.read_exact(&mut trailer)?;
        if u32::from_le_bytes(trailer) != crc32fast::hash(&payload) {
            return Err(VectorStorageError::ChecksumMismatch("payload"));
        }

        let mut rest = [0u8; 1];
        if reader.read(&mut rest)? != 0 {
            return Err(VectorStorageError::InvalidFormat("trailing bytes after payload".into()));
        }

        let values: Vec<f32> = payload
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        let index = VectorIndex::from_raw(header.dimensions, values)
            .map_err(|e| VectorStorageError::InvalidFormat(e.to_string()))?;

        Ok((header, index))
    }

    /// Write the index to `self.path` and fsync it.
    ///
    /// The caller owns atomicity: files are written inside a generation
    /// directory that only becomes visible once complete.
    pub fn save(&self, index: &VectorIndex, model_id: &[u8; 32]) -> Result<(), VectorStorageError> {
        let file = File::create(&self.path)?;
        let mut writer = BufWriter::new(file);

        let header = VectorHeader {
            version: FORMAT_VERSION,
            model_id: *model_id,
            dimensions: index.dimensions(),
            entry_count: index.len(),
        };
        write_header(&mut writer, &header)?;

        let mut hasher = crc32fast::Hasher::new();
        for value in index.raw() {
            let bytes = value.to_le_bytes();
            hasher.update(&bytes);
            writer.write_all(&bytes)?;
        }
        writer.write_all(&hasher.finalize().to_le_bytes())?;

        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        Ok(())
    }
}

fn read_header(reader: &mut impl Read) -> Result<VectorHeader, VectorStorageError> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            VectorStorageError::InvalidFormat("file is shorter than the header".into())
        } else {
            VectorStorageError::Io(e)
        }
    })?;

    if &header_bytes[0..4] != MAGIC {
        return Err(VectorStorageError::InvalidFormat("not a vectors file (bad magic)".into()));
    }

    let version = header_bytes[4];
    if version != FORMAT_VERSION {
        return Err(VectorStorageError::VersionMismatch(version, FORMAT_VERSION));
    }

    let stored_checksum = u32::from_le_bytes([
        header_bytes[49],
        header_bytes[50],
        header_bytes[51],
        header_bytes[52],
    ]);
    if stored_checksum != crc32fast::hash(&header_bytes[0..CHECKSUMMED_HEADER]) {
        return Err(VectorStorageError::ChecksumMismatch("header"));
    }

    let mut model_id = [0u8; 32];
    model_id.copy_from_slice(&header_bytes[5..37]);

    let dimensions = u32::from_le_bytes([
        header_bytes[37],
        header_bytes[38],
        header_bytes[39],
        header_bytes[40],
    ]);
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&header_bytes[41..49]);
    let entry_count = u64::from_le_bytes(count_bytes);

    if dimensions == 0 {
        return Err(VectorStorageError::InvalidFormat("zero dimensions".into()));
    }

    Ok(VectorHeader {
        version,
        model_id,
        dimensions: dimensions as usize,
        entry_count: usize::try_from(entry_count)
            .map_err(|_| VectorStorageError::InvalidFormat("entry count too large".into()))?,
    })
}

fn write_header(writer: &mut impl Write, header: &VectorHeader) -> Result<(), VectorStorageError> {
    let dimensions = u32::try_from(header.dimensions)
        .map_err(|_| VectorStorageError::InvalidFormat("dimensions exceed u32".into()))?;

    let mut header_bytes = [0u8; HEADER_SIZE];
    header_bytes[0..4].copy_from_slice(MAGIC);
    header_bytes[4] = header.version;
    header_bytes[5..37].copy_from_slice(&header.model_id);
    header_bytes[37..41].copy_from_slice(&dimensions.to_le_bytes());
    header_bytes[41..49].copy_from_slice(&(header.entry_count as u64).to_le_bytes());

    let checksum = crc32fast::hash(&header_bytes[0..CHECKSUMMED_HEADER]);
    header_bytes[49..53].copy_from_slice(&checksum.to_le_bytes());

    writer.write_all(&header_bytes)?;
    Ok(())
}
