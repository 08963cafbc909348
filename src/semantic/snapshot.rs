//! Immutable index snapshots and their on-disk generations.
//!
//! Layout under the store root:
//!
//! ```text
//! CURRENT                  name of the live generation
//! gen-<ulid>/vectors.bin
//! gen-<ulid>/metadata.json
//! ```
//!
//! A generation is written into a hidden `.tmp-*` directory, renamed into
//! place once complete, and only then made live by replacing `CURRENT`.
//! Readers that follow `CURRENT` therefore never see a partial build.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::records::MessageRecord;
use crate::semantic::embeddings::model_id_hash;
use crate::semantic::index::VectorIndex;
use crate::semantic::metadata::{IndexedMessage, MetadataError, MetadataStore};
use crate::semantic::storage::{VectorStorage, VectorStorageError};

const CURRENT_FILE: &str = "CURRENT";
const GENERATION_PREFIX: &str = "gen-";
const TEMP_PREFIX: &str = ".tmp-";
const VECTORS_FILE: &str = "vectors.bin";
const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No index found in {0}; run `memsearch index <log>` first")]
    NotFound(PathBuf),

    #[error("Index pointer {0} is invalid")]
    InvalidPointer(String),

    #[error("Vector file is unusable: {0}")]
    Vectors(#[from] VectorStorageError),

    #[error("Metadata file is unusable: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Index and metadata disagree: {0}")]
    Integrity(String),
}

/// A fully built index and its metadata, never mutated after construction.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    generation: String,
    index: VectorIndex,
    metadata: MetadataStore,
}

impl IndexSnapshot {
    /// Pair an index with its metadata, checking they line up.
    pub fn new(generation: String, index: VectorIndex, metadata: MetadataStore) -> Result<Self, SnapshotError> {
        if index.dimensions() != metadata.dimensions {
            return Err(SnapshotError::Integrity(format!(
                "vectors have {} dimensions, metadata says {}",
                index.dimensions(),
                metadata.dimensions
            )));
        }
        if index.len() != metadata.len() {
            return Err(SnapshotError::Integrity(format!(
                "{} vectors but {} metadata entries",
                index.len(),
                metadata.len()
            )));
        }
        Ok(Self {
            generation,
            index,
            metadata,
        })
    }

    pub fn generation(&self) -> &str {
        &self.generation
    }

    pub fn model(&self) -> &str {
        &self.metadata.model
    }

    pub fn dimensions(&self) -> usize {
        self.index.dimensions()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn entry(&self, slot: usize) -> Option<&IndexedMessage> {
        self.metadata.get(slot)
    }

    pub fn records(&self) -> impl Iterator<Item = (usize, &MessageRecord)> {
        self.metadata.entries.iter().map(|e| (e.slot, &e.record))
    }
}

/// Directory of snapshot generations.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Name of the live generation, if any.
    pub fn current_generation(&self) -> Result<Option<String>, SnapshotError> {
        let pointer = self.root.join(CURRENT_FILE);
        let name = match fs::read_to_string(&pointer) {
            Ok(name) => name.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if !is_generation_name(&name) {
            return Err(SnapshotError::InvalidPointer(pointer.display().to_string()));
        }
        Ok(Some(name))
    }

    /// Load and verify the live generation.
    pub fn load(&self) -> Result<IndexSnapshot, SnapshotError> {
        let generation = self
            .current_generation()?
            .ok_or_else(|| SnapshotError::NotFound(self.root.clone()))?;
        let dir = self.root.join(&generation);

        let metadata = MetadataStore::load(&dir.join(METADATA_FILE))?;
        let (header, index) = VectorStorage::new(dir.join(VECTORS_FILE)).load(&model_id_hash(&metadata.model))?;

        if header.entry_count != metadata.len() {
            return Err(SnapshotError::Integrity(format!(
                "vector file holds {} entries, metadata holds {}",
                header.entry_count,
                metadata.len()
            )));
        }

        let snapshot = IndexSnapshot::new(generation, index, metadata)?;
        log::debug!(
            "Loaded index generation {} ({} entries, model '{}')",
            snapshot.generation(),
            snapshot.len(),
            snapshot.model()
        );
        Ok(snapshot)
    }

    /// Write a new generation and make it live.
    ///
    /// On error nothing becomes visible and the previously live generation
    /// stays live.
    pub fn publish(&self, index: VectorIndex, metadata: MetadataStore) -> Result<IndexSnapshot, SnapshotError> {
        fs::create_dir_all(&self.root)?;
        let previous = self.current_generation().ok().flatten();

        let generation = format!("{GENERATION_PREFIX}{}", rusty_ulid::Ulid::generate());
        let staging = self.root.join(format!("{TEMP_PREFIX}{generation}"));
        let target = self.root.join(&generation);

        let snapshot = IndexSnapshot::new(generation.clone(), index, metadata)?;

        if let Err(e) = self.write_generation(&staging, &snapshot) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }
        if let Err(e) = fs::rename(&staging, &target) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e.into());
        }
        if let Err(e) = self.swap_pointer(&generation) {
            let _ = fs::remove_dir_all(&target);
            return Err(e);
        }
        log::info!("Published index generation {generation} ({} entries)", snapshot.len());

        let mut keep = vec![generation];
        keep.extend(previous);
        if let Err(e) = self.prune(&keep) {
            log::warn!("Failed to prune old index generations: {e}");
        }

        Ok(snapshot)
    }

    fn write_generation(&self, dir: &Path, snapshot: &IndexSnapshot) -> Result<(), SnapshotError> {
        fs::create_dir(dir)?;
        VectorStorage::new(dir.join(VECTORS_FILE)).save(snapshot.index(), &model_id_hash(snapshot.model()))?;
        snapshot.metadata().save(&dir.join(METADATA_FILE))?;
        sync_dir(dir)?;
        Ok(())
    }

    fn swap_pointer(&self, generation: &str) -> Result<(), SnapshotError> {
        let pointer = self.root.join(CURRENT_FILE);
        let temp = self.root.join(format!("{TEMP_PREFIX}{CURRENT_FILE}"));

        let result = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&temp)?;
            file.write_all(generation.as_bytes())?;
            file.sync_all()?;
            fs::rename(&temp, &pointer)?;
            sync_dir(&self.root)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&temp);
        }
        Ok(result?)
    }

    /// Remove generations not in `keep`, plus leftovers of interrupted builds.
    fn prune(&self, keep: &[String]) -> Result<usize, SnapshotError> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let stale = (is_generation_name(&name) && !keep.contains(&name))
                || (name.starts_with(TEMP_PREFIX) && entry.path().is_dir());
            if !stale {
                continue;
            }
            fs::remove_dir_all(entry.path())?;
            log::debug!("Removed stale index directory {name}");
            removed += 1;
        }
        Ok(removed)
    }

    /// Generation directories currently on disk, oldest first.
    pub fn generations(&self) -> Result<Vec<String>, SnapshotError> {
        let mut names = vec![];
        if !self.root.exists() {
            return Ok(names);
        }
        for entry in fs::read_dir(&self.root)? {
            let name = entry?.file_name().to_string_lossy().to_string();
            if is_generation_name(&name) {
                names.push(name);
            }
        }
        // ULIDs sort by creation time
        names.sort();
        Ok(names)
    }
}

fn is_generation_name(name: &str) -> bool {
    name.strip_prefix(GENERATION_PREFIX)
        .map(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or(false)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Role;

    fn build(model: &str, rows: &[(&str, [f32; 2])]) -> (VectorIndex, MetadataStore) {
        let mut index = VectorIndex::new(2);
        let mut records = vec![];
        for (id, v) in rows {
            index.push(v).unwrap();
            records.push(MessageRecord {
                content: format!("content of {id}"),
                role: Role::Assistant,
                conversation_id: "c".into(),
                message_id: id.to_string(),
                timestamp: 0,
            });
        }
        (index, MetadataStore::new(model, 2, records))
    }

    #[test]
    fn test_missing_index_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("index"));
        assert!(matches!(store.load(), Err(SnapshotError::NotFound(_))));
        assert!(store.current_generation().unwrap().is_none());
    }

    #[test]
    fn test_publish_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("index"));

        let (index, metadata) = build("m", &[("a", [1.0, 0.0]), ("b", [0.0, 1.0])]);
        let published = store.publish(index, metadata).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.generation(), published.generation());
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.model(), "m");
        assert_eq!(loaded.entry(1).unwrap().record.message_id, "b");
        assert_eq!(loaded.index().raw(), published.index().raw());
    }

    #[test]
    fn test_keeps_previous_generation_and_prunes_older() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("index"));

        let mut published = vec![];
        for _ in 0..3 {
            let (index, metadata) = build("m", &[("a", [1.0, 0.0])]);
            published.push(store.publish(index, metadata).unwrap().generation().to_string());
        }

        let on_disk = store.generations().unwrap();
        assert_eq!(on_disk.len(), 2);
        assert!(on_disk.contains(&published[1]));
        assert!(on_disk.contains(&published[2]));
        assert_eq!(store.current_generation().unwrap(), Some(published[2].clone()));
    }

    #[test]
    fn test_leftover_staging_is_invisible_and_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("index");
        let store = SnapshotStore::new(root.clone());

        let (index, metadata) = build("m", &[("a", [1.0, 0.0])]);
        let first = store.publish(index, metadata).unwrap();

        // an interrupted build leaves a half-written staging directory
        let staging = root.join(".tmp-gen-01INTERRUPTED");
        fs::create_dir(&staging).unwrap();
        fs::write(staging.join(VECTORS_FILE), b"MSVX partial").unwrap();

        assert_eq!(store.load().unwrap().generation(), first.generation());

        let (index, metadata) = build("m", &[("a", [1.0, 0.0]), ("b", [0.0, 1.0])]);
        store.publish(index, metadata).unwrap();
        assert!(!staging.exists());
    }

    #[test]
    fn test_count_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("index"));

        let (index, metadata) = build("m", &[("a", [1.0, 0.0]), ("b", [0.0, 1.0])]);
        let snapshot = store.publish(index, metadata).unwrap();

        // drop one metadata entry behind the store's back
        let path = store.root().join(snapshot.generation()).join(METADATA_FILE);
        let mut metadata = MetadataStore::load(&path).unwrap();
        metadata.entries.pop();
        metadata.save(&path).unwrap();

        assert!(matches!(store.load(), Err(SnapshotError::Integrity(_))));
    }

    #[test]
    fn test_model_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("index"));

        let (index, metadata) = build("m", &[("a", [1.0, 0.0])]);
        let snapshot = store.publish(index, metadata).unwrap();

        let path = store.root().join(snapshot.generation()).join(METADATA_FILE);
        let mut metadata = MetadataStore::load(&path).unwrap();
        metadata.model = "other-model".into();
        metadata.save(&path).unwrap();

        assert!(matches!(
            store.load(),
            Err(SnapshotError::Vectors(VectorStorageError::ModelMismatch))
        ));
    }

    #[test]
    fn test_bad_pointer_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("index");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join(CURRENT_FILE), "../../etc").unwrap();

        let store = SnapshotStore::new(root);
        assert!(matches!(store.load(), Err(SnapshotError::InvalidPointer(_))));
    }

    #[test]
    fn test_snapshot_rejects_mismatched_parts() {
        let (index, _) = build("m", &[("a", [1.0, 0.0])]);
        let (_, metadata) = build("m", &[("a", [1.0, 0.0]), ("b", [0.0, 1.0])]);
        assert!(matches!(
            IndexSnapshot::new("gen-X".into(), index, metadata),
            Err(SnapshotError::Integrity(_))
        ));
    }
}
