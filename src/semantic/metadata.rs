//! Metadata store: slot number to originating message.
//!
//! Persisted as `metadata.json` next to `vectors.bin`. Entry `n` always
//! describes slot `n` of the vector file.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::records::MessageRecord;
use crate::semantic::cluster::Cluster;

pub const METADATA_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedMessage {
    pub slot: usize,
    #[serde(flatten)]
    pub record: MessageRecord,
    #[serde(default)]
    pub cluster_id: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataStore {
    pub format_version: u32,
    pub model: String,
    pub dimensions: usize,
    /// RFC 3339, UTC
    pub created_at: String,
    pub entries: Vec<IndexedMessage>,
    #[serde(default)]
    pub clusters: Vec<Cluster>,
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed metadata: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported metadata version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Metadata entry at position {position} claims slot {slot}")]
    SlotOutOfOrder { position: usize, slot: usize },

    #[error("Cluster {cluster_id} references slot {slot}, but only {len} slots exist")]
    ClusterMemberOutOfRange { cluster_id: usize, slot: usize, len: usize },
}

impl MetadataStore {
    /// Assign slots `0..` to `records` in order.
    pub fn new(model: &str, dimensions: usize, records: Vec<MessageRecord>) -> Self {
        let entries = records
            .into_iter()
            .enumerate()
            .map(|(slot, record)| IndexedMessage {
                slot,
                record,
                cluster_id: None,
            })
            .collect();

        Self {
            format_version: METADATA_FORMAT_VERSION,
            model: model.to_string(),
            dimensions,
            created_at: chrono::Utc::now().to_rfc3339(),
            entries,
            clusters: vec![],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, slot: usize) -> Option<&IndexedMessage> {
        self.entries.get(slot)
    }

    pub fn contents(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.record.content.as_str()).collect()
    }

    /// Replace cluster assignments. Slots not covered by any cluster end up
    /// with no `cluster_id`.
    pub fn set_clusters(&mut self, clusters: Vec<Cluster>) -> Result<(), MetadataError> {
        let len = self.entries.len();
        for entry in &mut self.entries {
            entry.cluster_id = None;
        }
        for cluster in &clusters {
            for &slot in &cluster.member_slots {
                let entry = self.entries.get_mut(slot).ok_or(MetadataError::ClusterMemberOutOfRange {
                    cluster_id: cluster.cluster_id,
                    slot,
                    len,
                })?;
                entry.cluster_id = Some(cluster.cluster_id);
            }
        }
        self.clusters = clusters;
        Ok(())
    }

    /// Check the invariants a loaded file must satisfy.
    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.format_version != METADATA_FORMAT_VERSION {
            return Err(MetadataError::UnsupportedVersion {
                found: self.format_version,
                supported: METADATA_FORMAT_VERSION,
            });
        }
        for (position, entry) in self.entries.iter().enumerate() {
            if entry.slot != position {
                return Err(MetadataError::SlotOutOfOrder {
                    position,
                    slot: entry.slot,
                });
            }
        }
        for cluster in &self.clusters {
            if let Some(&slot) = cluster.member_slots.iter().find(|&&s| s >= self.entries.len()) {
                return Err(MetadataError::ClusterMemberOutOfRange {
                    cluster_id: cluster.cluster_id,
                    slot,
                    len: self.entries.len(),
                });
            }
        }
        Ok(())
    }

    /// Write and fsync.
    pub fn save(&self, path: &Path) -> Result<(), MetadataError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let reader = BufReader::new(File::open(path)?);
        let store: Self = serde_json::from_reader(reader)?;
        store.validate()?;
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Role;

    fn record(id: &str, content: &str) -> MessageRecord {
        MessageRecord {
            content: content.to_string(),
            role: Role::User,
            conversation_id: "c1".to_string(),
            message_id: id.to_string(),
            timestamp: 1_700_000_000,
        }
    }

    fn store() -> MetadataStore {
        MetadataStore::new(
            "test-model",
            8,
            vec![record("m1", "first"), record("m2", "second"), record("m3", "third")],
        )
    }

    #[test]
    fn test_slots_follow_record_order() {
        let store = store();
        assert_eq!(store.len(), 3);
        assert_eq!(store.get(1).unwrap().record.message_id, "m2");
        assert_eq!(store.get(2).unwrap().slot, 2);
        assert!(store.get(3).is_none());
        assert_eq!(store.contents(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.json");

        let mut original = store();
        original
            .set_clusters(vec![Cluster {
                cluster_id: 0,
                keywords: vec!["first".into()],
                member_slots: vec![0, 2],
            }])
            .unwrap();
        original.save(&path).unwrap();

        let loaded = MetadataStore::load(&path).unwrap();
        assert_eq!(loaded, original);
        assert_eq!(loaded.get(0).unwrap().cluster_id, Some(0));
        assert_eq!(loaded.get(1).unwrap().cluster_id, None);
    }

    #[test]
    fn test_record_fields_are_flattened() {
        let json = serde_json::to_value(&store()).unwrap();
        let first = &json["entries"][0];
        assert_eq!(first["slot"], 0);
        assert_eq!(first["message_id"], "m1");
        assert_eq!(first["role"], "user");
        assert_eq!(first["timestamp"], 1_700_000_000);
    }

    #[test]
    fn test_out_of_order_slots_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.json");

        let mut broken = store();
        broken.entries.swap(0, 1);
        broken.save(&path).unwrap();

        assert!(matches!(
            MetadataStore::load(&path),
            Err(MetadataError::SlotOutOfOrder { position: 0, slot: 1 })
        ));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut future = store();
        future.format_version = 9;
        assert!(matches!(
            future.validate(),
            Err(MetadataError::UnsupportedVersion { found: 9, .. })
        ));
    }

    #[test]
    fn test_cluster_out_of_range_rejected() {
        let mut store = store();
        let result = store.set_clusters(vec![Cluster {
            cluster_id: 0,
            keywords: vec![],
            member_slots: vec![7],
        }]);
        assert!(matches!(result, Err(MetadataError::ClusterMemberOutOfRange { slot: 7, .. })));
    }
}
