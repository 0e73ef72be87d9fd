//! Durable sync operations.

use crate::error::{StoreError, StoreResult};
use crate::kv::KeyValueStore;
use fieldsync_events::{DownSyncOperation, DownSyncPartition, Modality, UpSyncOperation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

const DOWN_PREFIX: &str = "down/";
const UP_PREFIX: &str = "up/";
const UP_SYNC_FORMAT_VERSION: u32 = 1;

/// How down-sync splits the remote log of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Partitioning {
    /// One cursor for the whole project.
    Project,
    /// One cursor for the signed-in attendant.
    User,
    /// One cursor per selected module.
    Module,
}

/// What a device down-syncs.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct DownSyncScope {
    pub project_id: String,
    pub user_id: String,
    pub module_ids: Vec<String>,
    pub modes: Vec<Modality>,
    pub partitioning: Partitioning,
}

impl DownSyncScope {
    /// Returns the partitions this scope covers.
    pub fn partitions(&self) -> Vec<DownSyncPartition> {
        match self.partitioning {
            Partitioning::Project => vec![DownSyncPartition::project(
                self.project_id.clone(),
                self.modes.clone(),
            )],
            Partitioning::User => vec![DownSyncPartition::user(
                self.project_id.clone(),
                self.user_id.clone(),
                self.modes.clone(),
            )],
            Partitioning::Module => self
                .module_ids
                .iter()
                .map(|m| DownSyncPartition::module(self.project_id.clone(), m.clone(), self.modes.clone()))
                .collect(),
        }
    }
}

/// Stored down-sync cursors, one per partition.
#[derive(Clone)]
pub struct DownSyncOperationRepository {
    kv: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for DownSyncOperationRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownSyncOperationRepository")
            .finish_non_exhaustive()
    }
}

impl DownSyncOperationRepository {
    /// Creates a repository over a key-value store.
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    fn key(partition_key: &str) -> String {
        format!("{DOWN_PREFIX}{partition_key}")
    }

    /// Loads the stored operation of a partition.
    pub fn load(&self, partition: &DownSyncPartition) -> StoreResult<Option<DownSyncOperation>> {
        match self.kv.get(&Self::key(&partition.storage_key()))? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Stores an operation, replacing the previous one of its partition.
    pub fn save(&self, operation: &DownSyncOperation) -> StoreResult<()> {
        let json = serde_json::to_string(operation)?;
        self.kv.put(&Self::key(&operation.key()), &json)
    }

    /// Returns the operations of a scope, resuming stored cursors.
    pub fn operations_for(&self, scope: &DownSyncScope) -> StoreResult<Vec<DownSyncOperation>> {
        scope
            .partitions()
            .into_iter()
            .map(|partition| {
                Ok(self
                    .load(&partition)?
                    .unwrap_or_else(|| DownSyncOperation::new(partition)))
            })
            .collect()
    }

    /// Returns every stored operation. Undecodable entries are skipped.
    pub fn load_all(&self) -> StoreResult<Vec<DownSyncOperation>> {
        Ok(self
            .kv
            .scan_prefix(DOWN_PREFIX)?
            .into_iter()
            .filter_map(|(key, json)| match serde_json::from_str(&json) {
                Ok(op) => Some(op),
                Err(err) => {
                    warn!(key = %key, error = %err, "skipping undecodable down-sync operation");
                    None
                }
            })
            .collect())
    }

    /// Forgets the cursors of the given modules of a project.
    pub fn delete_operations(&self, project_id: &str, module_ids: &[String]) -> StoreResult<usize> {
        let mut removed = 0;
        for op in self.load_all()? {
            let partition = &op.partition;
            let matches_module = partition
                .module_id
                .as_ref()
                .is_some_and(|m| module_ids.contains(m));
            if partition.project_id == project_id && matches_module {
                self.kv.remove(&Self::key(&op.key()))?;
                removed += 1;
            }
        }
        debug!(project_id, removed, "down-sync operations deleted");
        Ok(removed)
    }

    /// Forgets every cursor.
    pub fn delete_all(&self) -> StoreResult<()> {
        self.kv.remove_prefix(DOWN_PREFIX)?;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct VersionedUpSyncOperation {
    version: u32,
    operation: UpSyncOperation,
}

/// Decodes a stored up-sync operation.
///
/// Accepts the current versioned record and the older flat
/// `{"projectId":..,"lastState":..}` record. Returns `Ok(None)` when `json`
/// is not JSON at all, so the caller can fall back to a fresh operation.
///
/// # Errors
///
/// Returns `MalformedOperation` for JSON of any other shape.
pub fn decode_up_sync_operation(json: &str) -> StoreResult<Option<UpSyncOperation>> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(json) else {
        return Ok(None);
    };
    if value.get("version").is_some() {
        let record: VersionedUpSyncOperation = serde_json::from_value(value)
            .map_err(|e| StoreError::malformed_operation(e.to_string()))?;
        if record.version > UP_SYNC_FORMAT_VERSION {
            return Err(StoreError::malformed_operation(format!(
                "unsupported up-sync operation version {}",
                record.version
            )));
        }
        return Ok(Some(record.operation));
    }
    if value.get("projectId").is_some() {
        let operation: UpSyncOperation = serde_json::from_value(value)
            .map_err(|e| StoreError::malformed_operation(e.to_string()))?;
        debug!(project_id = %operation.project_id, "migrated legacy up-sync operation");
        return Ok(Some(operation));
    }
    Err(StoreError::malformed_operation(
        "neither a versioned nor a legacy up-sync operation",
    ))
}

/// Encodes an up-sync operation in the current format.
pub fn encode_up_sync_operation(operation: &UpSyncOperation) -> StoreResult<String> {
    Ok(serde_json::to_string(&VersionedUpSyncOperation {
        version: UP_SYNC_FORMAT_VERSION,
        operation: operation.clone(),
    })?)
}

/// Stored up-sync operations, one per project.
#[derive(Clone)]
pub struct UpSyncOperationRepository {
    kv: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for UpSyncOperationRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpSyncOperationRepository")
            .finish_non_exhaustive()
    }
}

impl UpSyncOperationRepository {
    /// Creates a repository over a key-value store.
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Loads the operation of a project, or a fresh one.
    ///
    /// # Errors
    ///
    /// Returns `MalformedOperation` if the stored record cannot be migrated.
    pub fn load(&self, project_id: &str) -> StoreResult<UpSyncOperation> {
        let stored = match self.kv.get(&format!("{UP_PREFIX}{project_id}"))? {
            Some(json) => decode_up_sync_operation(&json)?,
            None => None,
        };
        Ok(stored.unwrap_or_else(|| UpSyncOperation::new(project_id)))
    }

    /// Stores an operation.
    pub fn save(&self, operation: &UpSyncOperation) -> StoreResult<()> {
        let json = encode_up_sync_operation(operation)?;
        self.kv
            .put(&format!("{UP_PREFIX}{}", operation.project_id), &json)
    }

    /// Returns every stored operation that decodes.
    pub fn load_all(&self) -> StoreResult<Vec<UpSyncOperation>> {
        Ok(self
            .kv
            .scan_prefix(UP_PREFIX)?
            .into_iter()
            .filter_map(|(_, json)| decode_up_sync_operation(&json).ok().flatten())
            .collect())
    }

    /// Forgets every operation.
    pub fn delete_all(&self) -> StoreResult<()> {
        self.kv.remove_prefix(UP_PREFIX)?;
        Ok(())
    }
}
