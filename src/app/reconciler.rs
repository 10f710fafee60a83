//! Result reconciliation
//!
//! The reconciler owns the keyed view of a batch run. Every decoded event is
//! applied as an idempotent upsert, so redelivered, duplicated, or
//! out-of-order results never produce a second record for the same item.
//! Records keep the order in which their key was first seen; for submitted
//! items that is submission order.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::app::models::{
    BatchItem, EventKind, RecordOrigin, RecordStatus, ResultPayload, ResultRecord, WireEvent,
};
use crate::constants::wire;
use crate::errors::{PipelineError, PipelineResult, ReconcileError, ReconcileResult};

/// Insertion-ordered map of `item_id -> ResultRecord`
#[derive(Debug, Clone, Default)]
pub struct ReconciledStore {
    records: Vec<ResultRecord>,
    index: HashMap<String, usize>,
}

impl ReconciledStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.index.contains_key(item_id)
    }

    pub fn get(&self, item_id: &str) -> Option<&ResultRecord> {
        self.index.get(item_id).map(|&idx| &self.records[idx])
    }

    fn get_mut(&mut self, item_id: &str) -> Option<&mut ResultRecord> {
        match self.index.get(item_id) {
            Some(&idx) => self.records.get_mut(idx),
            None => None,
        }
    }

    /// Add a record under a new key; returns false if the key exists
    fn insert(&mut self, record: ResultRecord) -> bool {
        if self.index.contains_key(&record.item_id) {
            return false;
        }
        self.index.insert(record.item_id.clone(), self.records.len());
        self.records.push(record);
        true
    }

    /// Records in first-seen order
    pub fn iter(&self) -> impl Iterator<Item = &ResultRecord> {
        self.records.iter()
    }

    pub fn records(&self) -> &[ResultRecord] {
        &self.records
    }

    /// Number of submitted records with the given status
    pub fn count_submitted(&self, status: RecordStatus) -> usize {
        self.records
            .iter()
            .filter(|r| r.is_submitted() && r.status == status)
            .count()
    }

    /// Number of records that were never submitted
    pub fn count_unmatched(&self) -> usize {
        self.records.iter().filter(|r| !r.is_submitted()).count()
    }

    /// Number of submitted records
    pub fn submitted(&self) -> usize {
        self.records.iter().filter(|r| r.is_submitted()).count()
    }

    fn clear(&mut self) {
        self.records.clear();
        self.index.clear();
    }
}

/// Data-quality problem noticed while reconciling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataAnomaly {
    /// A result carried no id and was stored under a fallback key
    SyntheticId { assigned: String },
    /// A result payload matched none of the known shapes
    MalformedPayload { reason: String },
    /// A result or error referenced an item that was never submitted
    UnknownItem { item_id: String },
    /// A terminal record received a different terminal status
    ConflictingStatus {
        item_id: String,
        kept: RecordStatus,
        incoming: RecordStatus,
    },
}

impl std::fmt::Display for DataAnomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataAnomaly::SyntheticId { assigned } => {
                write!(f, "result without id stored as '{}'", assigned)
            }
            DataAnomaly::MalformedPayload { reason } => write!(f, "{}", reason),
            DataAnomaly::UnknownItem { item_id } => {
                write!(f, "result for unsubmitted item '{}'", item_id)
            }
            DataAnomaly::ConflictingStatus {
                item_id,
                kept,
                incoming,
            } => write!(
                f,
                "item '{}' already {}, ignored {} update",
                item_id, kept, incoming
            ),
        }
    }
}

/// Effect of applying one event
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// A new record was created
    Inserted { item_id: String },
    /// An existing record was updated
    Updated { item_id: String },
    /// Batch summary metadata was stored
    Summary,
    /// One item was marked failed by a scoped error
    ItemFailed { item_id: String },
    /// The whole batch failed
    BatchFailed { message: String },
    /// The end frame arrived; the store is frozen
    Finished,
    /// Nothing to do (keepalive)
    Ignored,
}

impl Applied {
    /// Whether this event ends the run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Applied::Finished | Applied::BatchFailed { .. })
    }
}

/// Applies wire events to the store of one batch run
#[derive(Debug, Default)]
pub struct ResultReconciler {
    store: ReconciledStore,
    summary: Option<Value>,
    batch_error: Option<String>,
    frozen: bool,
    synthetic_counter: u64,
    anomalies: Vec<DataAnomaly>,
}

impl ResultReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset and seed one pending record per submitted item
    ///
    /// # Errors
    ///
    /// `InvalidBatch` for an empty batch, an empty id, or a duplicate id
    pub fn seed(&mut self, items: &[BatchItem]) -> PipelineResult<()> {
        *self = Self::default();

        if items.is_empty() {
            return Err(PipelineError::InvalidBatch {
                reason: "batch contains no items".to_string(),
            });
        }

        for (position, item) in items.iter().enumerate() {
            if item.id.trim().is_empty() {
                self.store.clear();
                return Err(PipelineError::InvalidBatch {
                    reason: format!("item at position {} has an empty id", position),
                });
            }
            if !self.store.insert(ResultRecord::pending(item.id.clone())) {
                self.store.clear();
                return Err(PipelineError::InvalidBatch {
                    reason: format!("duplicate item id '{}'", item.id),
                });
            }
        }

        debug!("Seeded reconciler with {} items", items.len());
        Ok(())
    }

    /// Apply one event
    ///
    /// # Errors
    ///
    /// - `Frozen` once the end frame or a batch error has been applied
    /// - `MalformedPayload` for a result payload of unknown shape; the
    ///   problem is also recorded as an anomaly
    pub fn apply(&mut self, event: WireEvent) -> ReconcileResult<Applied> {
        if event.kind == EventKind::Keepalive {
            return Ok(Applied::Ignored);
        }
        if self.frozen {
            return Err(ReconcileError::Frozen);
        }

        match event.kind {
            EventKind::Result => self.apply_result(event.payload),
            EventKind::Summary => {
                self.apply_summary(event.payload);
                Ok(Applied::Summary)
            }
            EventKind::Error => Ok(self.apply_error(&event)),
            EventKind::End => {
                self.frozen = true;
                info!("End of batch received; result store frozen");
                Ok(Applied::Finished)
            }
            EventKind::Keepalive => Ok(Applied::Ignored),
        }
    }

    fn apply_result(&mut self, payload: Value) -> ReconcileResult<Applied> {
        let decoded = match ResultPayload::decode(payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Discarding result: {}", e);
                self.anomalies.push(DataAnomaly::MalformedPayload {
                    reason: e.to_string(),
                });
                return Err(e.into());
            }
        };

        let (item_id, origin) = match decoded.item_id {
            Some(id) => (id, RecordOrigin::Unsolicited),
            None => {
                let assigned = self.next_synthetic_id();
                warn!("Result carried no item id; stored as '{}'", assigned);
                self.anomalies.push(DataAnomaly::SyntheticId {
                    assigned: assigned.clone(),
                });
                (assigned, RecordOrigin::Synthetic)
            }
        };

        if let Some(record) = self.store.get_mut(&item_id) {
            record.merge_payload(decoded.fields);
            record.deliveries += 1;
            record.received_at = Utc::now();
            match record.status {
                RecordStatus::Pending => record.status = RecordStatus::Completed,
                RecordStatus::Completed => {
                    debug!("Merged redelivered result for '{}'", item_id);
                }
                RecordStatus::Failed => {
                    warn!("Result for '{}' arrived after it failed", item_id);
                    self.anomalies.push(DataAnomaly::ConflictingStatus {
                        item_id: item_id.clone(),
                        kept: RecordStatus::Failed,
                        incoming: RecordStatus::Completed,
                    });
                }
            }
            return Ok(Applied::Updated { item_id });
        }

        if origin == RecordOrigin::Unsolicited {
            warn!("Result for unsubmitted item '{}'", item_id);
            self.anomalies.push(DataAnomaly::UnknownItem {
                item_id: item_id.clone(),
            });
        }

        let mut record = ResultRecord::pending(item_id.clone());
        record.origin = origin;
        record.status = RecordStatus::Completed;
        record.deliveries = 1;
        record.merge_payload(decoded.fields);
        self.store.insert(record);
        Ok(Applied::Inserted { item_id })
    }

    fn apply_summary(&mut self, payload: Value) {
        match (&mut self.summary, payload) {
            (Some(Value::Object(existing)), Value::Object(update)) => {
                for (key, value) in update {
                    existing.insert(key, value);
                }
            }
            (slot, payload) => *slot = Some(payload),
        }
        debug!("Stored batch summary");
    }

    fn apply_error(&mut self, event: &WireEvent) -> Applied {
        let message = event.error_message();

        let item_id = match event.error_scope() {
            Some(item_id) => item_id,
            None => {
                warn!("Server reported batch error: {}", message);
                self.batch_error = Some(message.clone());
                self.frozen = true;
                return Applied::BatchFailed { message };
            }
        };

        warn!("Server reported error for '{}': {}", item_id, message);
        match self.store.get_mut(&item_id) {
            Some(record) => match record.status {
                RecordStatus::Completed => {
                    self.anomalies.push(DataAnomaly::ConflictingStatus {
                        item_id: item_id.clone(),
                        kept: RecordStatus::Completed,
                        incoming: RecordStatus::Failed,
                    });
                }
                RecordStatus::Pending | RecordStatus::Failed => {
                    record.status = RecordStatus::Failed;
                    record.error = Some(message);
                    record.received_at = Utc::now();
                }
            },
            None => {
                self.anomalies.push(DataAnomaly::UnknownItem {
                    item_id: item_id.clone(),
                });
                let mut record = ResultRecord::pending(item_id.clone());
                record.origin = RecordOrigin::Unsolicited;
                record.status = RecordStatus::Failed;
                record.error = Some(message);
                self.store.insert(record);
            }
        }
        Applied::ItemFailed { item_id }
    }

    fn next_synthetic_id(&mut self) -> String {
        loop {
            self.synthetic_counter += 1;
            let candidate = format!("{}{}", wire::SYNTHETIC_ID_PREFIX, self.synthetic_counter);
            if !self.store.contains(&candidate) {
                return candidate;
            }
        }
    }

    /// Stop accepting mutations without an end frame
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn store(&self) -> &ReconciledStore {
        &self.store
    }

    pub fn summary(&self) -> Option<&Value> {
        self.summary.as_ref()
    }

    /// Message of the batch-level error, if one was applied
    pub fn batch_error(&self) -> Option<&str> {
        self.batch_error.as_deref()
    }

    pub fn anomalies(&self) -> &[DataAnomaly] {
        &self.anomalies
    }

    /// Submitted items still awaiting a result, in submission order
    pub fn pending_ids(&self) -> Vec<String> {
        self.store
            .iter()
            .filter(|r| r.is_submitted() && r.status == RecordStatus::Pending)
            .map(|r| r.item_id.clone())
            .collect()
    }
}
