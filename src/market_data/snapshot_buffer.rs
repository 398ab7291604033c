use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::types::{CandleRecord, SnapshotKey};

// ---------------------------------------------------------------------------
// SnapshotBuffer -- accumulation map shared between worker and controller
// ---------------------------------------------------------------------------

/// Thread-safe map of the candles collected during one run.
///
/// The worker writes while the run is streaming.  The controller seals the
/// buffer once the worker is stopped and then copies it out, so reads never
/// race with writes that matter.
pub struct SnapshotBuffer {
    records: RwLock<BTreeMap<SnapshotKey, CandleRecord>>,
    sealed: AtomicBool,
}

impl SnapshotBuffer {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            sealed: AtomicBool::new(false),
        }
    }

    /// Store `record`, replacing any earlier record with the same symbol and
    /// timestamp.  Returns `false` if the buffer is sealed and the record was
    /// dropped.
    pub fn insert(&self, record: CandleRecord) -> bool {
        if self.sealed.load(Ordering::Acquire) {
            warn!(symbol = %record.symbol, "snapshot buffer sealed -- dropping late candle");
            return false;
        }

        let key = record.key();
        let replaced = self.records.write().insert(key.clone(), record).is_some();
        debug!(key = %key, replaced, "candle stored");
        true
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Distinct symbols that have at least one record.
    pub fn symbols(&self) -> BTreeSet<String> {
        self.records
            .read()
            .keys()
            .map(|k| k.symbol.clone())
            .collect()
    }

    /// Refuse all further inserts.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> BTreeMap<SnapshotKey, CandleRecord> {
        self.records.read().clone()
    }
}

impl Default for SnapshotBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
