//! Holds the currently accepted record and its signature.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::record::Record;
use crate::signature::Signature;

#[derive(Default)]
struct StoreState {
    record: Option<Arc<Record>>,
    signature: Option<Signature>,
    commits: u64,
}

/// Current record and the signature of the record that produced the rendered
/// bindings. Both are replaced together; there is no deletion.
#[derive(Default)]
pub struct RecordStore {
    state: RwLock<StoreState>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.state.read().record.is_some()
    }

    pub fn current(&self) -> Option<Arc<Record>> {
        self.state.read().record.clone()
    }

    pub fn signature(&self) -> Option<Signature> {
        self.state.read().signature.clone()
    }

    /// Number of records accepted so far.
    pub fn commits(&self) -> u64 {
        self.state.read().commits
    }

    /// Whether a record with `candidate` signature differs from the held one.
    /// An unknown signature on either side counts as changed.
    pub fn is_changed(&self, candidate: Option<&Signature>) -> bool {
        match (candidate, self.state.read().signature.as_ref()) {
            (Some(new), Some(held)) => new != held,
            _ => true,
        }
    }

    /// Accept a derived record. Returns the shared handle to it.
    pub fn commit(&self, record: Record, signature: Option<Signature>) -> Arc<Record> {
        let record = Arc::new(record);
        let mut state = self.state.write();
        state.record = Some(record.clone());
        state.signature = signature;
        state.commits += 1;
        record
    }

    /// Accept a record only if nothing was committed since `generation` (a
    /// value of [`commits`](Self::commits)). Returns `None` when another
    /// commit got there first.
    pub fn commit_if_current(
        &self,
        generation: u64,
        record: Record,
        signature: Option<Signature>,
    ) -> Option<Arc<Record>> {
        let mut state = self.state.write();
        if state.commits != generation {
            return None;
        }
        let record = Arc::new(record);
        state.record = Some(record.clone());
        state.signature = signature;
        state.commits += 1;
        Some(record)
    }
}
