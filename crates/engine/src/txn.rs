//! Transaction recorder
//!
//! A transaction buffers CRUD-level actions instead of applying them: the
//! store is untouched until `fin` flushes the buffered ops as one atomic
//! batch behind a single WAL barrier. `nop` discards the buffer, `pop`
//! removes the most recent action, and `status` reports on pending and
//! finished transactions alike.
//!
//! At most one transaction is active per database handle. While one is
//! active, reads consult the buffered overlay first so a transaction
//! observes its own writes.

use bri_core::id::new_id;
use bri_core::{document, ChangeEvent, Error, Result};
use bri_durability::WalOp;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, info};

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    /// Recording; actions are buffered
    Pending,
    /// Flushed to the store by `fin`
    Committed,
    /// Discarded by `nop`
    RolledBack,
}

impl fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxnStatus::Pending => write!(f, "pending"),
            TxnStatus::Committed => write!(f, "committed"),
            TxnStatus::RolledBack => write!(f, "rolled-back"),
        }
    }
}

/// One buffered CRUD-level action.
///
/// An action carries every store op the CRUD verb would have applied, the
/// event it would have broadcast, and the previous document value (enough
/// to understand what undoing it skipped).
#[derive(Debug, Clone)]
pub struct TxnAction {
    /// Store ops, in application order
    pub ops: Vec<WalOp>,
    /// Event to broadcast once committed
    pub event: ChangeEvent,
    /// Document value before this action, when one existed
    pub prev: Option<String>,
}

/// Status report for a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnStatusInfo {
    /// Transaction id (`TXN_token`)
    pub txn_id: String,
    /// Creation instant, RFC 3339
    pub created_at: String,
    /// Number of buffered (or flushed) actions
    pub action_count: usize,
    /// Lifecycle state
    pub status: TxnStatus,
}

/// What a commit flushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnSummary {
    /// Number of committed actions
    pub entries: usize,
    /// Distinct document ids touched, in first-touch order
    pub documents: Vec<String>,
    /// Distinct collection set keys touched, in first-touch order
    pub collections: Vec<String>,
}

struct Txn {
    id: String,
    created_at: String,
    actions: Vec<TxnAction>,
    overlay_docs: HashMap<String, Option<String>>,
    overlay_adds: HashMap<String, BTreeSet<String>>,
    overlay_rems: HashMap<String, BTreeSet<String>>,
}

impl Txn {
    fn new() -> Self {
        Txn {
            id: new_id("txn"),
            created_at: document::now(),
            actions: Vec::new(),
            overlay_docs: HashMap::new(),
            overlay_adds: HashMap::new(),
            overlay_rems: HashMap::new(),
        }
    }

    fn apply_to_overlay(&mut self, op: &WalOp) {
        match op {
            WalOp::Set { key, value } => {
                self.overlay_docs.insert(key.clone(), Some(value.clone()));
            }
            WalOp::Rename { old_key, new_key } => {
                let moved = self.overlay_docs.remove(old_key).flatten();
                self.overlay_docs.insert(old_key.clone(), None);
                if let Some(value) = moved {
                    self.overlay_docs.insert(new_key.clone(), Some(value));
                }
            }
            WalOp::SAdd { set_key, member } => {
                self.overlay_adds
                    .entry(set_key.clone())
                    .or_default()
                    .insert(member.clone());
                if let Some(rems) = self.overlay_rems.get_mut(set_key) {
                    rems.remove(member);
                }
            }
            WalOp::SRem { set_key, member } => {
                self.overlay_rems
                    .entry(set_key.clone())
                    .or_default()
                    .insert(member.clone());
                if let Some(adds) = self.overlay_adds.get_mut(set_key) {
                    adds.remove(member);
                }
            }
        }
    }

    fn rebuild_overlay(&mut self) {
        self.overlay_docs.clear();
        self.overlay_adds.clear();
        self.overlay_rems.clear();
        let ops: Vec<WalOp> = self
            .actions
            .iter()
            .flat_map(|action| action.ops.iter().cloned())
            .collect();
        for op in &ops {
            self.apply_to_overlay(op);
        }
    }
}

/// Per-handle transaction recorder.
#[derive(Default)]
pub struct TxnRecorder {
    active: Mutex<Option<Txn>>,
    finished: Mutex<HashMap<String, TxnStatusInfo>>,
}

impl TxnRecorder {
    /// Create an idle recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start recording. Fails while another transaction is pending.
    pub fn rec(&self) -> Result<String> {
        let mut active = self.active.lock();
        if active.is_some() {
            return Err(Error::txn_state("pending"));
        }
        let txn = Txn::new();
        let id = txn.id.clone();
        debug!(target: "bri::txn", txn_id = %id, "transaction started");
        *active = Some(txn);
        Ok(id)
    }

    /// Whether a transaction is currently recording.
    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Id of the active transaction, if any.
    pub fn active_id(&self) -> Option<String> {
        self.active.lock().as_ref().map(|txn| txn.id.clone())
    }

    /// Buffer an action into the active transaction.
    pub fn record(&self, txn_id: Option<&str>, action: TxnAction) -> Result<()> {
        let mut active = self.active.lock();
        let txn = self.resolve_mut(&mut active, txn_id)?;
        for op in &action.ops {
            txn.apply_to_overlay(op);
        }
        txn.actions.push(action);
        Ok(())
    }

    /// Commit: drain the buffer for flushing and mark the txn committed.
    ///
    /// The caller applies the returned actions to the store as a single
    /// batch and broadcasts their events.
    pub fn fin(&self, txn_id: Option<&str>) -> Result<(Vec<TxnAction>, TxnSummary)> {
        let mut active = self.active.lock();
        self.resolve_mut(&mut active, txn_id)?;
        let txn = active.take().expect("resolved txn exists");

        let mut documents = Vec::new();
        let mut collections = Vec::new();
        for action in &txn.actions {
            for op in &action.ops {
                if let Some(key) = op.doc_key() {
                    if !documents.iter().any(|d| d == key) {
                        documents.push(key.to_string());
                    }
                }
                if let Some(set_key) = op.set_key() {
                    if !collections.iter().any(|c| c == set_key) {
                        collections.push(set_key.to_string());
                    }
                }
            }
        }

        let summary = TxnSummary {
            entries: txn.actions.len(),
            documents,
            collections,
        };

        info!(
            target: "bri::txn",
            txn_id = %txn.id,
            entries = summary.entries,
            "transaction committed"
        );
        self.finished.lock().insert(
            txn.id.clone(),
            TxnStatusInfo {
                txn_id: txn.id.clone(),
                created_at: txn.created_at.clone(),
                action_count: txn.actions.len(),
                status: TxnStatus::Committed,
            },
        );

        Ok((txn.actions, summary))
    }

    /// Roll back: discard all buffered actions.
    pub fn nop(&self, txn_id: Option<&str>) -> Result<usize> {
        let mut active = self.active.lock();
        self.resolve_mut(&mut active, txn_id)?;
        let txn = active.take().expect("resolved txn exists");

        info!(
            target: "bri::txn",
            txn_id = %txn.id,
            discarded = txn.actions.len(),
            "transaction rolled back"
        );
        self.finished.lock().insert(
            txn.id.clone(),
            TxnStatusInfo {
                txn_id: txn.id.clone(),
                created_at: txn.created_at,
                action_count: 0,
                status: TxnStatus::RolledBack,
            },
        );

        Ok(txn.actions.len())
    }

    /// Remove and return the most recent buffered action.
    pub fn pop(&self, txn_id: Option<&str>) -> Result<Option<TxnAction>> {
        let mut active = self.active.lock();
        let txn = self.resolve_mut(&mut active, txn_id)?;
        let popped = txn.actions.pop();
        if popped.is_some() {
            txn.rebuild_overlay();
        }
        Ok(popped)
    }

    /// Status of the active or a finished transaction.
    pub fn status(&self, txn_id: Option<&str>) -> Result<TxnStatusInfo> {
        let active = self.active.lock();
        if let Some(txn) = active.as_ref() {
            if txn_id.is_none() || txn_id == Some(txn.id.as_str()) {
                return Ok(TxnStatusInfo {
                    txn_id: txn.id.clone(),
                    created_at: txn.created_at.clone(),
                    action_count: txn.actions.len(),
                    status: TxnStatus::Pending,
                });
            }
        }
        drop(active);

        if let Some(id) = txn_id {
            if let Some(info) = self.finished.lock().get(id) {
                return Ok(info.clone());
            }
        }
        Err(Error::txn_state("unknown"))
    }

    /// Buffered opinion about a document key.
    ///
    /// `None` — no opinion (read the store); `Some(None)` — removed inside
    /// the txn; `Some(Some(value))` — written inside the txn.
    pub fn overlay_doc(&self, key: &str) -> Option<Option<String>> {
        self.active
            .lock()
            .as_ref()
            .and_then(|txn| txn.overlay_docs.get(key).cloned())
    }

    /// Apply buffered membership deltas for a set onto a base member list.
    pub fn overlay_members(&self, set_key: &str, members: &mut BTreeSet<String>) {
        let active = self.active.lock();
        let Some(txn) = active.as_ref() else {
            return;
        };
        if let Some(rems) = txn.overlay_rems.get(set_key) {
            for member in rems {
                members.remove(member);
            }
        }
        if let Some(adds) = txn.overlay_adds.get(set_key) {
            for member in adds {
                members.insert(member.clone());
            }
        }
    }

    /// Find the pending txn, checking any explicitly passed id.
    fn resolve_mut<'a>(
        &self,
        active: &'a mut Option<Txn>,
        txn_id: Option<&str>,
    ) -> Result<&'a mut Txn> {
        match active.as_mut() {
            Some(txn) => {
                if let Some(id) = txn_id {
                    if id != txn.id {
                        let state = self
                            .finished
                            .lock()
                            .get(id)
                            .map(|info| info.status.to_string())
                            .unwrap_or_else(|| "unknown".to_string());
                        return Err(Error::txn_state(state));
                    }
                }
                Ok(txn)
            }
            None => {
                let state = txn_id
                    .and_then(|id| {
                        self.finished
                            .lock()
                            .get(id)
                            .map(|info| info.status.to_string())
                    })
                    .unwrap_or_else(|| "unknown".to_string());
                Err(Error::txn_state(state))
            }
        }
    }
}
