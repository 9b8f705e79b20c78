//! State store contract and the in-process implementation
//!
//! The store holds the externally visible configuration and state rows:
//! subsystems (read by powerd), power supplies (created and updated by
//! powerd), and daemon rows (the one-time hardware-ready marker). A
//! transaction collects writes and applies them atomically on commit.
//!
//! An advisory lock guards against a peer daemon instance mutating the same
//! store; while the lock is contended the daemon must not write.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;

use crate::status::PsuStatus;

/// Subsystem row: configuration input for powerd
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsystemRow {
    pub name: String,
    /// Hardware description directory; empty when not provisioned
    pub hw_desc_dir: String,
}

/// Power supply row: created and kept current by powerd
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsuRow {
    pub name: String,
    pub status: PsuStatus,
}

/// Daemon row: carries the one-time hardware-ready marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonRow {
    pub name: String,
    pub cur_hw: i64,
}

/// Advisory lock status for this daemon instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// This instance holds the lock and may mutate the store
    Held,
    /// A peer instance holds the lock
    Contended,
    /// The lock has not been acquired
    NotHeld,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store lock not held")]
    LockNotHeld,
}

/// One write within a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
enum TxnWrite {
    UpsertPsu { name: String, status: PsuStatus },
    SetPsuStatus { name: String, status: PsuStatus },
    SetSubsystemPsus { name: String, psus: Vec<String> },
    SetDaemonCurHw { name: String, cur_hw: i64 },
}

/// A write-set applied atomically on commit, or simply dropped
#[derive(Debug, Default)]
pub struct StoreTxn {
    writes: Vec<TxnWrite>,
}

impl StoreTxn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Create the power supply row, or refresh its status if it exists
    pub fn upsert_psu(&mut self, name: &str, status: PsuStatus) {
        self.writes.push(TxnWrite::UpsertPsu {
            name: name.to_string(),
            status,
        });
    }

    /// Update the status of an existing power supply row
    pub fn set_psu_status(&mut self, name: &str, status: PsuStatus) {
        self.writes.push(TxnWrite::SetPsuStatus {
            name: name.to_string(),
            status,
        });
    }

    /// Set the ordered power supply reference list of a subsystem row
    pub fn set_subsystem_psus(&mut self, name: &str, psus: Vec<String>) {
        self.writes.push(TxnWrite::SetSubsystemPsus {
            name: name.to_string(),
            psus,
        });
    }

    /// Set the hardware-ready marker on a daemon row
    pub fn set_daemon_cur_hw(&mut self, name: &str, cur_hw: i64) {
        self.writes.push(TxnWrite::SetDaemonCurHw {
            name: name.to_string(),
            cur_hw,
        });
    }
}

/// The transactional state store, as seen by the reconciler.
///
/// `seqno`/`changed` report external configuration changes only; the
/// daemon's own commits do not re-notify it (the columns powerd writes are
/// alert-omitted, matching the original store client setup).
pub trait Store: Send + Sync {
    /// Change sequence number for externally visible configuration
    fn seqno(&self) -> u64;
    /// Watch receiver observing `seqno` changes
    fn changes(&self) -> watch::Receiver<u64>;
    /// Current advisory lock status
    fn lock_state(&self) -> LockState;

    fn subsystems(&self) -> Vec<SubsystemRow>;
    fn power_supplies(&self) -> Vec<PsuRow>;
    fn daemons(&self) -> Vec<DaemonRow>;

    /// Apply a transaction atomically. Empty transactions are a no-op.
    fn commit(&self, txn: StoreTxn) -> Result<(), StoreError>;
}

#[derive(Debug)]
struct MemoryStoreInner {
    subsystems: Vec<SubsystemRow>,
    subsystem_psus: HashMap<String, Vec<String>>,
    psus: Vec<PsuRow>,
    daemons: Vec<DaemonRow>,
    seqno: u64,
    lock: LockState,
}

#[derive(Debug)]
struct MemoryStoreShared {
    inner: Mutex<MemoryStoreInner>,
    changes: watch::Sender<u64>,
}

/// In-process store used by the shipped daemon and the test suite.
///
/// The configuration side (`add_subsystem`, `remove_subsystem`, `add_daemon`)
/// stands in for the external provisioning agent and bumps the change
/// sequence number; committed daemon writes do not.
#[derive(Debug, Clone)]
pub struct MemoryStore(Arc<MemoryStoreShared>);

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self(Arc::new(MemoryStoreShared {
            inner: Mutex::new(MemoryStoreInner {
                subsystems: Vec::new(),
                subsystem_psus: HashMap::new(),
                psus: Vec::new(),
                daemons: Vec::new(),
                seqno: 0,
                lock: LockState::Held,
            }),
            changes,
        }))
    }

    /// Add or replace a subsystem row (external configuration change)
    pub fn add_subsystem(&self, name: &str, hw_desc_dir: &str) {
        let mut inner = self.0.inner.lock().unwrap();
        inner.subsystems.retain(|s| s.name != name);
        inner.subsystems.push(SubsystemRow {
            name: name.to_string(),
            hw_desc_dir: hw_desc_dir.to_string(),
        });
        self.bump(&mut inner);
    }

    /// Remove a subsystem row (external configuration change).
    ///
    /// Power supply rows referenced only by the removed subsystem are
    /// collected with it, as in a reference-tracked store.
    pub fn remove_subsystem(&self, name: &str) {
        let mut inner = self.0.inner.lock().unwrap();
        inner.subsystems.retain(|s| s.name != name);
        if let Some(orphaned) = inner.subsystem_psus.remove(name) {
            inner.psus.retain(|p| !orphaned.contains(&p.name));
        }
        self.bump(&mut inner);
    }

    /// Add a daemon row with `cur_hw = 0`
    pub fn add_daemon(&self, name: &str) {
        let mut inner = self.0.inner.lock().unwrap();
        inner.daemons.push(DaemonRow {
            name: name.to_string(),
            cur_hw: 0,
        });
        self.bump(&mut inner);
    }

    /// Force the advisory lock state (peer contention in tests)
    pub fn set_lock_state(&self, lock: LockState) {
        self.0.inner.lock().unwrap().lock = lock;
    }

    /// Power supply reference list recorded for a subsystem
    pub fn subsystem_psus(&self, name: &str) -> Vec<String> {
        self.0
            .inner
            .lock()
            .unwrap()
            .subsystem_psus
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    fn bump(&self, inner: &mut MemoryStoreInner) {
        inner.seqno += 1;
        let _ = self.0.changes.send(inner.seqno);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn seqno(&self) -> u64 {
        self.0.inner.lock().unwrap().seqno
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.0.changes.subscribe()
    }

    fn lock_state(&self) -> LockState {
        self.0.inner.lock().unwrap().lock
    }

    fn subsystems(&self) -> Vec<SubsystemRow> {
        self.0.inner.lock().unwrap().subsystems.clone()
    }

    fn power_supplies(&self) -> Vec<PsuRow> {
        self.0.inner.lock().unwrap().psus.clone()
    }

    fn daemons(&self) -> Vec<DaemonRow> {
        self.0.inner.lock().unwrap().daemons.clone()
    }

    fn commit(&self, txn: StoreTxn) -> Result<(), StoreError> {
        if txn.is_empty() {
            return Ok(());
        }

        let mut inner = self.0.inner.lock().unwrap();
        if inner.lock != LockState::Held {
            return Err(StoreError::LockNotHeld);
        }

        for write in txn.writes {
            match write {
                TxnWrite::UpsertPsu { name, status } => {
                    if let Some(row) = inner.psus.iter_mut().find(|p| p.name == name) {
                        row.status = status;
                    } else {
                        inner.psus.push(PsuRow { name, status });
                    }
                }
                TxnWrite::SetPsuStatus { name, status } => {
                    if let Some(row) = inner.psus.iter_mut().find(|p| p.name == name) {
                        row.status = status;
                    }
                }
                TxnWrite::SetSubsystemPsus { name, psus } => {
                    inner.subsystem_psus.insert(name, psus);
                }
                TxnWrite::SetDaemonCurHw { name, cur_hw } => {
                    if let Some(row) = inner.daemons.iter_mut().find(|d| d.name == name) {
                        row.cur_hw = cur_hw;
                    }
                }
            }
        }
        Ok(())
    }
}
