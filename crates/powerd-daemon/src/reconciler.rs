//! The reconcile loop
//!
//! One cycle: check the advisory store lock, resynchronize the mirror against
//! the store when its configuration changed, poll every power supply, and
//! commit a status transaction only when something actually changed.

use powerd_core::{
    update_indicator, DescriptorProvider, LockState, Mirror, PsuStatus, RegisterIo, Store,
    StoreTxn,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{error, info, warn};

/// Name prefix matched against daemon rows for the hardware-ready marker
pub const DAEMON_NAME: &str = "powerd";

/// Fixed polling cadence
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// What one reconcile cycle did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Whether the cycle ran at all (false while the store lock is unavailable)
    pub ran: bool,
    /// Number of store writes staged this cycle
    pub writes: usize,
    /// Whether a transaction was committed
    pub committed: bool,
}

pub struct Reconciler {
    mirror: Arc<RwLock<Mirror>>,
    store: Arc<dyn Store>,
    registers: Arc<dyn RegisterIo>,
    provider: Arc<dyn DescriptorProvider>,
    /// Store change watermark from the last resync
    seqno: u64,
    /// Whether the one-time hardware-ready marker has been written
    cur_hw_set: bool,
    /// Suppresses repeated lock-contention errors
    lock_warned: bool,
}

impl Reconciler {
    pub fn new(
        mirror: Arc<RwLock<Mirror>>,
        store: Arc<dyn Store>,
        registers: Arc<dyn RegisterIo>,
        provider: Arc<dyn DescriptorProvider>,
    ) -> Self {
        Self {
            mirror,
            store,
            registers,
            provider,
            seqno: 0,
            cur_hw_set: false,
            lock_warned: false,
        }
    }

    /// Run cycles forever, waking on the store change notification or the
    /// polling timer, whichever fires first.
    pub async fn run(mut self) {
        let mut changes = self.store.changes();
        let mut ticker = interval(POLL_INTERVAL);
        info!(period_secs = POLL_INTERVAL.as_secs(), "reconcile loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = changes.changed() => {
                    if changed.is_err() {
                        error!("store change channel closed, stopping reconcile loop");
                        return;
                    }
                }
            }
            self.run_cycle().await;
        }
    }

    /// Execute one reconcile cycle
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        match self.store.lock_state() {
            LockState::Contended => {
                if !self.lock_warned {
                    error!(
                        "another powerd instance is running, \
                         disabling this instance until it goes away"
                    );
                    self.lock_warned = true;
                }
                return CycleOutcome::default();
            }
            LockState::NotHeld => return CycleOutcome::default(),
            LockState::Held => {
                self.lock_warned = false;
            }
        }

        let mirror = Arc::clone(&self.mirror);
        let mut mirror = mirror.write().await;
        self.reconfigure(&mut mirror);
        self.poll_and_commit(&mut mirror)
    }

    /// Handle added and removed subsystems when the store configuration
    /// changed since the last cycle.
    fn reconfigure(&mut self, mirror: &mut Mirror) {
        let seqno = self.store.seqno();
        if seqno == self.seqno {
            return;
        }
        self.seqno = seqno;

        mirror.unmark_all();
        for row in self.store.subsystems() {
            match mirror.sync_subsystem(
                &row,
                self.provider.as_ref(),
                self.registers.as_ref(),
                self.store.as_ref(),
            ) {
                Ok(()) => {
                    mirror.mark(&row.name);
                    if let Some(subsystem) = mirror.get_mut(&row.name) {
                        update_indicator(subsystem, self.registers.as_ref());
                    }
                }
                Err(e) => {
                    warn!(
                        subsystem = %row.name,
                        error = %e,
                        "subsystem not synchronized this cycle"
                    );
                }
            }
        }

        for name in mirror.sweep_unmarked() {
            info!(subsystem = %name, "removed subsystem no longer present in the store");
        }
    }

    /// Poll every power supply and commit status changes to the store
    fn poll_and_commit(&mut self, mirror: &mut Mirror) -> CycleOutcome {
        mirror.poll_all(self.registers.as_ref());

        let mut txn = StoreTxn::new();
        for row in self.store.power_supplies() {
            match mirror.psu(&row.name) {
                None => {
                    warn!(psu = %row.name, "no matching power supply for store row");
                    txn.set_psu_status(&row.name, PsuStatus::Ok);
                }
                Some(psu) if psu.status != row.status => {
                    txn.set_psu_status(&row.name, psu.status);
                }
                Some(_) => {}
            }
        }

        // First successful cycle: raise the hardware-ready marker
        if !self.cur_hw_set {
            for daemon in self.store.daemons() {
                if daemon.name.starts_with(DAEMON_NAME) {
                    txn.set_daemon_cur_hw(&daemon.name, 1);
                    self.cur_hw_set = true;
                    break;
                }
            }
        }

        let writes = txn.len();
        let committed = if txn.is_empty() {
            false
        } else {
            match self.store.commit(txn) {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "failed to commit status transaction");
                    false
                }
            }
        };

        CycleOutcome {
            ran: true,
            writes,
            committed,
        }
    }
}
