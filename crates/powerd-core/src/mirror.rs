//! In-memory mirror of subsystems and their power supplies
//!
//! The mirror tracks every subsystem the store declares, one entry per
//! successful hardware description load. Subsystems that appear in the store
//! are discovered on the next reconcile pass; subsystems that disappear are
//! torn down by mark-and-sweep. A global index maps power supply names to
//! their entries for direct lookup by the admin interface and the store diff.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::descriptor::{DescriptorError, DescriptorProvider, LedInfo, PsuDescriptor};
use crate::registers::{read_bool_op, RegisterIo};
use crate::status::{derive_status, PsuStatus};
use crate::store::{Store, StoreError, StoreTxn, SubsystemRow};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("no hardware description directory for subsystem {0}")]
    MissingDescriptorDir(String),
    #[error("failed to load hardware description for subsystem {subsystem} (in {dir}): {source}")]
    DescriptorLoad {
        subsystem: String,
        dir: String,
        source: DescriptorError,
    },
    #[error("subsystem {0} declares no power supplies")]
    NoPowerSupplies(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One manageable power supply within a subsystem
#[derive(Debug, Clone)]
pub struct PowerSupply {
    /// Globally unique name, `{subsystem}-{number}`
    pub name: String,
    /// Register operations for this supply
    pub descriptor: PsuDescriptor,
    /// Last derived status
    pub status: PsuStatus,
    /// Manual status override set via the admin interface
    pub test_override: Option<PsuStatus>,
    /// When the status last changed
    pub last_change: DateTime<Utc>,
}

impl PowerSupply {
    fn new(name: String, descriptor: PsuDescriptor) -> Self {
        Self {
            name,
            descriptor,
            status: PsuStatus::Ok,
            test_override: None,
            last_change: Utc::now(),
        }
    }

    /// Re-derive the status from fresh register reads
    pub fn poll(&mut self, subsystem: &str, registers: &dyn RegisterIo) {
        debug!(psu = %self.name, "reading power supply state");
        let present = read_bool_op(registers, subsystem, &self.name, &self.descriptor.present);
        let input_ok = read_bool_op(registers, subsystem, &self.name, &self.descriptor.input_ok);
        let output_ok = read_bool_op(registers, subsystem, &self.name, &self.descriptor.output_ok);

        let status = derive_status(present, input_ok, output_ok, self.test_override);
        if status != self.status {
            self.status = status;
            self.last_change = Utc::now();
        }
    }
}

/// A named hardware grouping containing power supplies
#[derive(Debug, Clone)]
pub struct Subsystem {
    pub name: String,
    /// True once the hardware description loaded and supplies were found
    pub valid: bool,
    /// Transient mark-and-sweep flag, meaningful only within one pass
    marked: bool,
    /// Last aggregate status driven to the status LED
    pub led_status: PsuStatus,
    /// Status LED control, when the description declares one
    pub led: Option<LedInfo>,
    /// Power supplies in descriptor order
    pub psus: Vec<PowerSupply>,
}

/// Location of a power supply within the mirror
#[derive(Debug, Clone, PartialEq, Eq)]
struct PsuKey {
    subsystem: String,
    slot: usize,
}

/// Owned mirror of all subsystems plus the global power supply index.
///
/// The index stays exactly consistent with the union of all subsystems'
/// supplies: every insertion and removal updates both within one call.
#[derive(Debug, Default)]
pub struct Mirror {
    subsystems: HashMap<String, Subsystem>,
    psu_index: HashMap<String, PsuKey>,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subsystems(&self) -> impl Iterator<Item = &Subsystem> {
        self.subsystems.values()
    }

    pub fn get(&self, name: &str) -> Option<&Subsystem> {
        self.subsystems.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Subsystem> {
        self.subsystems.get_mut(name)
    }

    /// Look up a power supply anywhere in the mirror by name
    pub fn psu(&self, name: &str) -> Option<&PowerSupply> {
        let key = self.psu_index.get(name)?;
        self.subsystems.get(&key.subsystem)?.psus.get(key.slot)
    }

    fn psu_mut(&mut self, name: &str) -> Option<&mut PowerSupply> {
        let key = self.psu_index.get(name)?.clone();
        self.subsystems.get_mut(&key.subsystem)?.psus.get_mut(key.slot)
    }

    /// Set or clear the manual test override of a power supply.
    /// Returns false when no such supply exists.
    pub fn set_test_override(&mut self, name: &str, value: Option<PsuStatus>) -> bool {
        match self.psu_mut(name) {
            Some(psu) => {
                psu.test_override = value;
                true
            }
            None => false,
        }
    }

    /// Ensure the mirror has a valid entry for a store subsystem row,
    /// discovering its power supplies if it is new.
    ///
    /// Discovery polls every new supply once and reflects the topology and
    /// initial statuses into the store as a single committed transaction,
    /// the only path that creates power supply rows. On any error no entry is
    /// created; the subsystem is retried on the next pass.
    pub fn sync_subsystem(
        &mut self,
        row: &SubsystemRow,
        provider: &dyn DescriptorProvider,
        registers: &dyn RegisterIo,
        store: &dyn Store,
    ) -> Result<(), SyncError> {
        if self.subsystems.get(&row.name).is_some_and(|s| s.valid) {
            return Ok(());
        }

        if row.hw_desc_dir.is_empty() {
            return Err(SyncError::MissingDescriptorDir(row.name.clone()));
        }

        debug!(subsystem = %row.name, dir = %row.hw_desc_dir, "adding new subsystem");

        let desc = provider
            .load(&row.name, Path::new(&row.hw_desc_dir))
            .map_err(|source| SyncError::DescriptorLoad {
                subsystem: row.name.clone(),
                dir: row.hw_desc_dir.clone(),
                source,
            })?;

        if desc.psu.is_empty() {
            return Err(SyncError::NoPowerSupplies(row.name.clone()));
        }

        info!(
            count = desc.psu.len(),
            subsystem = %row.name,
            "discovered power supplies"
        );

        let mut subsystem = Subsystem {
            name: row.name.clone(),
            valid: true,
            marked: false,
            led_status: PsuStatus::Unknown,
            led: desc.led,
            psus: Vec::with_capacity(desc.psu.len()),
        };

        let mut txn = StoreTxn::new();
        for d in &desc.psu {
            let psu_name = format!("{}-{}", row.name, d.number);
            let mut psu = PowerSupply::new(psu_name.clone(), d.clone());
            psu.poll(&row.name, registers);
            txn.upsert_psu(&psu_name, psu.status);
            subsystem.psus.push(psu);
        }
        txn.set_subsystem_psus(
            &row.name,
            subsystem.psus.iter().map(|p| p.name.clone()).collect(),
        );
        store.commit(txn)?;

        for (slot, psu) in subsystem.psus.iter().enumerate() {
            self.psu_index.insert(
                psu.name.clone(),
                PsuKey {
                    subsystem: row.name.clone(),
                    slot,
                },
            );
        }
        self.subsystems.insert(row.name.clone(), subsystem);

        Ok(())
    }

    /// Clear the mark on every subsystem, starting a mark-and-sweep pass
    pub fn unmark_all(&mut self) {
        for subsystem in self.subsystems.values_mut() {
            subsystem.marked = false;
        }
    }

    /// Mark a subsystem as still present in the store
    pub fn mark(&mut self, name: &str) {
        if let Some(subsystem) = self.subsystems.get_mut(name) {
            subsystem.marked = true;
        }
    }

    /// Remove every subsystem left unmarked by the current pass, together
    /// with all of its power supplies. Returns the removed subsystem names.
    pub fn sweep_unmarked(&mut self) -> Vec<String> {
        // Collect first, then mutate
        let doomed: Vec<String> = self
            .subsystems
            .values()
            .filter(|s| !s.marked)
            .map(|s| s.name.clone())
            .collect();

        for name in &doomed {
            if let Some(subsystem) = self.subsystems.remove(name) {
                for psu in &subsystem.psus {
                    self.psu_index.remove(&psu.name);
                }
            }
        }

        doomed
    }

    /// Poll every power supply of every valid subsystem
    pub fn poll_all(&mut self, registers: &dyn RegisterIo) {
        for subsystem in self.subsystems.values_mut() {
            if !subsystem.valid {
                continue;
            }
            let name = subsystem.name.clone();
            for psu in &mut subsystem.psus {
                psu.poll(&name, registers);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{LedValues, SubsystemDescriptors};
    use crate::registers::{BitOp, SimBus};
    use crate::store::MemoryStore;
    use std::io;

    /// Provider serving canned descriptors keyed by subsystem name
    struct StaticProvider(HashMap<String, SubsystemDescriptors>);

    impl StaticProvider {
        fn single(name: &str, desc: SubsystemDescriptors) -> Self {
            Self(HashMap::from([(name.to_string(), desc)]))
        }
    }

    impl DescriptorProvider for StaticProvider {
        fn load(&self, subsystem: &str, _dir: &Path) -> Result<SubsystemDescriptors, DescriptorError> {
            self.0.get(subsystem).cloned().ok_or_else(|| {
                DescriptorError::Io(io::Error::new(io::ErrorKind::NotFound, "no description"))
            })
        }
    }

    fn bit_op(device: &str, mask: u32) -> BitOp {
        BitOp {
            device: device.to_string(),
            register: 0x10,
            bit_mask: mask,
        }
    }

    fn psu_desc(number: u32) -> PsuDescriptor {
        let device = format!("psu{number}");
        PsuDescriptor {
            number,
            present: bit_op(&device, 0x01),
            input_ok: bit_op(&device, 0x02),
            output_ok: bit_op(&device, 0x04),
        }
    }

    fn descriptors(numbers: &[u32], led: bool) -> SubsystemDescriptors {
        SubsystemDescriptors {
            psu: numbers.iter().map(|&n| psu_desc(n)).collect(),
            led: led.then(|| LedInfo {
                op: bit_op("fpga", 0x03),
                values: LedValues {
                    good: 0x01,
                    fault: 0x02,
                    off: 0x00,
                },
            }),
        }
    }

    fn row(name: &str) -> SubsystemRow {
        SubsystemRow {
            name: name.to_string(),
            hw_desc_dir: format!("/etc/hwdesc/{name}"),
        }
    }

    /// Membership/status snapshot for resync idempotency checks
    fn snapshot(mirror: &Mirror) -> Vec<(String, Vec<(String, PsuStatus)>)> {
        let mut subs: Vec<_> = mirror
            .subsystems()
            .map(|s| {
                (
                    s.name.clone(),
                    s.psus.iter().map(|p| (p.name.clone(), p.status)).collect(),
                )
            })
            .collect();
        subs.sort();
        subs
    }

    #[test]
    fn discovery_names_psus_in_descriptor_order() {
        let mut mirror = Mirror::new();
        let provider = StaticProvider::single("base-1", descriptors(&[1, 2, 3], false));
        let bus = SimBus::new();
        let store = MemoryStore::new();

        mirror
            .sync_subsystem(&row("base-1"), &provider, &bus, &store)
            .unwrap();

        let subsystem = mirror.get("base-1").unwrap();
        assert!(subsystem.valid);
        let names: Vec<_> = subsystem.psus.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["base-1-1", "base-1-2", "base-1-3"]);

        // All supplies resolve through the global index
        for name in names {
            assert!(mirror.psu(name).is_some());
        }
    }

    #[test]
    fn discovery_writes_topology_and_initial_status_to_store() {
        let mut mirror = Mirror::new();
        let provider = StaticProvider::single("base", descriptors(&[1, 2], false));
        let bus = SimBus::new();
        // Supply 2 has an input fault at discovery time
        bus.set("base", "psu2", 0x10, 0x05);
        let store = MemoryStore::new();

        mirror
            .sync_subsystem(&row("base"), &provider, &bus, &store)
            .unwrap();

        let psus = store.power_supplies();
        assert_eq!(psus.len(), 2);
        assert_eq!(psus[0].name, "base-1");
        assert_eq!(psus[0].status, PsuStatus::Ok);
        assert_eq!(psus[1].name, "base-2");
        assert_eq!(psus[1].status, PsuStatus::FaultInput);
        assert_eq!(
            store.subsystem_psus("base"),
            vec!["base-1".to_string(), "base-2".to_string()]
        );
    }

    #[test]
    fn missing_descriptor_dir_creates_no_entry() {
        let mut mirror = Mirror::new();
        let provider = StaticProvider::single("base", descriptors(&[1], false));
        let bus = SimBus::new();
        let store = MemoryStore::new();

        let bare = SubsystemRow {
            name: "base".to_string(),
            hw_desc_dir: String::new(),
        };
        let err = mirror
            .sync_subsystem(&bare, &provider, &bus, &store)
            .unwrap_err();
        assert!(matches!(err, SyncError::MissingDescriptorDir(_)));
        assert!(mirror.get("base").is_none());
        assert!(store.power_supplies().is_empty());
    }

    #[test]
    fn failed_descriptor_load_creates_no_entry() {
        let mut mirror = Mirror::new();
        let provider = StaticProvider(HashMap::new());
        let bus = SimBus::new();
        let store = MemoryStore::new();

        let err = mirror
            .sync_subsystem(&row("base"), &provider, &bus, &store)
            .unwrap_err();
        assert!(matches!(err, SyncError::DescriptorLoad { .. }));
        assert!(mirror.get("base").is_none());
        assert!(mirror.psu("base-1").is_none());
    }

    #[test]
    fn zero_psus_creates_no_entry() {
        let mut mirror = Mirror::new();
        let provider = StaticProvider::single("base", descriptors(&[], false));
        let bus = SimBus::new();
        let store = MemoryStore::new();

        let err = mirror
            .sync_subsystem(&row("base"), &provider, &bus, &store)
            .unwrap_err();
        assert!(matches!(err, SyncError::NoPowerSupplies(_)));
        assert!(mirror.get("base").is_none());
        assert!(store.power_supplies().is_empty());
    }

    #[test]
    fn mark_and_sweep_removes_vanished_subsystem() {
        let mut mirror = Mirror::new();
        let provider = StaticProvider(HashMap::from([
            ("a".to_string(), descriptors(&[1], false)),
            ("b".to_string(), descriptors(&[1, 2], false)),
        ]));
        let bus = SimBus::new();
        let store = MemoryStore::new();

        mirror.sync_subsystem(&row("a"), &provider, &bus, &store).unwrap();
        mirror.sync_subsystem(&row("b"), &provider, &bus, &store).unwrap();

        // Next pass: only "a" is still present in the store
        mirror.unmark_all();
        mirror.sync_subsystem(&row("a"), &provider, &bus, &store).unwrap();
        mirror.mark("a");
        let removed = mirror.sweep_unmarked();

        assert_eq!(removed, vec!["b".to_string()]);
        assert!(mirror.get("b").is_none());
        assert!(mirror.psu("b-1").is_none());
        assert!(mirror.psu("b-2").is_none());
        assert!(mirror.get("a").is_some());
        assert!(mirror.psu("a-1").is_some());
    }

    #[test]
    fn resync_is_idempotent() {
        let mut mirror = Mirror::new();
        let provider = StaticProvider::single("base", descriptors(&[1, 2], false));
        let bus = SimBus::new();
        bus.set("base", "psu1", 0x10, 0x03); // output fault
        let store = MemoryStore::new();

        let mut pass = |mirror: &mut Mirror| {
            mirror.unmark_all();
            mirror.sync_subsystem(&row("base"), &provider, &bus, &store).unwrap();
            mirror.mark("base");
            mirror.sweep_unmarked();
        };

        pass(&mut mirror);
        let first = snapshot(&mirror);
        pass(&mut mirror);
        assert_eq!(snapshot(&mirror), first);
    }

    #[test]
    fn test_override_applies_on_poll() {
        let mut mirror = Mirror::new();
        let provider = StaticProvider::single("psu", descriptors(&[0], false));
        let bus = SimBus::new();
        let store = MemoryStore::new();

        mirror.sync_subsystem(&row("psu"), &provider, &bus, &store).unwrap();
        assert_eq!(mirror.psu("psu-0").unwrap().status, PsuStatus::Ok);

        assert!(mirror.set_test_override("psu-0", Some(PsuStatus::FaultInput)));
        mirror.poll_all(&bus);
        assert_eq!(mirror.psu("psu-0").unwrap().status, PsuStatus::FaultInput);

        // Clearing the override restores the register-derived value
        assert!(mirror.set_test_override("psu-0", None));
        mirror.poll_all(&bus);
        assert_eq!(mirror.psu("psu-0").unwrap().status, PsuStatus::Ok);

        assert!(!mirror.set_test_override("psu-9", Some(PsuStatus::Ok)));
    }

    #[test]
    fn existing_valid_subsystem_is_not_rediscovered() {
        let mut mirror = Mirror::new();
        let provider = StaticProvider::single("base", descriptors(&[1], false));
        let bus = SimBus::new();
        let store = MemoryStore::new();

        mirror.sync_subsystem(&row("base"), &provider, &bus, &store).unwrap();

        // A provider that would now fail is never consulted again
        let broken = StaticProvider(HashMap::new());
        mirror.sync_subsystem(&row("base"), &broken, &bus, &store).unwrap();
        assert!(mirror.get("base").unwrap().valid);
    }
}
