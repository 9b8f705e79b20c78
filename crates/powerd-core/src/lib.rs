//! powerd core - power supply status model and reconciliation logic
//!
//! This crate provides the foundational pieces for the powerd daemon:
//! - Power supply status values and the pure status derivation function
//! - Register bit operations with tri-state read results
//! - Hardware description (descriptor) loading for subsystems
//! - The in-memory subsystem/power-supply mirror with mark-and-sweep tracking
//! - Subsystem status LED aggregation
//! - The state store contract and an in-process implementation

pub mod descriptor;
pub mod leds;
pub mod mirror;
pub mod registers;
pub mod status;
pub mod store;

pub use descriptor::{
    DescriptorError, DescriptorProvider, DescriptorProviderFn, LedInfo, LedValues, PsuDescriptor,
    SubsystemDescriptors, TomlDescriptorLoader,
};
pub use leds::update_indicator;
pub use mirror::{Mirror, PowerSupply, Subsystem, SyncError};
pub use registers::{read_bool_op, BitOp, BitRead, RegisterIo, SimBus};
pub use status::{derive_status, PsuStatus};
pub use store::{
    DaemonRow, LockState, MemoryStore, PsuRow, Store, StoreError, StoreTxn, SubsystemRow,
};
