//! Register bit operations and the register access seam
//!
//! A `BitOp` names one bit field on one device within a subsystem. Reading it
//! yields a tri-state result: the masked value matches the mask (good), it
//! does not (bad), or the bus access itself failed.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Mutex;
use tracing::warn;

/// One bit-field operation on a device register
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitOp {
    /// Device name within the subsystem
    pub device: String,
    /// Register address on the device
    pub register: u16,
    /// Bit mask selecting the field
    pub bit_mask: u32,
}

/// Result of reading a bit operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitRead {
    /// Field reads as its good value
    Good,
    /// Field reads as a fault value
    Bad,
    /// The bus access failed
    Fail,
}

impl BitRead {
    pub fn failed(&self) -> bool {
        matches!(self, Self::Fail)
    }
}

/// Register access for one hardware platform.
///
/// `read` returns the register value already masked by `op.bit_mask`. Real
/// implementations live outside this crate; [`SimBus`] is the in-process one.
pub trait RegisterIo: Send + Sync {
    fn read(&self, subsystem: &str, op: &BitOp) -> io::Result<u32>;
    fn write(&self, subsystem: &str, op: &BitOp, value: u32) -> io::Result<()>;
}

/// Read a bit operation and classify the result, logging bus failures.
pub fn read_bool_op(io: &dyn RegisterIo, subsystem: &str, psu: &str, op: &BitOp) -> BitRead {
    match io.read(subsystem, op) {
        Ok(value) if value == op.bit_mask => BitRead::Good,
        Ok(_) => BitRead::Bad,
        Err(e) => {
            warn!(
                subsystem = %subsystem,
                psu = %psu,
                device = %op.device,
                error = %e,
                "unable to read power supply status bit"
            );
            BitRead::Fail
        }
    }
}

type RegisterKey = (String, String, u16);

/// In-memory register bus.
///
/// Registers read as their full mask (the good value) until a value is set.
/// Individual registers can be made to fail, and writes are recorded so tests
/// can assert on indicator traffic.
#[derive(Debug, Default)]
pub struct SimBus {
    registers: Mutex<HashMap<RegisterKey, u32>>,
    failing: Mutex<HashSet<RegisterKey>>,
    writes: Mutex<Vec<(RegisterKey, u32)>>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the raw value of a register
    pub fn set(&self, subsystem: &str, device: &str, register: u16, value: u32) {
        self.registers
            .lock()
            .unwrap()
            .insert(key(subsystem, device, register), value);
    }

    /// Make reads and writes of a register fail (or stop failing)
    pub fn set_failing(&self, subsystem: &str, device: &str, register: u16, failing: bool) {
        let k = key(subsystem, device, register);
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(k);
        } else {
            set.remove(&k);
        }
    }

    /// All recorded writes, in order
    pub fn writes(&self) -> Vec<((String, String, u16), u32)> {
        self.writes.lock().unwrap().clone()
    }

    /// Last value written to a register, if any
    pub fn last_write(&self, subsystem: &str, device: &str, register: u16) -> Option<u32> {
        let k = key(subsystem, device, register);
        self.writes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(wk, _)| *wk == k)
            .map(|(_, v)| *v)
    }

    fn check_failing(&self, k: &RegisterKey) -> io::Result<()> {
        if self.failing.lock().unwrap().contains(k) {
            return Err(io::Error::new(io::ErrorKind::Other, "register access failed"));
        }
        Ok(())
    }
}

impl RegisterIo for SimBus {
    fn read(&self, subsystem: &str, op: &BitOp) -> io::Result<u32> {
        let k = key(subsystem, &op.device, op.register);
        self.check_failing(&k)?;
        let raw = self
            .registers
            .lock()
            .unwrap()
            .get(&k)
            .copied()
            .unwrap_or(op.bit_mask);
        Ok(raw & op.bit_mask)
    }

    fn write(&self, subsystem: &str, op: &BitOp, value: u32) -> io::Result<()> {
        let k = key(subsystem, &op.device, op.register);
        self.check_failing(&k)?;
        self.registers.lock().unwrap().insert(k.clone(), value);
        self.writes.lock().unwrap().push((k, value));
        Ok(())
    }
}

fn key(subsystem: &str, device: &str, register: u16) -> RegisterKey {
    (subsystem.to_string(), device.to_string(), register)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(device: &str) -> BitOp {
        BitOp {
            device: device.to_string(),
            register: 0x10,
            bit_mask: 0x04,
        }
    }

    #[test]
    fn unset_register_reads_good() {
        let bus = SimBus::new();
        assert_eq!(read_bool_op(&bus, "base", "base-1", &op("psu1")), BitRead::Good);
    }

    #[test]
    fn masked_mismatch_reads_bad() {
        let bus = SimBus::new();
        bus.set("base", "psu1", 0x10, 0x00);
        assert_eq!(read_bool_op(&bus, "base", "base-1", &op("psu1")), BitRead::Bad);

        // Bits outside the mask are ignored
        bus.set("base", "psu1", 0x10, 0xFB);
        assert_eq!(read_bool_op(&bus, "base", "base-1", &op("psu1")), BitRead::Bad);
    }

    #[test]
    fn failing_register_reads_fail() {
        let bus = SimBus::new();
        bus.set_failing("base", "psu1", 0x10, true);
        assert_eq!(read_bool_op(&bus, "base", "base-1", &op("psu1")), BitRead::Fail);

        bus.set_failing("base", "psu1", 0x10, false);
        assert_eq!(read_bool_op(&bus, "base", "base-1", &op("psu1")), BitRead::Good);
    }

    #[test]
    fn writes_are_recorded() {
        let bus = SimBus::new();
        let led = op("led");
        bus.write("base", &led, 0x2).unwrap();
        bus.write("base", &led, 0x1).unwrap();
        assert_eq!(bus.writes().len(), 2);
        assert_eq!(bus.last_write("base", "led", 0x10), Some(0x1));
    }
}
