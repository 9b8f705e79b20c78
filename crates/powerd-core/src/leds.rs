//! Subsystem power status LED control
//!
//! The subsystem LED reflects an aggregate of the contained supplies'
//! statuses. Absent supplies and healthy supplies do not light the fault
//! indicator; only input/output faults do.

use tracing::debug;

use crate::mirror::Subsystem;
use crate::registers::RegisterIo;
use crate::status::PsuStatus;

/// Recompute the aggregate status of a subsystem and drive the LED register
/// when it changed.
///
/// The cached aggregate is updated on every write attempt, regardless of the
/// outcome: a failing LED register is retried only when the aggregate next
/// changes, never hammered every cycle.
pub fn update_indicator(subsystem: &mut Subsystem, registers: &dyn RegisterIo) {
    let Some(led) = subsystem.led.clone() else {
        debug!(subsystem = %subsystem.name, "subsystem has no power status led");
        return;
    };

    let mut aggregate = PsuStatus::Ok;
    for psu in &subsystem.psus {
        match psu.status {
            // Ignore absent supplies, unknowns, and ok status
            PsuStatus::Ok | PsuStatus::Unknown | PsuStatus::FaultAbsent => {}
            PsuStatus::FaultInput | PsuStatus::FaultOutput => aggregate = psu.status,
        }
    }

    if aggregate == subsystem.led_status {
        return;
    }
    subsystem.led_status = aggregate;

    let value = match aggregate {
        PsuStatus::Ok => led.values.good,
        PsuStatus::FaultInput | PsuStatus::FaultOutput | PsuStatus::FaultAbsent => {
            led.values.fault
        }
        PsuStatus::Unknown => led.values.off,
    };

    if let Err(e) = registers.write(&subsystem.name, &led.op, value) {
        debug!(
            subsystem = %subsystem.name,
            error = %e,
            "unable to set subsystem power status led"
        );
    }
}
