//! Hardware description loading
//!
//! Each subsystem ships a hardware description directory containing a
//! `power.toml` describing its power supplies: which register bit to read for
//! presence, input and output state, and optionally which register drives the
//! subsystem power status LED.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::registers::BitOp;

/// Name of the power description file within a hardware description directory
pub const POWER_DESC_FILE: &str = "power.toml";

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("failed to read hardware description: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse hardware description: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Register operations for one power supply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PsuDescriptor {
    /// Ordinal number of the supply within the subsystem
    pub number: u32,
    /// Presence bit
    pub present: BitOp,
    /// Input power good bit
    pub input_ok: BitOp,
    /// Output power good bit
    pub output_ok: BitOp,
}

/// Output values for the subsystem power status LED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedValues {
    pub good: u32,
    pub fault: u32,
    pub off: u32,
}

/// Subsystem power status LED control
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedInfo {
    /// Register operation driving the LED
    pub op: BitOp,
    /// Values to write for each aggregate state
    pub values: LedValues,
}

/// Everything the power description file declares for one subsystem
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubsystemDescriptors {
    /// Power supplies, in descriptor order
    #[serde(default)]
    pub psu: Vec<PsuDescriptor>,
    /// Optional status LED
    #[serde(default)]
    pub led: Option<LedInfo>,
}

impl SubsystemDescriptors {
    /// Load from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, DescriptorError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, DescriptorError> {
        Ok(toml::from_str(content)?)
    }
}

/// Provider of power supply descriptors per subsystem
pub trait DescriptorProvider: Send + Sync {
    fn load(&self, subsystem: &str, dir: &Path) -> Result<SubsystemDescriptors, DescriptorError>;
}

/// Adapter implementing [`DescriptorProvider`] from a closure over the
/// subsystem name
pub struct DescriptorProviderFn<F>(pub F);

impl<F> DescriptorProvider for DescriptorProviderFn<F>
where
    F: Fn(&str) -> Result<SubsystemDescriptors, DescriptorError> + Send + Sync,
{
    fn load(&self, subsystem: &str, _dir: &Path) -> Result<SubsystemDescriptors, DescriptorError> {
        (self.0)(subsystem)
    }
}

/// Loads descriptors from `<dir>/power.toml`
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlDescriptorLoader;

impl DescriptorProvider for TomlDescriptorLoader {
    fn load(&self, _subsystem: &str, dir: &Path) -> Result<SubsystemDescriptors, DescriptorError> {
        SubsystemDescriptors::from_file(&dir.join(POWER_DESC_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[psu]]
        number = 1
        present = { device = "psu1", register = 0x10, bit_mask = 0x01 }
        input_ok = { device = "psu1", register = 0x10, bit_mask = 0x02 }
        output_ok = { device = "psu1", register = 0x10, bit_mask = 0x04 }

        [[psu]]
        number = 2
        present = { device = "psu2", register = 0x10, bit_mask = 0x01 }
        input_ok = { device = "psu2", register = 0x10, bit_mask = 0x02 }
        output_ok = { device = "psu2", register = 0x10, bit_mask = 0x04 }

        [led]
        op = { device = "fpga", register = 0x20, bit_mask = 0x03 }
        values = { good = 0x01, fault = 0x02, off = 0x00 }
    "#;

    #[test]
    fn parse_power_description() {
        let desc = SubsystemDescriptors::from_toml(SAMPLE).unwrap();
        assert_eq!(desc.psu.len(), 2);
        assert_eq!(desc.psu[0].number, 1);
        assert_eq!(desc.psu[0].present.device, "psu1");
        assert_eq!(desc.psu[1].output_ok.bit_mask, 0x04);

        let led = desc.led.unwrap();
        assert_eq!(led.op.device, "fpga");
        assert_eq!(led.values.fault, 0x02);
    }

    #[test]
    fn led_is_optional() {
        let desc = SubsystemDescriptors::from_toml(
            r#"
            [[psu]]
            number = 1
            present = { device = "psu1", register = 0x10, bit_mask = 0x01 }
            input_ok = { device = "psu1", register = 0x10, bit_mask = 0x02 }
            output_ok = { device = "psu1", register = 0x10, bit_mask = 0x04 }
            "#,
        )
        .unwrap();
        assert_eq!(desc.psu.len(), 1);
        assert!(desc.led.is_none());
    }

    #[test]
    fn loader_reads_power_toml_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(POWER_DESC_FILE), SAMPLE).unwrap();

        let desc = TomlDescriptorLoader.load("base", dir.path()).unwrap();
        assert_eq!(desc.psu.len(), 2);
    }

    #[test]
    fn loader_errors_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = TomlDescriptorLoader.load("base", dir.path()).unwrap_err();
        assert!(matches!(err, DescriptorError::Io(_)));
    }

    #[test]
    fn loader_errors_on_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(POWER_DESC_FILE), "[[psu]]\nnumber = \"one\"").unwrap();
        let err = TomlDescriptorLoader.load("base", dir.path()).unwrap_err();
        assert!(matches!(err, DescriptorError::Parse(_)));
    }
}
