//! Power supply status values and the status derivation function

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::registers::BitRead;

/// Operational status of a power supply, as reported in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PsuStatus {
    /// Supply is present and both input and output are good
    Ok,
    /// Input power fault
    FaultInput,
    /// Output power fault
    FaultOutput,
    /// Supply is not present
    FaultAbsent,
    /// Status could not be read
    Unknown,
}

impl PsuStatus {
    /// Store string representation (`ok`, `fault_input`, ...)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::FaultInput => "fault_input",
            Self::FaultOutput => "fault_output",
            Self::FaultAbsent => "fault_absent",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a test override token: `"none"` clears the override, a status
    /// string sets it, and anything unrecognized sets `Unknown`.
    pub fn parse_override(s: &str) -> Option<Self> {
        if s == "none" {
            return None;
        }
        Some(s.parse().unwrap_or(Self::Unknown))
    }
}

impl fmt::Display for PsuStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PsuStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(Self::Ok),
            "fault_input" => Ok(Self::FaultInput),
            "fault_output" => Ok(Self::FaultOutput),
            "fault_absent" => Ok(Self::FaultAbsent),
            "unknown" => Ok(Self::Unknown),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

/// Error for an unrecognized status string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized power supply status: {0}")]
pub struct UnknownStatus(pub String);

/// Derive a power supply status from the three register reads.
///
/// Priority: any failed read forces `Unknown`; otherwise absence masks
/// input/output faults (a missing unit cannot report them); a manual test
/// override, when set, replaces the computed value unconditionally.
pub fn derive_status(
    present: BitRead,
    input_ok: BitRead,
    output_ok: BitRead,
    test_override: Option<PsuStatus>,
) -> PsuStatus {
    let mut status = if present.failed() || input_ok.failed() || output_ok.failed() {
        PsuStatus::Unknown
    } else if present == BitRead::Bad {
        PsuStatus::FaultAbsent
    } else if input_ok == BitRead::Bad {
        PsuStatus::FaultInput
    } else if output_ok == BitRead::Bad {
        PsuStatus::FaultOutput
    } else {
        PsuStatus::Ok
    };

    if let Some(forced) = test_override {
        status = forced;
    }

    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use BitRead::{Bad, Fail, Good};

    #[test]
    fn status_string_round_trip() {
        for status in [
            PsuStatus::Ok,
            PsuStatus::FaultInput,
            PsuStatus::FaultOutput,
            PsuStatus::FaultAbsent,
            PsuStatus::Unknown,
        ] {
            assert_eq!(status.as_str().parse::<PsuStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<PsuStatus>().is_err());
    }

    #[test]
    fn parse_override_tokens() {
        assert_eq!(PsuStatus::parse_override("none"), None);
        assert_eq!(
            PsuStatus::parse_override("fault_input"),
            Some(PsuStatus::FaultInput)
        );
        // Unrecognized tokens degrade to unknown rather than erroring
        assert_eq!(PsuStatus::parse_override("bogus"), Some(PsuStatus::Unknown));
    }

    #[test]
    fn derivation_totality() {
        // All 2x2x2 good/bad combinations with no read failure and no override
        let cases = [
            (Good, Good, Good, PsuStatus::Ok),
            (Good, Good, Bad, PsuStatus::FaultOutput),
            (Good, Bad, Good, PsuStatus::FaultInput),
            (Good, Bad, Bad, PsuStatus::FaultInput),
            (Bad, Good, Good, PsuStatus::FaultAbsent),
            (Bad, Good, Bad, PsuStatus::FaultAbsent),
            (Bad, Bad, Good, PsuStatus::FaultAbsent),
            (Bad, Bad, Bad, PsuStatus::FaultAbsent),
        ];
        for (present, input, output, expected) in cases {
            assert_eq!(derive_status(present, input, output, None), expected);
        }
    }

    #[test]
    fn read_failure_forces_unknown() {
        assert_eq!(derive_status(Fail, Good, Good, None), PsuStatus::Unknown);
        assert_eq!(derive_status(Good, Fail, Good, None), PsuStatus::Unknown);
        assert_eq!(derive_status(Good, Good, Fail, None), PsuStatus::Unknown);
        // A failed read outranks a bad value
        assert_eq!(derive_status(Bad, Fail, Good, None), PsuStatus::Unknown);
    }

    #[test]
    fn override_wins_over_everything() {
        for status in [
            PsuStatus::Ok,
            PsuStatus::FaultInput,
            PsuStatus::FaultOutput,
            PsuStatus::FaultAbsent,
            PsuStatus::Unknown,
        ] {
            assert_eq!(derive_status(Good, Good, Good, Some(status)), status);
            assert_eq!(derive_status(Bad, Bad, Bad, Some(status)), status);
            // Even a read failure is replaced by the override
            assert_eq!(derive_status(Fail, Fail, Fail, Some(status)), status);
        }
    }
}
