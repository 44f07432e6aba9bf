//! Process and program identity types.
//!
//! A running process instance is identified by a [`ProcessId`]; the installed
//! application package it was launched from is identified by a [`ProgramId`].
//! The two are unrelated numbers and must never be mixed up, hence the
//! newtypes.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Identifier of a running OS process instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub u64);

impl ProcessId {
    /// The "no process" value reported by the platform.
    pub const NONE: ProcessId = ProcessId(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::UpperHex for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::UpperHex::fmt(&self.0, f)
    }
}

impl From<u64> for ProcessId {
    fn from(pid: u64) -> Self {
        ProcessId(pid)
    }
}

impl From<u32> for ProcessId {
    fn from(pid: u32) -> Self {
        ProcessId(u64::from(pid))
    }
}

/// Platform-level identifier of an installed application package.
///
/// Displays as `0x` followed by 16 upper-case hex digits, which is also the
/// form accepted by [`FromStr`] and used in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ProgramId(pub u64);

impl ProgramId {
    /// The "no program" value.
    pub const NONE: ProgramId = ProgramId(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl fmt::UpperHex for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::UpperHex::fmt(&self.0, f)
    }
}

impl From<u64> for ProgramId {
    fn from(id: u64) -> Self {
        ProgramId(id)
    }
}

impl FromStr for ProgramId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.is_empty() || digits.len() > 16 {
            return Err(Error::InvalidProgramId(s.to_string()));
        }
        u64::from_str_radix(digits, 16)
            .map(ProgramId)
            .map_err(|_| Error::InvalidProgramId(s.to_string()))
    }
}

impl Serialize for ProgramId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ProgramId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Raw result code of a platform query, kept for diagnostics only.
///
/// Zero means success. Displays as `0x` followed by 8 upper-case hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultCode(pub u32);

impl ResultCode {
    pub const SUCCESS: ResultCode = ResultCode(0);

    pub fn is_success(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl fmt::UpperHex for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::UpperHex::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn program_id_display_is_fixed_width_hex() {
        assert_eq!(ProgramId(0x0100_0000_0000_2000).to_string(), "0x0100000000002000");
        assert_eq!(ProgramId(0).to_string(), "0x0000000000000000");
        assert_eq!(ProgramId(u64::MAX).to_string(), "0xFFFFFFFFFFFFFFFF");
    }

    #[test]
    fn result_code_display_is_eight_digits() {
        assert_eq!(ResultCode(0).to_string(), "0x00000000");
        assert_eq!(ResultCode(0x2A0F).to_string(), "0x00002A0F");
        assert!(ResultCode::SUCCESS.is_success());
        assert!(!ResultCode(1).is_success());
    }

    #[test]
    fn process_id_display_is_decimal() {
        assert_eq!(ProcessId(81).to_string(), "81");
        assert_eq!(format!("0x{:016X}", ProcessId(0x51)), "0x0000000000000051");
        assert!(ProcessId::NONE.is_none());
    }

    #[test]
    fn program_id_parse_accepts_prefix_and_bare_hex() {
        assert_eq!(
            "0x0100000000003000".parse::<ProgramId>().unwrap(),
            ProgramId(0x0100_0000_0000_3000)
        );
        assert_eq!(
            "0100000000003000".parse::<ProgramId>().unwrap(),
            ProgramId(0x0100_0000_0000_3000)
        );
        assert_eq!("  0XFF ".parse::<ProgramId>().unwrap(), ProgramId(0xFF));
    }

    #[test]
    fn program_id_parse_rejects_garbage() {
        assert!("".parse::<ProgramId>().is_err());
        assert!("0x".parse::<ProgramId>().is_err());
        assert!("0xZZ".parse::<ProgramId>().is_err());
        assert!("0x1_0000_0000_0000_0000".parse::<ProgramId>().is_err());
        assert!("10000000000000000".parse::<ProgramId>().is_err());
    }

    #[test]
    fn program_id_serde_uses_hex_string() {
        let json = serde_json::to_string(&ProgramId(0x0100_0000_0000_1000)).unwrap();
        assert_eq!(json, "\"0x0100000000001000\"");
        let back: ProgramId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ProgramId(0x0100_0000_0000_1000));
    }

    proptest! {
        #[test]
        fn program_id_display_parses_back(raw in any::<u64>()) {
            let id = ProgramId(raw);
            prop_assert_eq!(id.to_string().parse::<ProgramId>().unwrap(), id);
            prop_assert_eq!(id.to_string().len(), 18);
        }
    }
}
