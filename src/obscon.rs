//! # Observing conditions
//!
//! An observing-condition category ("obscon") is a named operating mode, such as `DARK`
//! or `BRIGHT`, that governs which priority rules apply to a target. Categories combine
//! as a bit set and are written as `|`-separated names, e.g. `"DARK|GRAY"`.
//!
//! | name         | bit | value |
//! |--------------|-----|-------|
//! | `DARK`       | 0   | 1     |
//! | `GRAY`       | 1   | 2     |
//! | `BRIGHT`     | 2   | 4     |
//! | `POOR`       | 3   | 8     |
//! | `TWILIGHT12` | 4   | 16    |
//! | `TWILIGHT18` | 5   | 32    |
//!
//! See also
//! ------------
//! * [`ObsConditions::contains`] – Containment test used to validate a ledger request
//!   against the category declared by a target file.
use std::fmt;
use std::str::FromStr;

use crate::mtl_errors::MtlError;

/// Names of the observing conditions, indexed by bit.
pub const OBSCONDITION_NAMES: [&str; 6] =
    ["DARK", "GRAY", "BRIGHT", "POOR", "TWILIGHT12", "TWILIGHT18"];

/// A set of observing conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ObsConditions(i64);

impl ObsConditions {
    pub const DARK: ObsConditions = ObsConditions(1);
    pub const GRAY: ObsConditions = ObsConditions(1 << 1);
    pub const BRIGHT: ObsConditions = ObsConditions(1 << 2);
    pub const POOR: ObsConditions = ObsConditions(1 << 3);
    pub const TWILIGHT12: ObsConditions = ObsConditions(1 << 4);
    pub const TWILIGHT18: ObsConditions = ObsConditions(1 << 5);

    /// Every known observing condition.
    pub const ALL: ObsConditions = ObsConditions((1 << OBSCONDITION_NAMES.len()) - 1);

    /// Build a set from raw bits, rejecting unknown bits.
    pub fn from_bits(bits: i64) -> Result<Self, MtlError> {
        if bits & !Self::ALL.0 != 0 {
            return Err(MtlError::UnknownObsCondition(format!("bits {bits:#x}")));
        }
        Ok(ObsConditions(bits))
    }

    /// Look up a single condition by name (case-insensitive).
    pub fn from_name(name: &str) -> Result<Self, MtlError> {
        OBSCONDITION_NAMES
            .iter()
            .position(|n| n.eq_ignore_ascii_case(name.trim()))
            .map(|bit| ObsConditions(1 << bit))
            .ok_or_else(|| MtlError::UnknownObsCondition(name.to_string()))
    }

    #[inline]
    pub fn bits(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// `true` if every condition of `other` is also in `self`.
    #[inline]
    pub fn contains(self, other: ObsConditions) -> bool {
        self.0 & other.0 == other.0
    }

    /// `true` if the two sets share at least one condition.
    #[inline]
    pub fn intersects(self, other: ObsConditions) -> bool {
        self.0 & other.0 != 0
    }

    /// Names of the conditions in this set, in bit order.
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        OBSCONDITION_NAMES
            .iter()
            .enumerate()
            .filter(move |(bit, _)| self.0 & (1 << bit) != 0)
            .map(|(_, name)| *name)
    }
}

impl std::ops::BitOr for ObsConditions {
    type Output = ObsConditions;

    fn bitor(self, rhs: Self) -> Self::Output {
        ObsConditions(self.0 | rhs.0)
    }
}

impl FromStr for ObsConditions {
    type Err = MtlError;

    /// Parse `"DARK|GRAY"`-style strings. The empty string is rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(MtlError::UnknownObsCondition(s.to_string()));
        }
        s.split('|')
            .map(ObsConditions::from_name)
            .try_fold(ObsConditions::default(), |acc, c| Ok(acc | c?))
    }
}

impl fmt::Display for ObsConditions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.names().collect();
        write!(f, "{}", names.join("|"))
    }
}

#[cfg(test)]
mod obscon_test {
    use super::*;

    #[test]
    fn test_parse_combined() {
        let oc: ObsConditions = "DARK|GRAY".parse().unwrap();
        assert_eq!(oc.bits(), 3);
        assert_eq!(oc.to_string(), "DARK|GRAY");

        let bright: ObsConditions = "bright".parse().unwrap();
        assert_eq!(bright, ObsConditions::BRIGHT);
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(
            "DARK|MOON".parse::<ObsConditions>(),
            Err(MtlError::UnknownObsCondition("MOON".into()))
        );
        assert!("".parse::<ObsConditions>().is_err());
    }

    #[test]
    fn test_contains() {
        let header: ObsConditions = "DARK|GRAY".parse().unwrap();
        assert!(header.contains(ObsConditions::DARK));
        assert!(header.contains(header));
        assert!(!header.contains(ObsConditions::BRIGHT));
        assert!(!header.contains(ObsConditions::DARK | ObsConditions::BRIGHT));
    }

    #[test]
    fn test_from_bits() {
        assert_eq!(ObsConditions::from_bits(5).unwrap().to_string(), "DARK|BRIGHT");
        assert!(ObsConditions::from_bits(1 << 10).is_err());
    }
}
