//! # Redshift catalogs
//!
//! A redshift catalog ("zcat") carries the observation state of targets: how many times
//! each was observed, the measured redshift, and the redshift warning flag. Real catalogs
//! may have **masked** (missing) fields; these are repaired **once**, at ingestion, by
//! [`RedshiftCatalog::from_masked`]:
//!
//! | field    | sentinel |
//! |----------|----------|
//! | `NUMOBS` | `0`      |
//! | `Z`      | `-1`     |
//! | `ZWARN`  | `-1`     |
//!
//! Downstream code only sees filled [`Redshift`] rows and never special-cases "missing".
use crate::constants::{TargetId, UNOBS_NUMOBS, UNOBS_Z, UNOBS_ZWARN};
use crate::targets::TargetRecord;

/// A redshift-catalog row as read from a source, fields possibly masked.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MaskedRedshift {
    pub targetid: TargetId,
    pub numobs: Option<i64>,
    pub z: Option<f64>,
    pub zwarn: Option<i64>,
}

impl MaskedRedshift {
    /// Replace every masked field by its sentinel.
    #[inline]
    pub fn filled(self) -> Redshift {
        Redshift {
            targetid: self.targetid,
            numobs: self.numobs.unwrap_or(UNOBS_NUMOBS),
            z: self.z.unwrap_or(UNOBS_Z),
            zwarn: self.zwarn.unwrap_or(UNOBS_ZWARN),
        }
    }
}

/// A filled redshift-catalog row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Redshift {
    pub targetid: TargetId,
    pub numobs: i64,
    pub z: f64,
    pub zwarn: i64,
}

impl Redshift {
    pub fn new(targetid: TargetId, numobs: i64, z: f64, zwarn: i64) -> Self {
        Redshift {
            targetid,
            numobs,
            z,
            zwarn,
        }
    }

    /// Observation state of a target never observed.
    pub fn unobserved(targetid: TargetId) -> Self {
        Redshift::new(targetid, UNOBS_NUMOBS, UNOBS_Z, UNOBS_ZWARN)
    }
}

/// Redshift catalog with every field filled.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RedshiftCatalog {
    pub rows: Vec<Redshift>,
}

impl RedshiftCatalog {
    pub fn new(rows: Vec<Redshift>) -> Self {
        RedshiftCatalog { rows }
    }

    /// Build a catalog from masked rows, filling missing fields with sentinels.
    pub fn from_masked(rows: impl IntoIterator<Item = MaskedRedshift>) -> Self {
        RedshiftCatalog {
            rows: rows.into_iter().map(MaskedRedshift::filled).collect(),
        }
    }

    /// One unobserved row per target, in target order.
    pub fn unobserved(targets: &[TargetRecord]) -> Self {
        RedshiftCatalog {
            rows: targets
                .iter()
                .map(|t| Redshift::unobserved(t.targetid))
                .collect(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod zcat_test {
    use super::*;

    #[test]
    fn test_from_masked_fills_sentinels() {
        let zcat = RedshiftCatalog::from_masked([
            MaskedRedshift {
                targetid: 7,
                numobs: Some(2),
                z: Some(1.25),
                zwarn: Some(0),
            },
            MaskedRedshift {
                targetid: 8,
                ..Default::default()
            },
        ]);
        assert_eq!(zcat.rows[0], Redshift::new(7, 2, 1.25, 0));
        assert_eq!(zcat.rows[1], Redshift::new(8, 0, -1.0, -1));
    }

    #[test]
    fn test_unobserved() {
        let targets = [
            TargetRecord::new(3, 0., 0., 100, 1),
            TargetRecord::new(4, 0., 0., 100, 1),
        ];
        let zcat = RedshiftCatalog::unobserved(&targets);
        assert_eq!(zcat.len(), 2);
        assert_eq!(zcat.rows[1], Redshift::unobserved(4));
    }
}
