//! # Record alignment
//!
//! Align a redshift catalog onto the row order of a target catalog through a
//! `TARGETID → row` hash index, in `O(N + M)`.
use std::collections::HashMap;

use ahash::RandomState;

use crate::constants::TargetId;
use crate::mtl_errors::MtlError;
use crate::targets::TargetRecord;
use crate::zcat::RedshiftCatalog;

/// Row index of every target, keyed by `TARGETID`.
#[derive(Debug, Clone, Default)]
pub struct TargetIndex {
    rows: HashMap<TargetId, usize, RandomState>,
}

impl TargetIndex {
    /// Index the rows of a target catalog.
    ///
    /// Identifiers are assumed unique; if one repeats, the last row wins.
    pub fn new(targets: &[TargetRecord]) -> Self {
        let mut rows = HashMap::with_capacity_and_hasher(targets.len(), RandomState::new());
        rows.extend(targets.iter().enumerate().map(|(i, t)| (t.targetid, i)));
        TargetIndex { rows }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[inline]
    pub fn contains(&self, targetid: TargetId) -> bool {
        self.rows.contains_key(&targetid)
    }

    /// Identity alignment `0..n`, used when the redshift catalog is one-to-one with the targets.
    pub fn identity(n: usize) -> Vec<usize> {
        (0..n).collect()
    }

    /// Drop redshift rows whose identifier is unknown, returning how many were dropped.
    pub fn retain_known(&self, zcat: &mut RedshiftCatalog) -> usize {
        let before = zcat.len();
        zcat.rows.retain(|z| self.contains(z.targetid));
        before - zcat.len()
    }

    /// Target row matching every redshift row.
    ///
    /// Return
    /// ----------
    /// * A vector of the same length as `zcat`, element `i` being the target row of
    ///   `zcat.rows[i]`.
    /// * `Err(MtlError::UnmatchedTargetId)` for the first identifier missing from the index.
    ///   Callers filter with [`retain_known`](TargetIndex::retain_known) first.
    pub fn align(&self, zcat: &RedshiftCatalog) -> Result<Vec<usize>, MtlError> {
        zcat.rows
            .iter()
            .map(|z| {
                self.rows
                    .get(&z.targetid)
                    .copied()
                    .ok_or(MtlError::UnmatchedTargetId(z.targetid))
            })
            .collect()
    }
}

#[cfg(test)]
mod align_test {
    use super::*;
    use crate::zcat::Redshift;

    fn targets(ids: &[i64]) -> Vec<TargetRecord> {
        ids.iter()
            .map(|id| TargetRecord::new(*id, 0., 0., 100, 1))
            .collect()
    }

    #[test]
    fn test_align() {
        let index = TargetIndex::new(&targets(&[10, 20, 30, 40, 50]));
        let zcat = RedshiftCatalog::new(vec![
            Redshift::unobserved(40),
            Redshift::unobserved(10),
            Redshift::unobserved(30),
        ]);
        assert_eq!(index.align(&zcat).unwrap(), vec![3, 0, 2]);
    }

    #[test]
    fn test_align_unknown_is_fatal() {
        let index = TargetIndex::new(&targets(&[1, 2]));
        let zcat = RedshiftCatalog::new(vec![Redshift::unobserved(3)]);
        assert_eq!(index.align(&zcat), Err(MtlError::UnmatchedTargetId(3)));
    }

    #[test]
    fn test_retain_known() {
        let index = TargetIndex::new(&targets(&[1, 2]));
        let mut zcat = RedshiftCatalog::new(vec![
            Redshift::unobserved(1),
            Redshift::unobserved(99),
            Redshift::unobserved(2),
        ]);
        assert_eq!(index.retain_known(&mut zcat), 1);
        assert_eq!(index.align(&zcat).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_identity() {
        assert_eq!(TargetIndex::identity(3), vec![0, 1, 2]);
        assert!(TargetIndex::identity(0).is_empty());
    }
}
