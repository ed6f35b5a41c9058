//! # Target catalogs
//!
//! Targets are the static input of the merged target list: one [`TargetRecord`] per
//! astronomical target, grouped into a [`TargetCatalog`] that remembers which columns the
//! source actually carried and which survey [`Flavor`] it belongs to.
//!
//! Modules
//! -----------------
//! * [`flavor`] – Closed set of survey flavors and their column names.
//! * [`bitmask`] – Bit definitions (names, obsconditions, priorities) of the class columns.
//! * [`rules`] – Priority / remaining-observation / obsconditions evaluators.
//!
//! Data Model
//! -----------------
//! * **Row:** [`TargetRecord`], canonical fields independent of the flavor.
//! * **Columns:** [`TargetColumn`], closed enum mapped to on-disk names through a [`Flavor`].
//! * **Catalog:** [`TargetCatalog`] = flavor + raw column names + rows.
//! * **Secondaries:** [`SecondaryCatalog`], rows that pad a primary catalog. Only columns
//!   shared by name with the primary catalog survive the padding.
//!
//! Invariants
//! -----------------
//! * `TARGETID` is unique within a catalog.
//! * All rows of a catalog share one flavor.
use std::collections::HashSet;
use std::fmt;

use crate::constants::{Priority, TargetId};

pub mod bitmask;
pub mod flavor;
pub mod rules;

pub use flavor::Flavor;

/// Canonical columns of a target catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetColumn {
    Ra,
    Dec,
    Parallax,
    Pmra,
    Pmdec,
    RefEpoch,
    DesiTarget,
    BgsTarget,
    MwsTarget,
    ScndTarget,
    TargetId,
    Subpriority,
    PriorityInit,
    NumobsInit,
}

impl TargetColumn {
    pub const ALL: [TargetColumn; 14] = [
        TargetColumn::Ra,
        TargetColumn::Dec,
        TargetColumn::Parallax,
        TargetColumn::Pmra,
        TargetColumn::Pmdec,
        TargetColumn::RefEpoch,
        TargetColumn::DesiTarget,
        TargetColumn::BgsTarget,
        TargetColumn::MwsTarget,
        TargetColumn::ScndTarget,
        TargetColumn::TargetId,
        TargetColumn::Subpriority,
        TargetColumn::PriorityInit,
        TargetColumn::NumobsInit,
    ];

    /// Name of the column in a main-survey catalog.
    pub fn main_name(&self) -> &'static str {
        match self {
            TargetColumn::Ra => "RA",
            TargetColumn::Dec => "DEC",
            TargetColumn::Parallax => "PARALLAX",
            TargetColumn::Pmra => "PMRA",
            TargetColumn::Pmdec => "PMDEC",
            TargetColumn::RefEpoch => "REF_EPOCH",
            TargetColumn::DesiTarget => "DESI_TARGET",
            TargetColumn::BgsTarget => "BGS_TARGET",
            TargetColumn::MwsTarget => "MWS_TARGET",
            TargetColumn::ScndTarget => "SCND_TARGET",
            TargetColumn::TargetId => "TARGETID",
            TargetColumn::Subpriority => "SUBPRIORITY",
            TargetColumn::PriorityInit => "PRIORITY_INIT",
            TargetColumn::NumobsInit => "NUMOBS_INIT",
        }
    }

    /// Legacy name still found in old catalogs, if any.
    pub fn legacy_name(&self) -> Option<&'static str> {
        match self {
            TargetColumn::PriorityInit => Some("PRIORITY"),
            TargetColumn::NumobsInit => Some("NUMOBS"),
            _ => None,
        }
    }

    /// `true` for the flavor-dependent class-bitmask columns.
    pub fn is_class(&self) -> bool {
        matches!(
            self,
            TargetColumn::DesiTarget
                | TargetColumn::BgsTarget
                | TargetColumn::MwsTarget
                | TargetColumn::ScndTarget
        )
    }

    pub(crate) fn from_main_name(name: &str) -> Option<TargetColumn> {
        Self::ALL.into_iter().find(|c| c.main_name() == name)
    }

    /// Resolve an on-disk column name for a given flavor, legacy names included.
    pub fn from_name(name: &str, flavor: Flavor) -> Option<TargetColumn> {
        Self::ALL.into_iter().find(|c| {
            flavor.column_name(*c).as_deref() == Some(name) || c.legacy_name() == Some(name)
        })
    }

    /// Value of this column in `rec`.
    pub fn value(&self, rec: &TargetRecord) -> ColumnValue {
        match self {
            TargetColumn::Ra => ColumnValue::Float64(rec.ra),
            TargetColumn::Dec => ColumnValue::Float64(rec.dec),
            TargetColumn::Parallax => ColumnValue::Float32(rec.parallax),
            TargetColumn::Pmra => ColumnValue::Float32(rec.pmra),
            TargetColumn::Pmdec => ColumnValue::Float32(rec.pmdec),
            TargetColumn::RefEpoch => ColumnValue::Float32(rec.ref_epoch),
            TargetColumn::DesiTarget => ColumnValue::Int64(rec.desi_target),
            TargetColumn::BgsTarget => ColumnValue::Int64(rec.bgs_target),
            TargetColumn::MwsTarget => ColumnValue::Int64(rec.mws_target),
            TargetColumn::ScndTarget => ColumnValue::Int64(rec.scnd_target),
            TargetColumn::TargetId => ColumnValue::Int64(rec.targetid),
            TargetColumn::Subpriority => ColumnValue::Float64(rec.subpriority),
            TargetColumn::PriorityInit => ColumnValue::Int64(rec.priority_init),
            TargetColumn::NumobsInit => ColumnValue::Int64(rec.numobs_init),
        }
    }

    /// Store `value` in this column of `rec`, cast to the column type.
    pub fn set_value(&self, rec: &mut TargetRecord, value: ColumnValue) {
        match self {
            TargetColumn::Ra => rec.ra = value.as_f64(),
            TargetColumn::Dec => rec.dec = value.as_f64(),
            TargetColumn::Parallax => rec.parallax = value.as_f64() as f32,
            TargetColumn::Pmra => rec.pmra = value.as_f64() as f32,
            TargetColumn::Pmdec => rec.pmdec = value.as_f64() as f32,
            TargetColumn::RefEpoch => rec.ref_epoch = value.as_f64() as f32,
            TargetColumn::DesiTarget => rec.desi_target = value.as_i64(),
            TargetColumn::BgsTarget => rec.bgs_target = value.as_i64(),
            TargetColumn::MwsTarget => rec.mws_target = value.as_i64(),
            TargetColumn::ScndTarget => rec.scnd_target = value.as_i64(),
            TargetColumn::TargetId => rec.targetid = value.as_i64(),
            TargetColumn::Subpriority => rec.subpriority = value.as_f64(),
            TargetColumn::PriorityInit => rec.priority_init = value.as_i64(),
            TargetColumn::NumobsInit => rec.numobs_init = value.as_i64(),
        }
    }

    /// Copy the value of this column from `src` into `dst`.
    #[inline]
    pub fn copy(&self, src: &TargetRecord, dst: &mut TargetRecord) {
        self.set_value(dst, self.value(src));
    }
}

/// A single cell of a target catalog, in its storage type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnValue {
    Float64(f64),
    Float32(f32),
    Int64(i64),
}

impl ColumnValue {
    pub fn as_f64(self) -> f64 {
        match self {
            ColumnValue::Float64(v) => v,
            ColumnValue::Float32(v) => v as f64,
            ColumnValue::Int64(v) => v as f64,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            ColumnValue::Float64(v) => v as i64,
            ColumnValue::Float32(v) => v as i64,
            ColumnValue::Int64(v) => v,
        }
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Float64(v) => write!(f, "{v}"),
            ColumnValue::Float32(v) => write!(f, "{v}"),
            ColumnValue::Int64(v) => write!(f, "{v}"),
        }
    }
}

/// One astronomical target.
///
/// Fields
/// -----------------
/// * `ra`, `dec` – Sky position (**degrees**).
/// * `parallax`, `pmra`, `pmdec`, `ref_epoch` – Astrometric parameters (zero when absent).
/// * `desi_target`, `bgs_target`, `mws_target`, `scnd_target` – Class bitmasks. For commissioning
///   catalogs only `desi_target` (read from `CMX_TARGET`) is used.
/// * `targetid` – Unique identifier.
/// * `subpriority` – Random tie-breaker between targets of equal priority.
/// * `priority_init` – Priority of the target before any observation.
/// * `numobs_init` – Number of observations requested before any observation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TargetRecord {
    pub ra: f64,
    pub dec: f64,
    pub parallax: f32,
    pub pmra: f32,
    pub pmdec: f32,
    pub ref_epoch: f32,
    pub desi_target: i64,
    pub bgs_target: i64,
    pub mws_target: i64,
    pub scnd_target: i64,
    pub targetid: TargetId,
    pub subpriority: f64,
    pub priority_init: Priority,
    pub numobs_init: i64,
}

impl TargetRecord {
    /// Minimal record: identifier, position, initial priority and observation count.
    pub fn new(
        targetid: TargetId,
        ra: f64,
        dec: f64,
        priority_init: Priority,
        numobs_init: i64,
    ) -> Self {
        TargetRecord {
            targetid,
            ra,
            dec,
            priority_init,
            numobs_init,
            ..Default::default()
        }
    }

    /// Class bitmasks in canonical order `[desi, bgs, mws, scnd]`.
    #[inline]
    pub fn class_bits(&self) -> [i64; 4] {
        [
            self.desi_target,
            self.bgs_target,
            self.mws_target,
            self.scnd_target,
        ]
    }
}

/// A set of targets of a single flavor.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetCatalog {
    pub flavor: Flavor,
    /// Raw column names carried by the source, possibly with legacy names.
    pub column_names: Vec<String>,
    pub rows: Vec<TargetRecord>,
}

impl TargetCatalog {
    pub fn new(flavor: Flavor, column_names: Vec<String>, rows: Vec<TargetRecord>) -> Self {
        TargetCatalog {
            flavor,
            column_names,
            rows,
        }
    }

    /// Catalog carrying every column of the flavor.
    pub fn with_all_columns(flavor: Flavor, rows: Vec<TargetRecord>) -> Self {
        let column_names = TargetColumn::ALL
            .iter()
            .filter_map(|c| flavor.column_name(*c))
            .collect();
        TargetCatalog::new(flavor, column_names, rows)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_names.iter().any(|c| c == name)
    }

    /// Canonical columns present under the same name in both `self` and `column_names`.
    pub fn shared_columns(&self, column_names: &[String]) -> Vec<TargetColumn> {
        let theirs: HashSet<&str> = column_names.iter().map(String::as_str).collect();
        let mut shared: Vec<TargetColumn> = self
            .column_names
            .iter()
            .filter(|name| theirs.contains(name.as_str()))
            .filter_map(|name| TargetColumn::from_name(name, self.flavor))
            .collect();
        shared.sort_unstable();
        shared.dedup();
        shared
    }

    /// Rename legacy `NUMOBS` / `PRIORITY` columns to `NUMOBS_INIT` / `PRIORITY_INIT`.
    ///
    /// Values already live in the canonical `*_init` fields; only the recorded
    /// column names change. Returns the legacy names that were renamed.
    pub fn rename_legacy_columns(&mut self) -> Vec<&'static str> {
        let mut renamed = Vec::new();
        for col in [TargetColumn::NumobsInit, TargetColumn::PriorityInit] {
            let Some(legacy) = col.legacy_name() else {
                continue;
            };
            for name in self.column_names.iter_mut().filter(|n| n.as_str() == legacy) {
                *name = col.main_name().to_string();
                renamed.push(legacy);
            }
        }
        renamed
    }

    /// Keep only the rows selected by `keep`, in order.
    pub fn select(&self, keep: &[bool]) -> TargetCatalog {
        TargetCatalog {
            flavor: self.flavor,
            column_names: self.column_names.clone(),
            rows: self
                .rows
                .iter()
                .zip(keep)
                .filter(|(_, k)| **k)
                .map(|(r, _)| *r)
                .collect(),
        }
    }
}

/// Secondary targets used to pad a primary catalog.
///
/// The column set may differ from the primary one; only the shared columns are copied.
#[derive(Debug, Clone, PartialEq)]
pub struct SecondaryCatalog {
    pub column_names: Vec<String>,
    pub rows: Vec<TargetRecord>,
}

impl SecondaryCatalog {
    pub fn new(column_names: Vec<String>, rows: Vec<TargetRecord>) -> Self {
        SecondaryCatalog { column_names, rows }
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
mod targets_test {
    use super::*;

    #[test]
    fn test_from_name_flavors() {
        assert_eq!(
            TargetColumn::from_name("SV1_BGS_TARGET", Flavor::Sv(1)),
            Some(TargetColumn::BgsTarget)
        );
        assert_eq!(TargetColumn::from_name("BGS_TARGET", Flavor::Sv(1)), None);
        assert_eq!(
            TargetColumn::from_name("CMX_TARGET", Flavor::Cmx),
            Some(TargetColumn::DesiTarget)
        );
        assert_eq!(
            TargetColumn::from_name("PRIORITY", Flavor::Main),
            Some(TargetColumn::PriorityInit)
        );
    }

    #[test]
    fn test_column_values() {
        let mut rec = TargetRecord::new(7, 10.5, -3.0, 3000, 2);
        assert_eq!(TargetColumn::Ra.value(&rec), ColumnValue::Float64(10.5));
        assert_eq!(TargetColumn::TargetId.value(&rec).to_string(), "7");

        TargetColumn::Pmra.set_value(&mut rec, ColumnValue::Float64(1.25));
        TargetColumn::NumobsInit.set_value(&mut rec, ColumnValue::Float32(4.0));
        assert_eq!(rec.pmra, 1.25);
        assert_eq!(rec.numobs_init, 4);
    }

    #[test]
    fn test_shared_columns() {
        let cat = TargetCatalog::new(
            Flavor::Main,
            vec!["TARGETID".into(), "RA".into(), "DESI_TARGET".into()],
            vec![],
        );
        let shared = cat.shared_columns(&["RA".into(), "TARGETID".into(), "FOO".into()]);
        assert_eq!(shared, vec![TargetColumn::Ra, TargetColumn::TargetId]);
    }

    #[test]
    fn test_rename_legacy() {
        let mut cat = TargetCatalog::new(
            Flavor::Main,
            vec!["TARGETID".into(), "NUMOBS".into(), "PRIORITY".into()],
            vec![],
        );
        assert_eq!(cat.rename_legacy_columns(), vec!["NUMOBS", "PRIORITY"]);
        assert!(cat.has_column("NUMOBS_INIT"));
        assert!(cat.has_column("PRIORITY_INIT"));
        assert!(cat.rename_legacy_columns().is_empty());
    }

    #[test]
    fn test_select() {
        let cat = TargetCatalog::with_all_columns(
            Flavor::Main,
            vec![
                TargetRecord::new(1, 0., 0., 10, 1),
                TargetRecord::new(2, 0., 0., 20, 1),
            ],
        );
        let sub = cat.select(&[false, true]);
        assert_eq!(sub.len(), 1);
        assert_eq!(sub.rows[0].targetid, 2);
        assert_eq!(sub.column_names, cat.column_names);
    }
}
