//! # Merged target lists
//!
//! A **merged target list** (MTL) is the reconciled view of a target catalog and a redshift
//! catalog: every target with its current priority, the number of observations it still
//! needs, and the observing conditions under which it may be observed.
//!
//! Modules
//! -----------------
//! * [`align`] – `TARGETID` hash index aligning a redshift catalog onto target rows.
//! * [`merge`] – The reconciliation engine, [`make_mtl`](crate::mtl::merge::make_mtl).
//! * [`state`] – `TARGET_STATE` labels derived from initial priorities.
//!
//! Data Model
//! -----------------
//! * **Row:** [`MtlRecord`] = the target columns plus `OBSCONDITIONS`, `PRIORITY`,
//!   `NUMOBS`, `NUMOBS_MORE`, `Z`, `ZWARN`, `TIMESTAMP`, `TARGET_STATE`.
//! * **Table:** [`MtlTable`] = flavor + rows + the [`MtlReport`] of the run that built it.
//! * **Options:** [`MtlOptions`], built and validated by [`MtlOptionsBuilder`].
//!
//! Quick-Start
//! -----------------
//! ```rust,no_run
//! use mtl::mtl::{merge::make_mtl, MtlOptions};
//! use mtl::targets::{rules::BitmaskRules, Flavor, TargetCatalog, TargetRecord};
//!
//! # fn run() -> Result<(), mtl::mtl_errors::MtlError> {
//! let targets = TargetCatalog::with_all_columns(
//!     Flavor::Main,
//!     vec![TargetRecord::new(1, 150.0, 2.0, 3200, 2)],
//! );
//! let options = MtlOptions::builder().obscon("DARK|GRAY")?.trim(true).build()?;
//! let mtl = make_mtl(targets, &options, None, None, &BitmaskRules::builtin())?;
//! eprintln!("{:#}", mtl.report);
//! # Ok(()) }
//! ```
use std::fmt;

use crate::constants::{Priority, UNOBS_NUMOBS, UNOBS_Z, UNOBS_ZWARN};
use crate::mtl_errors::MtlError;
use crate::obscon::ObsConditions;
use crate::targets::{Flavor, TargetRecord};

pub mod align;
pub mod merge;
pub mod state;

use state::TargetState;

/// One row of a merged target list.
#[derive(Debug, Clone, PartialEq)]
pub struct MtlRecord {
    pub target: TargetRecord,
    pub obsconditions: i64,
    pub priority: Priority,
    pub numobs: i64,
    pub numobs_more: i64,
    pub z: f64,
    pub zwarn: i64,
    /// Creation time, empty until a ledger is stamped.
    pub timestamp: String,
    pub target_state: TargetState,
}

impl MtlRecord {
    /// Row in its initial state: current priority and remaining count from the `*_INIT` columns.
    pub fn initial(target: TargetRecord) -> Self {
        MtlRecord {
            target,
            obsconditions: 0,
            priority: target.priority_init,
            numobs: UNOBS_NUMOBS,
            numobs_more: target.numobs_init,
            z: UNOBS_Z,
            zwarn: UNOBS_ZWARN,
            timestamp: String::new(),
            target_state: TargetState::default(),
        }
    }
}

/// Operational counts of one reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MtlReport {
    /// Primary targets received.
    pub n_input: usize,
    /// Secondary targets appended.
    pub n_secondary: usize,
    /// Redshift rows ignored because their `TARGETID` is not a target.
    pub n_dropped_zcat: usize,
    /// Matched targets whose priority is terminal (remaining count forced to zero).
    pub n_terminal: usize,
    /// Rows removed by trimming.
    pub n_trimmed: usize,
}

impl fmt::Display for MtlReport {
    /// Compact by default; multi-line with the alternate flag (`{:#}`).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            writeln!(f, "MTL reconciliation summary")?;
            writeln!(f, "--------------------------")?;
            writeln!(f, "targets    : {}", self.n_input)?;
            writeln!(f, "secondaries: {}", self.n_secondary)?;
            writeln!(f, "zcat drops : {}", self.n_dropped_zcat)?;
            writeln!(f, "terminal   : {}", self.n_terminal)?;
            write!(f, "trimmed    : {}", self.n_trimmed)
        } else {
            write!(
                f,
                "targets={}, secondaries={}, zcat_dropped={}, terminal={}, trimmed={}",
                self.n_input, self.n_secondary, self.n_dropped_zcat, self.n_terminal, self.n_trimmed
            )
        }
    }
}

/// A merged target list.
#[derive(Debug, Clone, PartialEq)]
pub struct MtlTable {
    pub flavor: Flavor,
    pub rows: Vec<MtlRecord>,
    pub report: MtlReport,
}

impl MtlTable {
    /// Extension name of the table.
    pub const EXTNAME: &'static str = crate::constants::MTL_EXTNAME;

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Ledger column names for this table's flavor.
    pub fn column_names(&self) -> Vec<String> {
        self.flavor.ledger_columns()
    }

    /// Drop every row that needs no more observations, returning how many were dropped.
    pub fn trim(&mut self) -> usize {
        let before = self.rows.len();
        self.rows.retain(|r| r.numobs_more > 0);
        let dropped = before - self.rows.len();
        self.report.n_trimmed += dropped;
        dropped
    }

    /// Stamp every row with the same creation time.
    pub fn stamp(&mut self, timestamp: &str) {
        for row in self.rows.iter_mut() {
            row.timestamp = timestamp.to_string();
        }
    }

    pub fn find(&self, targetid: i64) -> Option<&MtlRecord> {
        self.rows.iter().find(|r| r.target.targetid == targetid)
    }
}

/// Options of a reconciliation.
///
/// Fields
/// -----------------
/// * `obscon` – Observing conditions governing the priority rules (e.g. `DARK|GRAY`).
/// * `trim` – Drop targets that need no more observations (default `false`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MtlOptions {
    pub obscon: ObsConditions,
    pub trim: bool,
}

impl MtlOptions {
    pub fn builder() -> MtlOptionsBuilder {
        MtlOptionsBuilder::new()
    }
}

impl Default for MtlOptions {
    fn default() -> Self {
        MtlOptions {
            obscon: ObsConditions::DARK,
            trim: false,
        }
    }
}

/// Builder for [`MtlOptions`], with validation.
#[derive(Debug, Clone, Default)]
pub struct MtlOptionsBuilder {
    options: MtlOptions,
}

impl MtlOptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observing conditions as a `|`-separated string.
    pub fn obscon(mut self, obscon: &str) -> Result<Self, MtlError> {
        self.options.obscon = obscon.parse()?;
        Ok(self)
    }

    pub fn obsconditions(mut self, obscon: ObsConditions) -> Self {
        self.options.obscon = obscon;
        self
    }

    pub fn trim(mut self, trim: bool) -> Self {
        self.options.trim = trim;
        self
    }

    /// Finalize the options.
    ///
    /// Return
    /// ----------
    /// * `Err(MtlError::InvalidMtlParameter)` if no observing condition is selected.
    pub fn build(self) -> Result<MtlOptions, MtlError> {
        if self.options.obscon.is_empty() {
            return Err(MtlError::InvalidMtlParameter(
                "obscon must name at least one observing condition".into(),
            ));
        }
        Ok(self.options)
    }
}
