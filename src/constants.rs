//! # Constants and type definitions for MTL
//!
//! This module centralizes the **column names**, **sentinel values**, and **common type
//! definitions** used throughout the `mtl` library.
//!
//! ## Overview
//!
//! - Column names of the merged target list (MTL) data model
//! - Default (sentinel) values used when a redshift field is missing
//! - Fixed widths of the string columns of a ledger
//! - The three reserved terminal priorities
//!
//! These definitions are used by the reconciliation engine, the state classifier,
//! and the ledger writers.

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Unique 64-bit target identifier (`TARGETID`)
pub type TargetId = i64;
/// Observation priority (larger number = higher priority)
pub type Priority = i64;
/// HEALPixel number in the NESTED scheme
pub type PixNum = u64;
/// Angle in degrees
pub type Degree = f64;

// -------------------------------------------------------------------------------------------------
// Sentinel values
// -------------------------------------------------------------------------------------------------

/// Observed count assigned to a target never observed (masked `NUMOBS`)
pub const UNOBS_NUMOBS: i64 = 0;

/// Redshift assigned to a target without a measurement (masked `Z`)
pub const UNOBS_Z: f64 = -1.0;

/// Redshift warning flag assigned to a target without a measurement (masked `ZWARN`)
pub const UNOBS_ZWARN: i64 = -1;

// -------------------------------------------------------------------------------------------------
// Ledger layout
// -------------------------------------------------------------------------------------------------

/// Width of the `TIMESTAMP` column (ISO-8601, seconds precision)
pub const TIMESTAMP_WIDTH: usize = 19;

/// Width of the `TARGET_STATE` column
pub const TARGET_STATE_WIDTH: usize = 20;

/// `strftime` pattern producing a [`TIMESTAMP_WIDTH`]-wide UTC timestamp
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Label of a target whose initial priority matches no bit name
pub const NOSTATE: &str = "NOSTATE";

/// Label of every target with an initial priority of zero
pub const CALIBRATION: &str = "CALIBRATION";

/// Key of the priority used by the state classifier
pub const UNOBS_KEY: &str = "UNOBS";

/// Extension name stamped in the ledger header
pub const MTL_EXTNAME: &str = "MTL";

/// HEALPix `nside` of the ledger files, used when a target source declares no `FILENSID`
pub const MTL_NSIDE: u32 = 32;

/// Environment variable naming the root directory of the ledgers
pub const MTL_DIR_ENV: &str = "MTL_DIR";

/// Column names of the MTL data model, main-survey flavor, in ledger order.
///
/// The four `*_TARGET` class columns are renamed on the fly for commissioning
/// and SV catalogs (see [`Flavor::ledger_columns`](crate::targets::flavor::Flavor::ledger_columns)).
pub const MTL_COLUMNS: [&str; 22] = [
    "RA",
    "DEC",
    "PARALLAX",
    "PMRA",
    "PMDEC",
    "REF_EPOCH",
    "DESI_TARGET",
    "BGS_TARGET",
    "MWS_TARGET",
    "SCND_TARGET",
    "TARGETID",
    "SUBPRIORITY",
    "OBSCONDITIONS",
    "PRIORITY_INIT",
    "NUMOBS_INIT",
    "PRIORITY",
    "NUMOBS",
    "NUMOBS_MORE",
    "Z",
    "ZWARN",
    "TIMESTAMP",
    "TARGET_STATE",
];

// -------------------------------------------------------------------------------------------------
// Terminal priorities
// -------------------------------------------------------------------------------------------------

/// Reserved priorities meaning that a target needs no further observation.
///
/// A target reconciled to one of these priorities always ends with
/// `NUMOBS_MORE == 0`, whatever the rule evaluator computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum TerminalPriority {
    /// The target must not be observed.
    DoNotObserve = 0,
    /// The target was observed and needs no more exposures.
    Observed = 1,
    /// The target is done.
    Done = 2,
}

impl TerminalPriority {
    /// All terminal priorities, in increasing value.
    pub const ALL: [TerminalPriority; 3] = [
        TerminalPriority::DoNotObserve,
        TerminalPriority::Observed,
        TerminalPriority::Done,
    ];

    /// Priority values of [`TerminalPriority::ALL`].
    pub const VALUES: [Priority; 3] = [
        TerminalPriority::DoNotObserve as Priority,
        TerminalPriority::Observed as Priority,
        TerminalPriority::Done as Priority,
    ];

    #[inline]
    pub fn value(self) -> Priority {
        self as Priority
    }

    /// Resolve a priority value to a terminal priority, by identity.
    pub fn from_priority(priority: Priority) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.value() == priority)
    }
}
