//! # Reconciliation engine
//!
//! [`make_mtl`] merges a target catalog with an (optional) redshift catalog and an
//! (optional) set of secondary targets into an [`MtlTable`].
//!
//! ## Pipeline
//! -----------------
//! 1. **Secondary padding** – secondaries are appended as zero-filled rows of the target
//!    layout; only the columns shared by name are copied. A provenance mask remembers which
//!    rows came from the secondaries.
//! 2. **Redshift filtering** – redshift rows with an unknown `TARGETID` are dropped with a
//!    warning.
//! 3. **Legacy names** – `NUMOBS` / `PRIORITY` target columns are renamed `*_INIT`.
//! 4. **Default observation state** – without a redshift catalog every target is
//!    unobserved (`NUMOBS = 0`, `Z = -1`, `ZWARN = -1`) and aligned to itself.
//! 5. **Alignment** – every redshift row is mapped onto its target row.
//! 6. **Rules** – remaining observations and priority are evaluated for the aligned rows.
//! 7. **Terminal priorities** – a terminal priority forces the remaining count to zero.
//! 8. **Observing conditions** – computed for all rows, then recomputed for secondary rows
//!    through the secondary path.
//! 9. **Assembly** – every row starts from its `*_INIT` values; only aligned rows are
//!    overwritten with the evaluated results.
//! 10. **Trim** – optionally drop rows that need no more observations.
//!
//! ## Error Semantics
//! -----------------
//! * Empty inputs produce an empty table.
//! * Unknown redshift identifiers are a warning, never an error.
//! * Rule evaluators returning the wrong number of values raise
//!   [`MtlError::LengthMismatch`].
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::mtl::align::TargetIndex;
use crate::mtl::{MtlOptions, MtlRecord, MtlReport, MtlTable};
use crate::mtl_errors::MtlError;
use crate::targets::rules::TargetRules;
use crate::targets::{SecondaryCatalog, TargetCatalog, TargetRecord};
use crate::zcat::RedshiftCatalog;

/// Append `scnd` to `targets` as zero-filled rows carrying the shared columns.
///
/// Return
/// ----------
/// * The provenance mask, `true` for rows that came from `scnd`, aligned with the padded
///   row order.
pub fn pad_secondaries(targets: &mut TargetCatalog, scnd: &SecondaryCatalog) -> Vec<bool> {
    let shared = targets.shared_columns(&scnd.column_names);
    let n_primary = targets.len();

    targets.rows.extend(scnd.rows.iter().map(|src| {
        let mut padded = TargetRecord::default();
        for col in &shared {
            col.copy(src, &mut padded);
        }
        padded
    }));

    let mut is_secondary = vec![false; targets.len()];
    is_secondary[n_primary..].fill(true);
    is_secondary
}

fn check_len(expected: usize, found: usize) -> Result<(), MtlError> {
    if expected != found {
        return Err(MtlError::LengthMismatch { expected, found });
    }
    Ok(())
}

/// Build a merged target list.
///
/// Arguments
/// -----------------
/// * `targets`: Target catalog with at least `TARGETID`, the class columns of its flavor,
///   `PRIORITY_INIT` and `NUMOBS_INIT` (or their legacy names).
/// * `options`: Observing conditions governing the rules, and the trim flag.
/// * `zcat`: Optional redshift catalog, already sentinel-filled.
/// * `scnd`: Optional secondary targets to pad the catalog with.
/// * `rules`: Evaluators for remaining observations, priority, and observing conditions.
///
/// Return
/// ----------
/// * The [`MtlTable`], with one row per (possibly padded) target unless trimmed, and the
///   [`MtlReport`] of the run.
///
/// See also
/// ------------
/// * [`TargetIndex`] – Alignment of the redshift catalog.
/// * [`TargetRules`] – Rule evaluators.
pub fn make_mtl<R: TargetRules + ?Sized>(
    mut targets: TargetCatalog,
    options: &MtlOptions,
    zcat: Option<RedshiftCatalog>,
    scnd: Option<&SecondaryCatalog>,
    rules: &R,
) -> Result<MtlTable, MtlError> {
    let start = Instant::now();
    let flavor = targets.flavor;
    let obscon = options.obscon;
    let mut report = MtlReport {
        n_input: targets.len(),
        ..Default::default()
    };

    let is_secondary = match scnd {
        Some(scnd) => {
            info!(
                primaries = targets.len(),
                secondaries = scnd.len(),
                "Pad primary targets with secondaries"
            );
            report.n_secondary = scnd.len();
            pad_secondaries(&mut targets, scnd)
        }
        None => vec![false; targets.len()],
    };

    let index = TargetIndex::new(&targets.rows);
    let zcat = zcat.map(|mut zcat| {
        let dropped = index.retain_known(&mut zcat);
        if dropped > 0 {
            warn!(
                dropped,
                "Ignoring {dropped} zcat entries that aren't in the input target list"
            );
        }
        report.n_dropped_zcat = dropped;
        zcat
    });

    let renamed = targets.rename_legacy_columns();
    if !renamed.is_empty() {
        debug!(?renamed, "Renamed legacy target columns to *_INIT");
    }

    let n = targets.len();
    let (zcat, zmatcher) = match zcat {
        Some(zcat) => {
            let zmatcher = index.align(&zcat)?;
            (zcat, zmatcher)
        }
        None => (
            RedshiftCatalog::unobserved(&targets.rows),
            TargetIndex::identity(n),
        ),
    };

    // Only the matched targets can change priority; everything else keeps *_INIT below.
    let targets_zmatcher: Vec<TargetRecord> = zmatcher.iter().map(|&i| targets.rows[i]).collect();
    let mut numobs_more = rules.numobs_more(flavor, &targets_zmatcher, &zcat.rows, obscon)?;
    let priority = rules.priority(flavor, &targets_zmatcher, &zcat.rows, obscon)?;
    check_len(zcat.len(), numobs_more.len())?;
    check_len(zcat.len(), priority.len())?;

    let terminal = rules.terminal_priorities();
    for (more, prio) in numobs_more.iter_mut().zip(&priority) {
        if terminal.contains(prio) {
            *more = 0;
            report.n_terminal += 1;
        }
    }
    info!(
        terminal = report.n_terminal,
        total = n,
        "{} of {} targets have a terminal priority, setting N_obs=0",
        report.n_terminal,
        n
    );

    let mut obsconmask = rules.obsconditions(flavor, &targets.rows, false)?;
    check_len(n, obsconmask.len())?;
    if scnd.is_some() {
        let scnd_rows: Vec<TargetRecord> = targets
            .rows
            .iter()
            .zip(&is_secondary)
            .filter(|(_, s)| **s)
            .map(|(t, _)| *t)
            .collect();
        let scnd_mask = rules.obsconditions(flavor, &scnd_rows, true)?;
        check_len(scnd_rows.len(), scnd_mask.len())?;

        let slots = obsconmask
            .iter_mut()
            .zip(&is_secondary)
            .filter(|(_, s)| **s)
            .map(|(slot, _)| slot);
        for (slot, value) in slots.zip(scnd_mask) {
            *slot = value;
        }
    }

    let mut rows: Vec<MtlRecord> = targets
        .rows
        .iter()
        .zip(&obsconmask)
        .map(|(t, oc)| MtlRecord {
            obsconditions: *oc,
            ..MtlRecord::initial(*t)
        })
        .collect();
    for ((&row, prio), more) in zmatcher.iter().zip(&priority).zip(&numobs_more) {
        rows[row].priority = *prio;
        rows[row].numobs_more = *more;
    }

    let mut mtl = MtlTable {
        flavor,
        rows,
        report,
    };

    if options.trim {
        let total = mtl.len();
        let done = mtl.trim();
        info!(done, total, "{done} of {total} targets are done, trimming these");
    }

    info!(
        rows = mtl.len(),
        elapsed = ?start.elapsed(),
        "Done building MTL"
    );

    Ok(mtl)
}
