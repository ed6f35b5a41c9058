//! # Initial HEALPix ledgers
//!
//! A **ledger** is the initial merged target list of one HEALPixel (NESTED ordering) for one
//! observing condition. Building the full set of ledgers is embarrassingly parallel: each
//! pixel reads its own targets, runs the reconciliation with no redshifts, stamps and labels
//! its rows, and hands the result to a [`LedgerSink`](crate::io::LedgerSink).
//!
//! Entry points
//! -----------------
//! * [`make_ledger_in_hp`] – Build the ledger of a single pixel.
//! * [`make_ledger`] – Build and write the ledgers of every pixel of a target source, on a
//!   bounded worker pool.
//!
//! Configuration
//! -----------------
//! [`LedgerConfig`] carries the worker count (`numproc`, `1` = sequential) and the requested
//! observing condition. It is built and validated by [`LedgerConfigBuilder`].
//!
//! Failure model
//! -----------------
//! * An observing condition that the source was not built for aborts the run before any pixel
//!   is processed ([`MtlError::ObsconMismatch`]).
//! * The first pixel failure aborts the whole run; pixels already written stay on the sink.
//!
//! Example
//! -----------------
//! ```rust,no_run
//! use mtl::io::{csv_writer::CsvLedgerWriter, parquet_reader::ParquetTargetSource};
//! use mtl::ledger::{make_ledger, LedgerConfig};
//! use mtl::targets::rules::BitmaskRules;
//!
//! # fn run() -> Result<(), mtl::mtl_errors::MtlError> {
//! let source = ParquetTargetSource::open("targets/dark")?;
//! let sink = CsvLedgerWriter::new("ledgers");
//! let config = LedgerConfig::builder().obscon("DARK")?.numproc(8).build()?;
//! let summary = make_ledger(&source, &config, &sink, &BitmaskRules::builtin())?;
//! eprintln!("{summary}");
//! # Ok(()) }
//! ```
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::constants::{PixNum, MTL_EXTNAME, TIMESTAMP_FORMAT};
use crate::healpix::nside2npix;
use crate::io::{LedgerSink, TargetHeader, TargetSource};
use crate::mtl::merge::make_mtl;
use crate::mtl::state::{classify, PriorityLabels};
use crate::mtl::{MtlOptions, MtlTable};
use crate::mtl_errors::MtlError;
use crate::obscon::ObsConditions;
use crate::targets::rules::TargetRules;
use crate::targets::{Flavor, TargetColumn};

pub mod progress_bar;

use progress_bar::{fmt_dur, PixelProgress};

/// Header keywords of a ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerHeader {
    pub extname: String,
    pub obscon: ObsConditions,
    /// `nside` of the pixelization the ledger belongs to.
    pub filensid: u32,
    /// Always `true`: pixels are in the NESTED ordering.
    pub hpxnest: bool,
    pub flavor: Flavor,
}

impl LedgerHeader {
    pub fn new(obscon: ObsConditions, nside: u32, flavor: Flavor) -> Self {
        LedgerHeader {
            extname: MTL_EXTNAME.to_string(),
            obscon,
            filensid: nside,
            hpxnest: true,
            flavor,
        }
    }

    /// Header as `(keyword, value)` pairs, in a stable order.
    pub fn cards(&self) -> Vec<(&'static str, String)> {
        vec![
            ("EXTNAME", self.extname.clone()),
            ("OBSCON", self.obscon.to_string()),
            ("FILENSID", self.filensid.to_string()),
            ("HPXNEST", self.hpxnest.to_string()),
            ("FLAVOR", self.flavor.tag()),
        ]
    }
}

/// The ledger of one HEALPixel.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelLedger {
    pub nside: u32,
    pub pixnum: PixNum,
    pub obscon: ObsConditions,
    pub header: LedgerHeader,
    pub table: MtlTable,
}

impl PixelLedger {
    #[inline]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Configuration of a ledger run.
///
/// Fields
/// -----------------
/// * `numproc` – Number of worker threads (`1` runs sequentially, no pool is built).
/// * `obscon` – Observing condition the ledgers are built for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedgerConfig {
    pub numproc: usize,
    pub obscon: ObsConditions,
}

impl LedgerConfig {
    pub fn builder() -> LedgerConfigBuilder {
        LedgerConfigBuilder::default()
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            numproc: 1,
            obscon: ObsConditions::DARK,
        }
    }
}

/// Builder for [`LedgerConfig`], with validation.
#[derive(Debug, Clone, Default)]
pub struct LedgerConfigBuilder {
    config: LedgerConfig,
}

impl LedgerConfigBuilder {
    pub fn numproc(mut self, numproc: usize) -> Self {
        self.config.numproc = numproc;
        self
    }

    /// Observing condition by name (e.g. `"BRIGHT"`).
    pub fn obscon(mut self, obscon: &str) -> Result<Self, MtlError> {
        self.config.obscon = obscon.parse()?;
        Ok(self)
    }

    pub fn obsconditions(mut self, obscon: ObsConditions) -> Self {
        self.config.obscon = obscon;
        self
    }

    /// Finalize the configuration.
    ///
    /// Return
    /// ----------
    /// * `Err(MtlError::InvalidMtlParameter)` if `numproc == 0`, or if `obscon` does not name
    ///   exactly one observing condition (it also names the ledger sub-directory).
    pub fn build(self) -> Result<LedgerConfig, MtlError> {
        if self.config.numproc == 0 {
            return Err(MtlError::InvalidMtlParameter(
                "numproc must be at least 1".into(),
            ));
        }
        if self.config.obscon.bits().count_ones() != 1 {
            return Err(MtlError::InvalidMtlParameter(format!(
                "obscon must name exactly one observing condition, got '{}'",
                self.config.obscon
            )));
        }
        Ok(self.config)
    }
}

/// Outcome of a [`make_ledger`] run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedgerSummary {
    /// Pixels of the pixelization.
    pub npix: u64,
    /// Non-empty ledgers handed to the sink.
    pub n_written: usize,
    /// Rows over all written ledgers.
    pub n_targets: usize,
    pub elapsed: Duration,
}

impl LedgerSummary {
    /// Pixels without any target.
    pub fn n_empty(&self) -> u64 {
        self.npix - self.n_written as u64
    }
}

impl fmt::Display for LedgerSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ledgers ({} targets) over {} HEALPixels in {}",
            self.n_written,
            self.n_targets,
            self.npix,
            fmt_dur(self.elapsed)
        )
    }
}

/// Source columns that belong to the ledger data model of `flavor`, legacy names included.
fn ledger_source_columns(column_names: &[String], flavor: Flavor) -> Vec<String> {
    let model = flavor.ledger_columns();
    column_names
        .iter()
        .filter(|name| {
            model.contains(name) || TargetColumn::from_name(name, flavor).is_some()
        })
        .cloned()
        .collect()
}

/// What every pixel of a source shares: flavor, columns to read and state labels.
struct PixelPlan {
    flavor: Flavor,
    columns: Vec<String>,
    labels: PriorityLabels,
}

impl PixelPlan {
    fn new<R: TargetRules + ?Sized>(header: &TargetHeader, rules: &R) -> Result<Self, MtlError> {
        let flavor = Flavor::detect(&header.column_names)?;
        Ok(PixelPlan {
            flavor,
            columns: ledger_source_columns(&header.column_names, flavor),
            labels: PriorityLabels::from_masks(&rules.masks(flavor)?),
        })
    }
}

fn build_ledger<S, R>(
    source: &S,
    plan: &PixelPlan,
    nside: u32,
    pixnum: PixNum,
    obscon: ObsConditions,
    rules: &R,
) -> Result<PixelLedger, MtlError>
where
    S: TargetSource + ?Sized,
    R: TargetRules + ?Sized,
{
    let targets = source.read_targets_in_pixel(nside, pixnum, &plan.columns)?;
    let options = MtlOptions {
        obscon,
        trim: false,
    };
    let mut table = make_mtl(targets, &options, None, None, rules)?;

    table.stamp(&Utc::now().format(TIMESTAMP_FORMAT).to_string());
    classify(&mut table, &plan.labels);

    let flavor = plan.flavor;
    debug!(pixnum, rows = table.len(), %flavor, "Built HEALPixel ledger");

    Ok(PixelLedger {
        nside,
        pixnum,
        obscon,
        header: LedgerHeader::new(obscon, nside, flavor),
        table,
    })
}

/// Build the initial ledger of a single HEALPixel.
///
/// Arguments
/// -----------------
/// * `source`: Target source; its header gives the columns and the flavor.
/// * `nside`: Resolution of the pixelization.
/// * `pixnum`: NESTED pixel to build.
/// * `obscon`: Observing condition governing the priorities.
/// * `rules`: Rule evaluators; their masks also provide the `TARGET_STATE` labels.
///
/// Return
/// ----------
/// * The [`PixelLedger`], possibly empty. Every row carries the same `TIMESTAMP`.
/// * `Err(MtlError::PixelOutOfRange)` if `pixnum` is not a pixel at `nside`.
///
/// See also
/// ------------
/// * [`make_mtl`] – Reconciliation run with no redshifts, no secondaries and no trimming.
/// * [`classify`] – Labelling of the rows by initial priority.
pub fn make_ledger_in_hp<S, R>(
    source: &S,
    nside: u32,
    pixnum: PixNum,
    obscon: ObsConditions,
    rules: &R,
) -> Result<PixelLedger, MtlError>
where
    S: TargetSource + ?Sized,
    R: TargetRules + ?Sized,
{
    let npix = nside2npix(nside)?;
    if pixnum >= npix {
        return Err(MtlError::PixelOutOfRange { pixnum, npix });
    }

    let plan = PixelPlan::new(&source.read_header()?, rules)?;
    build_ledger(source, &plan, nside, pixnum, obscon, rules)
}

/// Build the initial ledgers of every HEALPixel of a target source.
///
/// Arguments
/// -----------------
/// * `source`: Target source. Its header carries the `OBSCON` set it was built for and the
///   `FILENSID` resolution of its pixelization.
/// * `config`: Worker count and requested observing condition.
/// * `sink`: Destination of the non-empty ledgers. Each pixel writes a distinct output.
/// * `rules`: Rule evaluators shared by every worker.
///
/// Return
/// ----------
/// * A [`LedgerSummary`] of the run.
/// * `Err(MtlError::ObsconMismatch)` before any work if the source was not built for the
///   requested observing condition.
/// * The first error raised by a pixel; remaining pixels are abandoned.
///
/// See also
/// ------------
/// * [`make_ledger_in_hp`] – Work done for each pixel. The source header is read once per
///   run rather than once per pixel.
pub fn make_ledger<S, K, R>(
    source: &S,
    config: &LedgerConfig,
    sink: &K,
    rules: &R,
) -> Result<LedgerSummary, MtlError>
where
    S: TargetSource + ?Sized,
    K: LedgerSink + ?Sized,
    R: TargetRules + ?Sized,
{
    let start = Instant::now();

    let header = source.read_header()?;
    if !header.obscon.contains(config.obscon) {
        return Err(MtlError::ObsconMismatch {
            header: header.obscon.to_string(),
            requested: config.obscon.to_string(),
        });
    }

    let nside = header.nside;
    let npix = nside2npix(nside)?;
    info!(
        npix,
        nside,
        numproc = config.numproc,
        obscon = %config.obscon,
        "Writing ledger for {npix} HEALPixels"
    );

    // the header is read once; every pixel shares the plan
    let plan = PixelPlan::new(&header, rules)?;
    let progress = PixelProgress::new(npix);
    let n_written = AtomicUsize::new(0);
    let n_targets = AtomicUsize::new(0);

    let process = |pixnum: PixNum| -> Result<(), MtlError> {
        let ledger = build_ledger(source, &plan, nside, pixnum, config.obscon, rules)?;
        if !ledger.is_empty() {
            sink.write(&ledger)?;
            n_written.fetch_add(1, Ordering::Relaxed);
            n_targets.fetch_add(ledger.len(), Ordering::Relaxed);
        }
        progress.tick();
        Ok(())
    };

    if config.numproc > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.numproc)
            .build()?;
        pool.install(|| (0..npix).into_par_iter().try_for_each(process))?;
    } else {
        (0..npix).try_for_each(process)?;
    }
    progress.finish();

    let summary = LedgerSummary {
        npix,
        n_written: n_written.into_inner(),
        n_targets: n_targets.into_inner(),
        elapsed: start.elapsed(),
    };
    info!(
        written = summary.n_written,
        targets = summary.n_targets,
        "Done writing ledger...t = {:.1} mins",
        summary.elapsed.as_secs_f64() / 60.0
    );

    Ok(summary)
}
