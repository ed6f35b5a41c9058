//! # Target sources and ledger sinks
//!
//! The ledger orchestrator never touches files directly. It reads targets through a
//! [`TargetSource`] and hands finished ledgers to a [`LedgerSink`]. Both traits are `Sync`:
//! a single instance is shared read-only by every worker of the pool.
//!
//! Implementations
//! -----------------
//! * [`InMemoryTargetSource`] – A catalog held in memory, bucketed once per `nside` with
//!   [`ang2pix_nest`].
//! * [`parquet_reader::ParquetTargetSource`] – A Parquet file, or a directory of Parquet files.
//! * [`MemoryLedgerSink`] – Collects ledgers keyed by pixel.
//! * [`csv_writer::CsvLedgerWriter`] – One CSV file per pixel under a root directory.
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use ahash::RandomState;
use tracing::debug;

use crate::constants::PixNum;
use crate::healpix::{ang2pix_nest, nside2npix};
use crate::ledger::PixelLedger;
use crate::mtl_errors::MtlError;
use crate::obscon::ObsConditions;
use crate::targets::{TargetCatalog, TargetColumn, TargetRecord};

pub mod csv_writer;
pub mod parquet_reader;

/// Header of a target source.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetHeader {
    /// Observing conditions the targets were selected for (`OBSCON` keyword).
    pub obscon: ObsConditions,
    /// Resolution of the source pixelization (`FILENSID` keyword).
    pub nside: u32,
    /// Raw column names of the source.
    pub column_names: Vec<String>,
}

/// Read-only access to a pixelized target catalog.
pub trait TargetSource: Sync {
    fn read_header(&self) -> Result<TargetHeader, MtlError>;

    /// Targets lying in a single NESTED pixel, restricted to `columns`.
    ///
    /// Columns absent from the source are ignored; the returned catalog reports the
    /// columns actually read under their raw names.
    fn read_targets_in_pixel(
        &self,
        nside: u32,
        pixnum: PixNum,
        columns: &[String],
    ) -> Result<TargetCatalog, MtlError>;
}

/// Destination of finished ledgers.
///
/// Only non-empty ledgers are written; every call concerns a distinct pixel.
pub trait LedgerSink: Sync {
    fn write(&self, ledger: &PixelLedger) -> Result<(), MtlError>;
}

/// Check that `pixnum` exists at resolution `nside`.
pub(crate) fn check_pixel(nside: u32, pixnum: PixNum) -> Result<(), MtlError> {
    let npix = nside2npix(nside)?;
    if pixnum >= npix {
        return Err(MtlError::PixelOutOfRange { pixnum, npix });
    }
    Ok(())
}

/// Copy of `rec` keeping only `columns`, every other field zeroed.
pub(crate) fn project(rec: &TargetRecord, columns: &[TargetColumn]) -> TargetRecord {
    let mut out = TargetRecord::default();
    for col in columns {
        col.copy(rec, &mut out);
    }
    out
}

/// Index built once per pixelization and shared by every pixel read.
///
/// A request at another `nside` replaces the cached index. Workers asking while the index
/// is being built wait for it instead of building their own.
#[derive(Debug)]
pub(crate) struct PixelIndexCache<T> {
    slot: Mutex<Option<(u32, Arc<T>)>>,
}

impl<T> Default for PixelIndexCache<T> {
    fn default() -> Self {
        PixelIndexCache {
            slot: Mutex::new(None),
        }
    }
}

impl<T> PixelIndexCache<T> {
    pub(crate) fn get_or_build(
        &self,
        nside: u32,
        build: impl FnOnce() -> Result<T, MtlError>,
    ) -> Result<Arc<T>, MtlError> {
        let mut slot = self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some((cached, index)) = slot.as_ref() {
            if *cached == nside {
                return Ok(Arc::clone(index));
            }
        }
        let index = Arc::new(build()?);
        *slot = Some((nside, Arc::clone(&index)));
        Ok(index)
    }

    #[cfg(test)]
    pub(crate) fn cached_nside(&self) -> Option<u32> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|(nside, _)| *nside)
    }
}

/// Catalog rows grouped by NESTED pixel.
type PixelRows = HashMap<PixNum, Vec<usize>, RandomState>;

/// A target catalog held in memory.
#[derive(Debug)]
pub struct InMemoryTargetSource {
    header: TargetHeader,
    catalog: TargetCatalog,
    buckets: PixelIndexCache<PixelRows>,
}

impl InMemoryTargetSource {
    /// Wrap `catalog`, declaring it selected for `obscon` and pixelized at `nside`.
    pub fn new(catalog: TargetCatalog, obscon: ObsConditions, nside: u32) -> Self {
        InMemoryTargetSource {
            header: TargetHeader {
                obscon,
                nside,
                column_names: catalog.column_names.clone(),
            },
            catalog,
            buckets: PixelIndexCache::default(),
        }
    }

    pub fn header(&self) -> &TargetHeader {
        &self.header
    }

    pub fn catalog(&self) -> &TargetCatalog {
        &self.catalog
    }

    fn bucket(&self, nside: u32) -> Result<PixelRows, MtlError> {
        let mut rows = PixelRows::with_hasher(RandomState::new());
        for (i, rec) in self.catalog.rows.iter().enumerate() {
            rows.entry(ang2pix_nest(nside, rec.ra, rec.dec)?)
                .or_default()
                .push(i);
        }
        debug!(nside, pixels = rows.len(), "Bucketed in-memory targets");
        Ok(rows)
    }
}

impl TargetSource for InMemoryTargetSource {
    fn read_header(&self) -> Result<TargetHeader, MtlError> {
        Ok(self.header.clone())
    }

    fn read_targets_in_pixel(
        &self,
        nside: u32,
        pixnum: PixNum,
        columns: &[String],
    ) -> Result<TargetCatalog, MtlError> {
        check_pixel(nside, pixnum)?;

        let flavor = self.catalog.flavor;
        let column_names: Vec<String> = columns
            .iter()
            .filter(|c| self.catalog.has_column(c))
            .cloned()
            .collect();
        let projection: Vec<TargetColumn> = column_names
            .iter()
            .filter_map(|c| TargetColumn::from_name(c, flavor))
            .collect();

        let buckets = self.buckets.get_or_build(nside, || self.bucket(nside))?;
        let rows: Vec<TargetRecord> = buckets
            .get(&pixnum)
            .map(|idx| {
                idx.iter()
                    .map(|&i| project(&self.catalog.rows[i], &projection))
                    .collect()
            })
            .unwrap_or_default();

        Ok(TargetCatalog::new(flavor, column_names, rows))
    }
}

/// Ledgers collected in memory, keyed by pixel.
#[derive(Debug, Default)]
pub struct MemoryLedgerSink {
    ledgers: Mutex<BTreeMap<PixNum, PixelLedger>>,
}

impl MemoryLedgerSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the collected ledgers, in pixel order.
    pub fn into_inner(self) -> BTreeMap<PixNum, PixelLedger> {
        self.ledgers
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.ledgers
            .lock()
            .map(|l| l.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LedgerSink for MemoryLedgerSink {
    fn write(&self, ledger: &PixelLedger) -> Result<(), MtlError> {
        let mut ledgers = self
            .ledgers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        ledgers.insert(ledger.pixnum, ledger.clone());
        Ok(())
    }
}
