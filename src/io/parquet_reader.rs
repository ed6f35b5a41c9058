//! # Parquet target source
//!
//! Column-projected reading of pixelized target catalogs stored as **Apache Parquet**, either
//! a single file or a directory of files sharing one schema.
//!
//! ## Header
//! -----------------
//! The source header comes from the key/value metadata of the first file, read once:
//! - `OBSCON` – `|`-separated observing conditions the targets were selected for,
//! - `FILENSID` – `nside` of the pixelization, [`MTL_NSIDE`] when absent.
//!
//! Column names are the leaf names of the Parquet schema.
//!
//! ## Column types
//! -----------------
//! Every target column is accepted as `Float64`, `Float32`, `Int64` or `Int32` and cast to
//! its canonical type. Null cells read as zero. Any other type is an
//! [`MtlError::ColumnType`].
//!
//! ## Pixel selection
//! -----------------
//! The first pixel read at a given `nside` builds a pixel index: for every file, the row
//! ranges lying in each pixel. A file whose own metadata declares a single pixel
//! (`HPXPIXEL`) at that `nside` (`FILENSID`) is indexed without reading it; otherwise its
//! `RA` / `DEC` columns are read once and bucketed with
//! [`ang2pix_nest`](crate::healpix::ang2pix_nest).
//!
//! A pixel read then opens only the files holding rows of that pixel and decodes only those
//! rows, through a [`RowSelection`]. Over a full ledger run every row is decoded once.
//!
//! ## See also
//! ------------
//! * [`TargetSource`] – The trait implemented here.
use std::collections::HashMap;
use std::fs::File;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ahash::RandomState;
use arrow_array::array::{Array, Float32Array, Float64Array, Int32Array, Int64Array};
use arrow_array::RecordBatch;
use camino::{Utf8Path, Utf8PathBuf};
use once_cell::sync::OnceCell;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReaderBuilder, RowSelection};
use parquet::arrow::ProjectionMask;
use parquet::errors::ParquetError;
use parquet::file::metadata::KeyValue;
use parquet::schema::types::SchemaDescriptor;
use tracing::{debug, warn};

use crate::constants::{PixNum, MTL_NSIDE};
use crate::healpix::ang2pix_nest;
use crate::io::{check_pixel, PixelIndexCache, TargetHeader, TargetSource};
use crate::mtl_errors::MtlError;
use crate::obscon::ObsConditions;
use crate::targets::{ColumnValue, Flavor, TargetCatalog, TargetColumn, TargetRecord};

/// Default Arrow batch size.
const BATCH_SIZE: usize = 8192;

/// Rows of one file lying in one pixel.
#[derive(Debug)]
struct FileRows {
    file: usize,
    ranges: Vec<Range<usize>>,
}

impl FileRows {
    fn count(&self) -> usize {
        self.ranges.iter().map(|r| r.len()).sum()
    }
}

/// Where the rows of each pixel live.
#[derive(Debug)]
struct FilePixelIndex {
    /// Row count of every file.
    file_rows: Vec<usize>,
    pixels: HashMap<PixNum, Vec<FileRows>, RandomState>,
}

/// Append `row` to `ranges`, extending the last range when contiguous.
fn push_row(ranges: &mut Vec<Range<usize>>, row: usize) {
    match ranges.last_mut() {
        Some(last) if last.end == row => last.end += 1,
        _ => ranges.push(row..row + 1),
    }
}

/// Targets stored in one or more Parquet files.
#[derive(Debug)]
pub struct ParquetTargetSource {
    files: Vec<Utf8PathBuf>,
    batch_size: usize,
    header: OnceCell<TargetHeader>,
    index: PixelIndexCache<FilePixelIndex>,
    rows_decoded: AtomicUsize,
}

impl ParquetTargetSource {
    /// Open a Parquet file, or every `*.parquet` file of a directory (in name order).
    ///
    /// Return
    /// ----------
    /// * `Err(MtlError::IoError)` if the path does not exist or the directory holds no
    ///   Parquet file.
    pub fn open(path: impl AsRef<Utf8Path>) -> Result<Self, MtlError> {
        let path = path.as_ref();
        let files = if path.is_dir() {
            let mut files = Vec::new();
            for entry in path.read_dir_utf8()? {
                let entry = entry?;
                if entry.path().extension() == Some("parquet") {
                    files.push(entry.path().to_path_buf());
                }
            }
            files.sort();
            files
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            Vec::new()
        };

        if files.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("No Parquet target file found at {path}"),
            )
            .into());
        }

        Ok(ParquetTargetSource {
            files,
            batch_size: BATCH_SIZE,
            header: OnceCell::new(),
            index: PixelIndexCache::default(),
            rows_decoded: AtomicUsize::new(0),
        })
    }

    /// Arrow reader batch size (default 8192 rows).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn files(&self) -> &[Utf8PathBuf] {
        &self.files
    }

    /// Target rows decoded so far by pixel reads.
    pub fn rows_decoded(&self) -> usize {
        self.rows_decoded.load(Ordering::Relaxed)
    }

    fn builder(path: &Utf8Path) -> Result<ParquetRecordBatchReaderBuilder<File>, MtlError> {
        let file = File::open(path)?;
        Ok(ParquetRecordBatchReaderBuilder::try_new(file)?)
    }

    fn header(&self) -> Result<&TargetHeader, MtlError> {
        self.header.get_or_try_init(|| self.load_header())
    }

    fn load_header(&self) -> Result<TargetHeader, MtlError> {
        let first = &self.files[0];
        let builder = Self::builder(first)?;
        let file_metadata = builder.metadata().file_metadata();
        let kv = file_metadata.key_value_metadata();

        let obscon: ObsConditions = metadata_value(kv, "OBSCON")
            .ok_or_else(|| MtlError::MissingHeaderKey("OBSCON".into()))?
            .parse()?;
        let nside = match metadata_value(kv, "FILENSID") {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| MtlError::InvalidMtlParameter(format!("FILENSID of {first}")))?,
            None => {
                warn!(
                    file = %first,
                    nside = MTL_NSIDE,
                    "No FILENSID keyword, using the ledger nside"
                );
                MTL_NSIDE
            }
        };
        let column_names = file_metadata
            .schema_descr()
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        Ok(TargetHeader {
            obscon,
            nside,
            column_names,
        })
    }

    /// One pass over every file, recording the row ranges of each pixel at `nside`.
    fn build_index(&self, nside: u32) -> Result<FilePixelIndex, MtlError> {
        let mut index = FilePixelIndex {
            file_rows: Vec::with_capacity(self.files.len()),
            pixels: HashMap::with_hasher(RandomState::new()),
        };

        for (file, path) in self.files.iter().enumerate() {
            let builder = Self::builder(path)?;
            let n_rows = usize::try_from(builder.metadata().file_metadata().num_rows())
                .map_err(|_| MtlError::InvalidMtlParameter(format!("row count of {path}")))?;
            index.file_rows.push(n_rows);

            let kv = builder.metadata().file_metadata().key_value_metadata();
            if let Some(pixnum) = declared_pixel(kv, nside) {
                debug!(file = %path, pixnum, "File declares its HEALPixel");
                index.pixels.entry(pixnum).or_default().push(FileRows {
                    file,
                    ranges: vec![0..n_rows],
                });
                continue;
            }

            let schema_descr = builder.metadata().file_metadata().schema_descr();
            let leaves = leaf_indices(schema_descr, ["RA", "DEC"], path)?;
            let mask = ProjectionMask::leaves(schema_descr, leaves);
            let reader = builder
                .with_projection(mask)
                .with_batch_size(self.batch_size)
                .build()?;

            let mut per_pixel: HashMap<PixNum, Vec<Range<usize>>, RandomState> =
                HashMap::with_hasher(RandomState::new());
            let mut row = 0;
            for maybe_batch in reader {
                let batch = maybe_batch.map_err(ParquetError::from)?;
                let ra = column_values(&batch, "RA")?;
                let dec = column_values(&batch, "DEC")?;
                for (r, d) in ra.iter().zip(&dec) {
                    let pixnum = ang2pix_nest(nside, r.as_f64(), d.as_f64())?;
                    push_row(per_pixel.entry(pixnum).or_default(), row);
                    row += 1;
                }
            }
            for (pixnum, ranges) in per_pixel {
                index
                    .pixels
                    .entry(pixnum)
                    .or_default()
                    .push(FileRows { file, ranges });
            }
        }

        // files in name order within every pixel
        for parts in index.pixels.values_mut() {
            parts.sort_by_key(|p| p.file);
        }
        debug!(
            nside,
            files = self.files.len(),
            pixels = index.pixels.len(),
            "Indexed Parquet targets"
        );
        Ok(index)
    }

    /// Decode the `part` rows of a file, keeping the `wanted` columns.
    fn read_rows(
        &self,
        part: &FileRows,
        n_rows: usize,
        wanted: &[(String, TargetColumn)],
        rows: &mut Vec<TargetRecord>,
    ) -> Result<(), MtlError> {
        if wanted.is_empty() {
            rows.extend(std::iter::repeat(TargetRecord::default()).take(part.count()));
            return Ok(());
        }

        let path = &self.files[part.file];
        let builder = Self::builder(path)?;
        let schema_descr = builder.metadata().file_metadata().schema_descr();
        let leaves = leaf_indices(schema_descr, wanted.iter().map(|(n, _)| n.as_str()), path)?;
        let mask = ProjectionMask::leaves(schema_descr, leaves);
        let selection = RowSelection::from_consecutive_ranges(part.ranges.iter().cloned(), n_rows);

        let reader = builder
            .with_projection(mask)
            .with_row_selection(selection)
            .with_batch_size(self.batch_size)
            .build()?;

        for maybe_batch in reader {
            let batch = maybe_batch.map_err(ParquetError::from)?;
            self.rows_decoded
                .fetch_add(batch.num_rows(), Ordering::Relaxed);

            let columns: Vec<(TargetColumn, Vec<ColumnValue>)> = wanted
                .iter()
                .map(|(name, col)| Ok((*col, column_values(&batch, name)?)))
                .collect::<Result<_, MtlError>>()?;

            for i in 0..batch.num_rows() {
                let mut rec = TargetRecord::default();
                for (col, values) in &columns {
                    col.set_value(&mut rec, values[i]);
                }
                rows.push(rec);
            }
        }

        Ok(())
    }
}

/// Schema leaf index of every name in `names`.
fn leaf_indices<'a>(
    schema_descr: &SchemaDescriptor,
    names: impl IntoIterator<Item = &'a str>,
    path: &Utf8Path,
) -> Result<Vec<usize>, MtlError> {
    names
        .into_iter()
        .map(|name| {
            schema_descr
                .columns()
                .iter()
                .position(|c| c.name() == name)
                .ok_or_else(|| MtlError::MissingColumn(format!("{name} in {path}")))
        })
        .collect()
}

/// The single pixel a file declares at `nside`, if any.
fn declared_pixel(kv: Option<&Vec<KeyValue>>, nside: u32) -> Option<PixNum> {
    let filensid: u32 = metadata_value(kv, "FILENSID")?.trim().parse().ok()?;
    if filensid != nside {
        return None;
    }
    let mut pixels = metadata_value(kv, "HPXPIXEL")?.split(',');
    let pixnum = pixels.next()?.trim().parse().ok()?;
    pixels.next().is_none().then_some(pixnum)
}

/// Value of a key/value metadata entry.
fn metadata_value<'a>(kv: Option<&'a Vec<KeyValue>>, key: &str) -> Option<&'a str> {
    kv?.iter()
        .find(|e| e.key == key)
        .and_then(|e| e.value.as_deref())
}

/// Decode a column of a batch into canonical cell values, nulls as zero.
fn column_values(batch: &RecordBatch, name: &str) -> Result<Vec<ColumnValue>, MtlError> {
    let array: &Arc<dyn Array> = batch
        .column_by_name(name)
        .ok_or_else(|| MtlError::MissingColumn(name.to_string()))?;
    let any = array.as_any();

    let values = if let Some(a) = any.downcast_ref::<Float64Array>() {
        a.iter()
            .map(|v| ColumnValue::Float64(v.unwrap_or_default()))
            .collect()
    } else if let Some(a) = any.downcast_ref::<Float32Array>() {
        a.iter()
            .map(|v| ColumnValue::Float32(v.unwrap_or_default()))
            .collect()
    } else if let Some(a) = any.downcast_ref::<Int64Array>() {
        a.iter()
            .map(|v| ColumnValue::Int64(v.unwrap_or_default()))
            .collect()
    } else if let Some(a) = any.downcast_ref::<Int32Array>() {
        a.iter()
            .map(|v| ColumnValue::Int64(v.unwrap_or_default() as i64))
            .collect()
    } else {
        return Err(MtlError::ColumnType {
            column: name.to_string(),
            expected: "Float64, Float32, Int64 or Int32".into(),
        });
    };
    Ok(values)
}

impl TargetSource for ParquetTargetSource {
    fn read_header(&self) -> Result<TargetHeader, MtlError> {
        self.header().cloned()
    }

    fn read_targets_in_pixel(
        &self,
        nside: u32,
        pixnum: PixNum,
        columns: &[String],
    ) -> Result<TargetCatalog, MtlError> {
        check_pixel(nside, pixnum)?;

        let header = self.header()?;
        let flavor = Flavor::detect(&header.column_names)?;
        let wanted: Vec<(String, TargetColumn)> = columns
            .iter()
            .filter(|c| header.column_names.contains(c))
            .filter_map(|c| TargetColumn::from_name(c, flavor).map(|col| (c.clone(), col)))
            .collect();

        let index = self.index.get_or_build(nside, || self.build_index(nside))?;
        let mut rows = Vec::new();
        for part in index.pixels.get(&pixnum).into_iter().flatten() {
            self.read_rows(part, index.file_rows[part.file], &wanted, &mut rows)?;
        }

        let column_names = wanted.into_iter().map(|(n, _)| n).collect();
        Ok(TargetCatalog::new(flavor, column_names, rows))
    }
}
