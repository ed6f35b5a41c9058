//! # CSV ledger writer
//!
//! Writes one CSV file per HEALPixel:
//!
//! ```text
//! <root>/<obscon>/mtl-<obscon>-hp-<pixnum>.csv
//! ```
//!
//! where `<obscon>` is the lower-cased observing condition. Each file starts with the ledger
//! header as `# KEY = value` comment lines, followed by a header record with the ledger
//! columns of the table's flavor and one record per row.
//!
//! The root is given explicitly ([`CsvLedgerWriter::new`]) or taken from the `$MTL_DIR`
//! environment variable ([`CsvLedgerWriter::from_env`]).
//!
//! Reading a ledger back only needs a `csv::ReaderBuilder` with `comment(Some(b'#'))`.
use std::env;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::constants::{PixNum, MTL_COLUMNS, MTL_DIR_ENV};
use crate::io::LedgerSink;
use crate::ledger::PixelLedger;
use crate::mtl::MtlRecord;
use crate::mtl_errors::MtlError;
use crate::obscon::ObsConditions;
use crate::targets::{Flavor, TargetColumn};

/// Ledger sink writing CSV files under a root directory.
#[derive(Debug, Clone)]
pub struct CsvLedgerWriter {
    root: Utf8PathBuf,
}

impl CsvLedgerWriter {
    pub fn new(root: impl AsRef<Utf8Path>) -> Self {
        CsvLedgerWriter {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Writer rooted at [`mtl_dir`].
    pub fn from_env() -> Result<Self, MtlError> {
        Ok(CsvLedgerWriter::new(mtl_dir()?))
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Path of the ledger of `pixnum` for `obscon`.
    pub fn path_for(&self, obscon: ObsConditions, pixnum: PixNum) -> Utf8PathBuf {
        let obscon = obscon.to_string().to_lowercase();
        self.root
            .join(&obscon)
            .join(format!("mtl-{obscon}-hp-{pixnum}.csv"))
    }
}

/// Root directory of the ledgers, read from `$MTL_DIR`.
///
/// Return
/// ----------
/// * `Err(MtlError::MissingEnvVar)` if the variable is unset or empty.
/// * `Err(MtlError::InvalidMtlParameter)` if it is not valid UTF-8.
pub fn mtl_dir() -> Result<Utf8PathBuf, MtlError> {
    dir_from_env_value(env::var_os(MTL_DIR_ENV))
}

fn dir_from_env_value(value: Option<OsString>) -> Result<Utf8PathBuf, MtlError> {
    let value = value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| MtlError::MissingEnvVar(MTL_DIR_ENV.to_string()))?;
    Utf8PathBuf::from_path_buf(PathBuf::from(value)).map_err(|path| {
        MtlError::InvalidMtlParameter(format!("${MTL_DIR_ENV} is not UTF-8: {}", path.display()))
    })
}

/// Value of the ledger column `name` in `row`, or `None` if the flavor lacks the column.
fn ledger_field(row: &MtlRecord, name: &str, flavor: Flavor) -> Option<String> {
    let value = match name {
        "OBSCONDITIONS" => row.obsconditions.to_string(),
        "PRIORITY" => row.priority.to_string(),
        "NUMOBS" => row.numobs.to_string(),
        "NUMOBS_MORE" => row.numobs_more.to_string(),
        "Z" => row.z.to_string(),
        "ZWARN" => row.zwarn.to_string(),
        "TIMESTAMP" => row.timestamp.clone(),
        "TARGET_STATE" => row.target_state.to_string(),
        _ => {
            let col = TargetColumn::from_main_name(name)?;
            flavor.column_name(col)?;
            col.value(&row.target).to_string()
        }
    };
    Some(value)
}

/// One ledger row, in the column order of [`Flavor::ledger_columns`].
pub fn ledger_record(row: &MtlRecord, flavor: Flavor) -> Vec<String> {
    MTL_COLUMNS
        .iter()
        .filter_map(|name| ledger_field(row, name, flavor))
        .collect()
}

impl LedgerSink for CsvLedgerWriter {
    fn write(&self, ledger: &PixelLedger) -> Result<(), MtlError> {
        let path = self.path_for(ledger.obscon, ledger.pixnum);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let mut out = BufWriter::new(File::create(&path)?);
        for (key, value) in ledger.header.cards() {
            writeln!(out, "# {key} = {value}")?;
        }

        let flavor = ledger.table.flavor;
        let mut writer = csv::Writer::from_writer(out);
        writer.write_record(flavor.ledger_columns())?;
        for row in &ledger.table.rows {
            writer.write_record(ledger_record(row, flavor))?;
        }
        writer.flush()?;

        debug!(%path, rows = ledger.len(), "Wrote ledger");
        Ok(())
    }
}
