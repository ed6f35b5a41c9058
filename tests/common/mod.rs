#![allow(dead_code)]

use std::fs::File;
use std::sync::Arc;

use arrow_array::{ArrayRef, Float32Array, Float64Array, Int32Array, Int64Array, RecordBatch};
use arrow_schema::{DataType, Field, Schema};
use camino::Utf8Path;
use parquet::arrow::ArrowWriter;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;

use mtl::mtl::MtlTable;
use mtl::targets::bitmask::MaskRegistry;
use mtl::targets::{Flavor, TargetCatalog, TargetRecord};

/// Small registry: two dark-time classes sharing priority 100, a dark/gray class, and a
/// bright-time secondary class.
pub const TEST_MASKS: &str = r#"
bgs_mask = []
mws_mask = []

[[desi_mask]]
name = "ALPHA"
bit = 0
obsconditions = "DARK"
numobs = 1
priorities = { UNOBS = 100, MORE_ZGOOD = 150 }

[[desi_mask]]
name = "BETA"
bit = 1
obsconditions = "DARK"
numobs = 1
priorities = { UNOBS = 100 }

[[desi_mask]]
name = "GAMMA"
bit = 2
obsconditions = "DARK|GRAY"
numobs = 4
priorities = { UNOBS = 3000, DONE = 2, MORE_ZWARN = 3100 }

[[desi_mask]]
name = "CALIB"
bit = 3
obsconditions = "DARK|GRAY|BRIGHT"

[[scnd_mask]]
name = "SCND_BRIGHT"
bit = 0
obsconditions = "BRIGHT"
numobs = 1
priorities = { UNOBS = 500 }
"#;

pub fn registry() -> MaskRegistry {
    MaskRegistry::from_toml_str(TEST_MASKS).unwrap()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn target(targetid: i64, desi_target: i64, priority_init: i64, numobs_init: i64) -> TargetRecord {
    TargetRecord {
        desi_target,
        subpriority: 0.5,
        ..TargetRecord::new(targetid, 0.0, 0.0, priority_init, numobs_init)
    }
}

pub fn at(mut rec: TargetRecord, ra: f64, dec: f64) -> TargetRecord {
    rec.ra = ra;
    rec.dec = dec;
    rec
}

pub fn main_catalog(rows: Vec<TargetRecord>) -> TargetCatalog {
    TargetCatalog::with_all_columns(Flavor::Main, rows)
}

/// `(targetid, priority, numobs_more)` of every row, sorted by identifier.
pub fn summary(table: &MtlTable) -> Vec<(i64, i64, i64)> {
    let mut rows: Vec<(i64, i64, i64)> = table
        .rows
        .iter()
        .map(|r| (r.target.targetid, r.priority, r.numobs_more))
        .collect();
    rows.sort_unstable();
    rows
}

/// Write main-survey targets to a Parquet file with `OBSCON` / `FILENSID` metadata.
///
/// The initial priority is stored under its legacy name `PRIORITY`, and an extra
/// `BRICKID` column is carried that is not part of the ledger data model.
pub fn write_parquet(path: &Utf8Path, rows: &[TargetRecord], obscon: &str, nside: u32) {
    write_parquet_with_metadata(
        path,
        rows,
        &[("OBSCON", obscon.to_string()), ("FILENSID", nside.to_string())],
    );
}

/// Same layout as [`write_parquet`], with arbitrary key/value metadata.
pub fn write_parquet_with_metadata(path: &Utf8Path, rows: &[TargetRecord], metadata: &[(&str, String)]) {
    let schema = Schema::new(vec![
        Field::new("TARGETID", DataType::Int64, false),
        Field::new("RA", DataType::Float64, false),
        Field::new("DEC", DataType::Float64, false),
        Field::new("PMRA", DataType::Float32, false),
        Field::new("DESI_TARGET", DataType::Int64, false),
        Field::new("BGS_TARGET", DataType::Int64, false),
        Field::new("MWS_TARGET", DataType::Int64, false),
        Field::new("SCND_TARGET", DataType::Int64, false),
        Field::new("SUBPRIORITY", DataType::Float64, false),
        Field::new("PRIORITY", DataType::Int64, false),
        Field::new("NUMOBS_INIT", DataType::Int32, false),
        Field::new("BRICKID", DataType::Int32, false),
    ]);

    let i64_col = |f: fn(&TargetRecord) -> i64| -> ArrayRef {
        Arc::new(Int64Array::from(rows.iter().map(f).collect::<Vec<_>>()))
    };
    let f64_col = |f: fn(&TargetRecord) -> f64| -> ArrayRef {
        Arc::new(Float64Array::from(rows.iter().map(f).collect::<Vec<_>>()))
    };
    let columns: Vec<ArrayRef> = vec![
        i64_col(|r| r.targetid),
        f64_col(|r| r.ra),
        f64_col(|r| r.dec),
        Arc::new(Float32Array::from(
            rows.iter().map(|r| r.pmra).collect::<Vec<_>>(),
        )),
        i64_col(|r| r.desi_target),
        i64_col(|r| r.bgs_target),
        i64_col(|r| r.mws_target),
        i64_col(|r| r.scnd_target),
        f64_col(|r| r.subpriority),
        i64_col(|r| r.priority_init),
        Arc::new(Int32Array::from(
            rows.iter().map(|r| r.numobs_init as i32).collect::<Vec<_>>(),
        )),
        Arc::new(Int32Array::from(vec![7; rows.len()])),
    ];
    let batch = RecordBatch::try_new(Arc::new(schema), columns).unwrap();

    let props = WriterProperties::builder()
        .set_key_value_metadata(Some(
            metadata
                .iter()
                .map(|(k, v)| KeyValue::new(k.to_string(), v.clone()))
                .collect(),
        ))
        .build();
    let file = File::create(path).unwrap();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props)).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
}
