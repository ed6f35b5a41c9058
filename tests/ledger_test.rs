use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use camino::Utf8Path;

use mtl::constants::{PixNum, MTL_NSIDE, TIMESTAMP_WIDTH};
use mtl::healpix::ang2pix_nest;
use mtl::io::csv_writer::CsvLedgerWriter;
use mtl::io::parquet_reader::ParquetTargetSource;
use mtl::io::{
    InMemoryTargetSource, LedgerSink, MemoryLedgerSink, TargetHeader, TargetSource,
};
use mtl::ledger::{make_ledger, make_ledger_in_hp, LedgerConfig, PixelLedger};
use mtl::mtl_errors::MtlError;
use mtl::obscon::ObsConditions;
use mtl::targets::rules::BitmaskRules;
use mtl::targets::{TargetCatalog, TargetRecord};

mod common;
use common::{at, main_catalog, registry, target};

const ALPHA: i64 = 1;
const GAMMA: i64 = 1 << 2;

/// Targets spread over the 12 pixels of `nside = 1`.
fn sky() -> Vec<TargetRecord> {
    let mut rows = Vec::new();
    let mut id = 0;
    for dec in [-60.0, -20.0, 0.0, 20.0, 60.0] {
        for ra in [10.0, 100.0, 190.0, 280.0] {
            id += 1;
            let class = if id % 4 == 0 { 0 } else { GAMMA };
            let prio = if class == 0 { 0 } else { 3000 };
            rows.push(at(target(id, class, prio, 4), ra, dec));
        }
    }
    rows
}

fn source(obscon: ObsConditions) -> InMemoryTargetSource {
    InMemoryTargetSource::new(main_catalog(sky()), obscon, 1)
}

/// Ledger rows keyed by pixel, without timestamps.
fn contents(ledgers: &BTreeMap<PixNum, PixelLedger>) -> Vec<(PixNum, i64, i64, i64, String)> {
    ledgers
        .values()
        .flat_map(|l| {
            l.table.rows.iter().map(move |r| {
                (
                    l.pixnum,
                    r.target.targetid,
                    r.priority,
                    r.numobs_more,
                    r.target_state.to_string(),
                )
            })
        })
        .collect()
}

#[test]
fn test_ledger_in_hp_end_to_end() {
    common::init_tracing();
    let reg = registry();
    let rules = BitmaskRules::new(&reg);
    let src = InMemoryTargetSource::new(
        main_catalog(vec![
            at(target(1, ALPHA, 100, 1), 0.0, 0.0),
            at(target(2, 0, 0, 0), 1.0, 1.0),
            at(target(3, ALPHA, 100, 1), 100.0, 0.0),
        ]),
        ObsConditions::DARK,
        1,
    );

    let ledger = make_ledger_in_hp(&src, 1, 4, ObsConditions::DARK, &rules).unwrap();

    assert_eq!(ledger.pixnum, 4);
    assert_eq!(ledger.len(), 2);
    let row1 = ledger.table.find(1).unwrap();
    assert_eq!((row1.priority, row1.numobs_more), (100, 1));
    assert_eq!(row1.target_state.as_str(), "ALPHA");
    let row2 = ledger.table.find(2).unwrap();
    assert_eq!((row2.priority, row2.numobs_more), (0, 0));
    assert_eq!(row2.target_state.as_str(), "CALIBRATION");

    // one timestamp per pixel
    assert_eq!(row1.timestamp.len(), TIMESTAMP_WIDTH);
    assert_eq!(row1.timestamp, row2.timestamp);

    assert_eq!(ledger.header.extname, "MTL");
    assert_eq!(ledger.header.filensid, 1);
    assert!(ledger.header.hpxnest);

    assert!(make_ledger_in_hp(&src, 1, 7, ObsConditions::DARK, &rules)
        .unwrap()
        .is_empty());
    assert_eq!(
        make_ledger_in_hp(&src, 1, 12, ObsConditions::DARK, &rules).unwrap_err(),
        MtlError::PixelOutOfRange {
            pixnum: 12,
            npix: 12
        }
    );
}

#[test]
fn test_parallel_matches_sequential() {
    let reg = registry();
    let rules = BitmaskRules::new(&reg);
    let src = source(ObsConditions::DARK | ObsConditions::GRAY);

    let run = |numproc: usize| {
        let sink = MemoryLedgerSink::new();
        let config = LedgerConfig::builder().numproc(numproc).build().unwrap();
        let summary = make_ledger(&src, &config, &sink, &rules).unwrap();
        (summary, sink.into_inner())
    };

    let (seq_summary, seq) = run(1);
    let (par_summary, par) = run(4);

    assert_eq!(seq_summary.npix, 12);
    assert_eq!(seq_summary.n_targets, sky().len());
    assert_eq!(seq_summary.n_written, par_summary.n_written);
    assert_eq!(seq_summary.n_targets, par_summary.n_targets);
    assert_eq!(contents(&seq), contents(&par));

    // every target lands in the ledger of its own pixel
    for (pixnum, ledger) in &seq {
        for row in &ledger.table.rows {
            assert_eq!(ang2pix_nest(1, row.target.ra, row.target.dec).unwrap(), *pixnum);
        }
    }
    let empty = seq_summary.n_empty();
    assert_eq!(empty, 12 - seq.len() as u64);
}

/// Source counting header reads, pixel reads and rows handed out.
struct CountingSource {
    inner: InMemoryTargetSource,
    headers: AtomicUsize,
    reads: AtomicUsize,
    rows: AtomicUsize,
}

impl CountingSource {
    fn new(inner: InMemoryTargetSource) -> Self {
        CountingSource {
            inner,
            headers: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            rows: AtomicUsize::new(0),
        }
    }
}

impl TargetSource for CountingSource {
    fn read_header(&self) -> Result<TargetHeader, MtlError> {
        self.headers.fetch_add(1, Ordering::Relaxed);
        self.inner.read_header()
    }

    fn read_targets_in_pixel(
        &self,
        nside: u32,
        pixnum: PixNum,
        columns: &[String],
    ) -> Result<TargetCatalog, MtlError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let cat = self.inner.read_targets_in_pixel(nside, pixnum, columns)?;
        self.rows.fetch_add(cat.len(), Ordering::Relaxed);
        Ok(cat)
    }
}

#[test]
fn test_header_read_once_per_run() {
    let reg = registry();
    let src = CountingSource::new(source(ObsConditions::DARK));
    let sink = MemoryLedgerSink::new();
    let config = LedgerConfig::builder().numproc(3).build().unwrap();

    let summary = make_ledger(&src, &config, &sink, &BitmaskRules::new(&reg)).unwrap();

    assert_eq!(src.headers.load(Ordering::Relaxed), 1);
    assert_eq!(src.reads.load(Ordering::Relaxed), 12);
    assert_eq!(src.rows.load(Ordering::Relaxed), sky().len());
    assert_eq!(summary.n_targets, sky().len());
}

#[test]
fn test_obscon_mismatch_aborts_before_work() {
    let src = CountingSource::new(source(ObsConditions::BRIGHT));
    let sink = MemoryLedgerSink::new();
    let config = LedgerConfig::builder().numproc(2).obscon("DARK").unwrap().build().unwrap();

    let err = make_ledger(&src, &config, &sink, &BitmaskRules::builtin()).unwrap_err();

    assert_eq!(
        err,
        MtlError::ObsconMismatch {
            header: "BRIGHT".into(),
            requested: "DARK".into()
        }
    );
    assert_eq!(
        err.to_string(),
        "File is type BRIGHT but requested behavior is DARK"
    );
    assert_eq!(src.reads.load(Ordering::Relaxed), 0);
    assert!(sink.is_empty());
}

#[test]
fn test_obscon_subset_is_accepted() {
    let reg = registry();
    let src = source(ObsConditions::DARK | ObsConditions::GRAY);
    let sink = MemoryLedgerSink::new();
    let config = LedgerConfig::builder().obscon("GRAY").unwrap().build().unwrap();

    let summary = make_ledger(&src, &config, &sink, &BitmaskRules::new(&reg)).unwrap();
    assert_eq!(summary.n_written, sink.len());
    assert!(sink
        .into_inner()
        .values()
        .all(|l| l.obscon == ObsConditions::GRAY));
}

/// Sink failing on one pixel.
struct FailingSink {
    fail_on: PixNum,
    inner: MemoryLedgerSink,
}

impl LedgerSink for FailingSink {
    fn write(&self, ledger: &PixelLedger) -> Result<(), MtlError> {
        if ledger.pixnum == self.fail_on {
            return Err(MtlError::IoError(std::io::Error::other("disk full")));
        }
        self.inner.write(ledger)
    }
}

#[test]
fn test_worker_failure_aborts_run() {
    let reg = registry();
    let src = source(ObsConditions::DARK);
    let fail_on = ang2pix_nest(1, 100.0, 0.0).unwrap();

    for numproc in [1, 4] {
        let sink = FailingSink {
            fail_on,
            inner: MemoryLedgerSink::new(),
        };
        let config = LedgerConfig::builder().numproc(numproc).build().unwrap();
        let err = make_ledger(&src, &config, &sink, &BitmaskRules::new(&reg)).unwrap_err();
        assert!(matches!(err, MtlError::IoError(_)));
        assert!(!sink.inner.into_inner().contains_key(&fail_on));
    }
}

#[test]
fn test_csv_ledgers() {
    let reg = registry();
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8Path::from_path(dir.path()).unwrap();
    let writer = CsvLedgerWriter::new(root);
    let src = source(ObsConditions::DARK);
    let config = LedgerConfig::builder().numproc(3).build().unwrap();

    let summary = make_ledger(&src, &config, &writer, &BitmaskRules::new(&reg)).unwrap();

    let mut n_rows = 0;
    let mut n_files = 0;
    for pixnum in 0..summary.npix {
        let path = writer.path_for(ObsConditions::DARK, pixnum);
        if !path.exists() {
            continue;
        }
        n_files += 1;
        assert!(path.as_str().ends_with(&format!("dark/mtl-dark-hp-{pixnum}.csv")));

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# EXTNAME = MTL\n# OBSCON = DARK\n# FILENSID = 1\n"));

        let mut reader = csv::ReaderBuilder::new()
            .comment(Some(b'#'))
            .from_path(&path)
            .unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.len(), 22);
        assert_eq!(&headers[10], "TARGETID");
        let state = headers.iter().position(|h| h == "TARGET_STATE").unwrap();
        let prio_init = headers.iter().position(|h| h == "PRIORITY_INIT").unwrap();

        for record in reader.records() {
            let record = record.unwrap();
            let expected = if &record[prio_init] == "0" {
                "CALIBRATION"
            } else {
                "GAMMA"
            };
            assert_eq!(&record[state], expected);
            n_rows += 1;
        }
    }
    assert_eq!(n_files, summary.n_written);
    assert_eq!(n_rows, summary.n_targets);
}

#[test]
fn test_parquet_source() {
    let reg = registry();
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8Path::from_path(dir.path()).unwrap();

    let mut rows = sky();
    rows[0].pmra = 12.5;
    let (first, second) = rows.split_at(10);
    common::write_parquet(&root.join("targets-0.parquet"), first, "DARK|GRAY", 1);
    common::write_parquet(&root.join("targets-1.parquet"), second, "DARK|GRAY", 1);
    std::fs::write(root.join("README.txt"), "not a target file").unwrap();

    let src = ParquetTargetSource::open(root).unwrap();
    assert_eq!(src.files().len(), 2);

    let header = src.read_header().unwrap();
    assert_eq!(header.obscon, ObsConditions::DARK | ObsConditions::GRAY);
    assert_eq!(header.nside, 1);
    assert!(header.column_names.iter().any(|c| c == "BRICKID"));
    assert!(header.column_names.iter().any(|c| c == "PRIORITY"));

    let sink = MemoryLedgerSink::new();
    let config = LedgerConfig::builder().numproc(2).build().unwrap();
    let summary = make_ledger(&src, &config, &sink, &BitmaskRules::new(&reg)).unwrap();
    assert_eq!(summary.n_targets, rows.len());
    // every row decoded once over the whole run
    assert_eq!(src.rows_decoded(), rows.len());

    let ledgers = sink.into_inner();
    let all: Vec<_> = ledgers.values().flat_map(|l| l.table.rows.iter()).collect();
    for rec in &rows {
        let row = all
            .iter()
            .find(|r| r.target.targetid == rec.targetid)
            .unwrap();
        // legacy PRIORITY and Int32 NUMOBS_INIT land in the canonical fields
        assert_eq!(row.target.priority_init, rec.priority_init);
        assert_eq!(row.target.numobs_init, rec.numobs_init);
        assert_eq!(row.target.pmra, rec.pmra);
        assert_eq!(row.target.desi_target, rec.desi_target);
    }

    // the pixel reader matches the in-memory bucketing
    let pixnum = ang2pix_nest(1, 10.0, 0.0).unwrap();
    let columns = vec!["TARGETID".to_string(), "PRIORITY".to_string()];
    let cat = src.read_targets_in_pixel(1, pixnum, &columns).unwrap();
    assert_eq!(cat.column_names, columns);
    let mut from_parquet: Vec<i64> = cat.rows.iter().map(|r| r.targetid).collect();
    from_parquet.sort_unstable();
    let mut expected: Vec<i64> = rows
        .iter()
        .filter(|r| ang2pix_nest(1, r.ra, r.dec).unwrap() == pixnum)
        .map(|r| r.targetid)
        .collect();
    expected.sort_unstable();
    assert_eq!(from_parquet, expected);
    // RA was used for bucketing but not requested
    assert!(cat.rows.iter().all(|r| r.ra == 0.0));

    let single = ParquetTargetSource::open(root.join("targets-1.parquet")).unwrap();
    assert_eq!(single.files().len(), 1);
    assert!(ParquetTargetSource::open(root.join("missing")).is_err());
}

#[test]
fn test_parquet_files_declaring_their_pixel() {
    let reg = registry();
    let rules = BitmaskRules::new(&reg);
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8Path::from_path(dir.path()).unwrap();

    let mut by_pixel: BTreeMap<PixNum, Vec<TargetRecord>> = BTreeMap::new();
    for rec in sky() {
        let pixnum = ang2pix_nest(1, rec.ra, rec.dec).unwrap();
        by_pixel.entry(pixnum).or_default().push(rec);
    }
    for (pixnum, rows) in &by_pixel {
        common::write_parquet_with_metadata(
            &root.join(format!("targets-hp-{pixnum}.parquet")),
            rows,
            &[
                ("OBSCON", "DARK".to_string()),
                ("FILENSID", "1".to_string()),
                ("HPXPIXEL", pixnum.to_string()),
            ],
        );
    }

    let src = ParquetTargetSource::open(root).unwrap();
    let config = LedgerConfig::builder().numproc(2).build().unwrap();
    let from_parquet = MemoryLedgerSink::new();
    make_ledger(&src, &config, &from_parquet, &rules).unwrap();
    assert_eq!(src.rows_decoded(), sky().len());

    let in_memory = MemoryLedgerSink::new();
    make_ledger(&source(ObsConditions::DARK), &config, &in_memory, &rules).unwrap();

    assert_eq!(
        contents(&from_parquet.into_inner()),
        contents(&in_memory.into_inner())
    );
}

#[test]
fn test_parquet_without_filensid_uses_ledger_nside() {
    let dir = tempfile::tempdir().unwrap();
    let path = Utf8Path::from_path(dir.path()).unwrap().join("targets.parquet");
    common::write_parquet_with_metadata(&path, &sky(), &[("OBSCON", "BRIGHT".to_string())]);

    let src = ParquetTargetSource::open(&path).unwrap();
    let header = src.read_header().unwrap();
    assert_eq!(header.nside, MTL_NSIDE);
    assert_eq!(header.obscon, ObsConditions::BRIGHT);

    let pixnum = ang2pix_nest(MTL_NSIDE, 100.0, 20.0).unwrap();
    let cat = src
        .read_targets_in_pixel(MTL_NSIDE, pixnum, &["TARGETID".to_string()])
        .unwrap();
    let ids: Vec<i64> = cat.rows.iter().map(|r| r.targetid).collect();
    let expected: Vec<i64> = sky()
        .iter()
        .filter(|r| ang2pix_nest(MTL_NSIDE, r.ra, r.dec).unwrap() == pixnum)
        .map(|r| r.targetid)
        .collect();
    assert!(!expected.is_empty());
    assert_eq!(ids, expected);
}
