use thiserror::Error;

use crate::constants::{PixNum, TargetId};

#[derive(Error, Debug)]
pub enum MtlError {
    #[error("File is type {header} but requested behavior is {requested}")]
    ObsconMismatch { header: String, requested: String },

    #[error("Unknown observing condition: {0}")]
    UnknownObsCondition(String),

    #[error("Invalid MTL parameter: {0}")]
    InvalidMtlParameter(String),

    #[error("TARGETID {0} of the redshift catalog is not in the target catalog")]
    UnmatchedTargetId(TargetId),

    #[error("Unable to determine the target flavor from columns: {0}")]
    UnknownFlavor(String),

    #[error("Required column not found: {0}")]
    MissingColumn(String),

    #[error("Column {column} has an unexpected type (expected {expected})")]
    ColumnType { column: String, expected: String },

    #[error("Length mismatch: expected {expected} rows, found {found}")]
    LengthMismatch { expected: usize, found: usize },

    #[error("Invalid HEALPix nside (must be a power of two): {0}")]
    InvalidNside(u32),

    #[error("HEALPixel {pixnum} out of range (npix = {npix})")]
    PixelOutOfRange { pixnum: PixNum, npix: u64 },

    #[error("Invalid bitmask definition: {0}")]
    MaskDefinition(String),

    #[error("Missing header keyword: {0}")]
    MissingHeaderKey(String),

    #[error("Set ${0} environment variable!")]
    MissingEnvVar(String),

    #[error("Unable to perform file operation: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parquet error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Bitmask document parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Worker pool error: {0}")]
    ThreadPool(String),
}

impl From<rayon::ThreadPoolBuildError> for MtlError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        MtlError::ThreadPool(err.to_string())
    }
}

impl PartialEq for MtlError {
    fn eq(&self, other: &Self) -> bool {
        use MtlError::*;
        match (self, other) {
            (
                ObsconMismatch {
                    header: h1,
                    requested: r1,
                },
                ObsconMismatch {
                    header: h2,
                    requested: r2,
                },
            ) => h1 == h2 && r1 == r2,
            (UnknownObsCondition(a), UnknownObsCondition(b)) => a == b,
            (InvalidMtlParameter(a), InvalidMtlParameter(b)) => a == b,
            (UnmatchedTargetId(a), UnmatchedTargetId(b)) => a == b,
            (UnknownFlavor(a), UnknownFlavor(b)) => a == b,
            (MissingColumn(a), MissingColumn(b)) => a == b,
            (
                ColumnType {
                    column: c1,
                    expected: e1,
                },
                ColumnType {
                    column: c2,
                    expected: e2,
                },
            ) => c1 == c2 && e1 == e2,
            (
                LengthMismatch {
                    expected: e1,
                    found: f1,
                },
                LengthMismatch {
                    expected: e2,
                    found: f2,
                },
            ) => e1 == e2 && f1 == f2,
            (InvalidNside(a), InvalidNside(b)) => a == b,
            (
                PixelOutOfRange {
                    pixnum: p1,
                    npix: n1,
                },
                PixelOutOfRange {
                    pixnum: p2,
                    npix: n2,
                },
            ) => p1 == p2 && n1 == n2,
            (MaskDefinition(a), MaskDefinition(b)) => a == b,
            (MissingHeaderKey(a), MissingHeaderKey(b)) => a == b,
            (MissingEnvVar(a), MissingEnvVar(b)) => a == b,
            (ThreadPool(a), ThreadPool(b)) => a == b,

            // Wrapped library errors are not comparable: same variant is enough
            (IoError(_), IoError(_)) => true,
            (ParquetError(_), ParquetError(_)) => true,
            (CsvError(_), CsvError(_)) => true,
            (TomlError(_), TomlError(_)) => true,

            _ => false,
        }
    }
}
