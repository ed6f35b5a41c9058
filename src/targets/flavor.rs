//! # Target flavors
//!
//! Target catalogs come in a small closed set of **flavors**: the main survey, the
//! commissioning survey (CMX), and the successive Survey Validation campaigns (SV1, SV2, …).
//! The flavors differ only in the names of the class-bitmask columns:
//!
//! | flavor | class columns                                                         |
//! |--------|-----------------------------------------------------------------------|
//! | main   | `DESI_TARGET`, `BGS_TARGET`, `MWS_TARGET`, `SCND_TARGET`              |
//! | SV*n*  | `SVn_DESI_TARGET`, `SVn_BGS_TARGET`, `SVn_MWS_TARGET`, `SVn_SCND_TARGET` |
//! | CMX    | `CMX_TARGET`                                                          |
//!
//! The flavor is detected **once**, when a catalog is loaded. Everything downstream of the
//! loader works on the canonical [`TargetRecord`](crate::targets::TargetRecord) fields and
//! only goes back to flavor-specific names when a ledger is written.
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::constants::MTL_COLUMNS;
use crate::mtl_errors::MtlError;
use crate::targets::TargetColumn;

static SV_DESI_TARGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^SV(\d+)_DESI_TARGET$").expect("SV column regex")
});

/// Survey flavor of a target catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flavor {
    /// Main survey.
    Main,
    /// Commissioning.
    Cmx,
    /// Survey Validation campaign `n` (1-based).
    Sv(u8),
}

/// Canonical class columns, in the order used by masks and by the ledger.
const CLASS_COLUMNS: [TargetColumn; 4] = [
    TargetColumn::DesiTarget,
    TargetColumn::BgsTarget,
    TargetColumn::MwsTarget,
    TargetColumn::ScndTarget,
];

impl Flavor {
    /// Detect the flavor from the column names of a catalog.
    ///
    /// Arguments
    /// -----------------
    /// * `column_names`: Raw column names read from the target source.
    ///
    /// Return
    /// ----------
    /// * `Ok(Flavor::Main)` if `DESI_TARGET` is present,
    /// * `Ok(Flavor::Cmx)` if `CMX_TARGET` is present,
    /// * `Ok(Flavor::Sv(n))` if `SVn_DESI_TARGET` is present,
    /// * `Err(MtlError::UnknownFlavor)` otherwise.
    pub fn detect<S: AsRef<str>>(column_names: &[S]) -> Result<Flavor, MtlError> {
        let names = || column_names.iter().map(|c| c.as_ref());

        if names().any(|c| c == "DESI_TARGET") {
            return Ok(Flavor::Main);
        }
        if names().any(|c| c == "CMX_TARGET") {
            return Ok(Flavor::Cmx);
        }
        if let Some(n) = names()
            .filter_map(|c| SV_DESI_TARGET.captures(c))
            .filter_map(|cap| cap[1].parse::<u8>().ok())
            .min()
        {
            return Ok(Flavor::Sv(n));
        }

        Err(MtlError::UnknownFlavor(
            names().collect::<Vec<_>>().join(","),
        ))
    }

    /// Short tag of the flavor (`"main"`, `"cmx"`, `"sv1"`, …).
    pub fn tag(&self) -> String {
        match self {
            Flavor::Main => "main".into(),
            Flavor::Cmx => "cmx".into(),
            Flavor::Sv(n) => format!("sv{n}"),
        }
    }

    fn prefix(&self) -> String {
        match self {
            Flavor::Main => String::new(),
            Flavor::Cmx => "CMX_".into(),
            Flavor::Sv(n) => format!("SV{n}_"),
        }
    }

    /// Canonical class columns carried by this flavor.
    pub fn class_fields(&self) -> &'static [TargetColumn] {
        match self {
            Flavor::Cmx => &CLASS_COLUMNS[..1],
            _ => &CLASS_COLUMNS,
        }
    }

    /// Flavor-specific names of the class columns, in canonical order.
    pub fn class_columns(&self) -> Vec<String> {
        self.class_fields()
            .iter()
            .filter_map(|c| self.column_name(*c))
            .collect()
    }

    /// Names of the bitmasks describing the class columns, in canonical order.
    ///
    /// `desi_mask, bgs_mask, mws_mask, scnd_mask` for the main survey, the same names
    /// prefixed by `svN_` for SV, `cmx_mask` for commissioning.
    pub fn mask_names(&self) -> Vec<String> {
        match self {
            Flavor::Cmx => vec!["cmx_mask".into()],
            _ => {
                let prefix = self.prefix().to_lowercase();
                ["desi_mask", "bgs_mask", "mws_mask", "scnd_mask"]
                    .iter()
                    .map(|m| format!("{prefix}{m}"))
                    .collect()
            }
        }
    }

    /// On-disk name of a canonical column, or `None` if the flavor lacks it.
    pub fn column_name(&self, column: TargetColumn) -> Option<String> {
        match (self, column) {
            (Flavor::Cmx, TargetColumn::DesiTarget) => Some("CMX_TARGET".into()),
            (
                Flavor::Cmx,
                TargetColumn::BgsTarget | TargetColumn::MwsTarget | TargetColumn::ScndTarget,
            ) => None,
            (_, c) if c.is_class() => Some(format!("{}{}", self.prefix(), c.main_name())),
            (_, c) => Some(c.main_name().to_string()),
        }
    }

    /// MTL data model with the class columns renamed for this flavor.
    ///
    /// Commissioning catalogs carry a single class column, so `BGS_TARGET`,
    /// `MWS_TARGET`, and `SCND_TARGET` are dropped from the model.
    pub fn ledger_columns(&self) -> Vec<String> {
        MTL_COLUMNS
            .iter()
            .filter_map(|name| match TargetColumn::from_main_name(name) {
                Some(col) if col.is_class() => self.column_name(col),
                _ => Some(name.to_string()),
            })
            .collect()
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}
