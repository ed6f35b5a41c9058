//! Merged target lists (MTL) and their initial HEALPix ledgers.
//!
//! * [`mtl::merge::make_mtl`] reconciles targets with redshifts into a merged target list.
//! * [`ledger::make_ledger`] builds the initial ledger of every HEALPixel of a target source.
pub mod constants;
pub mod healpix;
pub mod io;
pub mod ledger;
pub mod mtl;
pub mod mtl_errors;
pub mod obscon;
pub mod targets;
pub mod zcat;
