//! # Bitmask metadata
//!
//! Every class column of a target catalog (`DESI_TARGET`, `BGS_TARGET`, …) is a bit field.
//! A [`BitMask`] describes the bits of one such column: name, bit number, the observing
//! conditions under which a target of that class may be observed, the number of
//! observations it requests, and its priority in each observation state.
//!
//! Bitmasks are grouped in a [`MaskRegistry`], deserialized with `serde` from a TOML document:
//!
//! ```toml
//! [[desi_mask]]
//! name = "LRG"
//! bit = 0
//! obsconditions = "DARK"
//! numobs = 2
//! priorities = { UNOBS = 3200, DONE = 2, MORE_ZGOOD = 3200, MORE_ZWARN = 3200 }
//! ```
//!
//! Bits without `priorities` are calibration classes (skies, standards) and never drive a
//! priority. Inside a mask, bits are enumerated by **increasing bit number**; this is the
//! canonical order that the state classifier relies on to break ties.
//!
//! A built-in registry ([`MaskRegistry::builtin`]) covers the main survey and commissioning.
//! SV flavors fall back to the main-survey definitions when no `svN_*` mask is registered.
use std::collections::{BTreeMap, HashMap, HashSet};

use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::constants::{Priority, UNOBS_KEY};
use crate::mtl_errors::MtlError;
use crate::obscon::ObsConditions;
use crate::targets::Flavor;

/// Observation state of a target, as used to pick a priority from a bit definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObsState {
    /// Never observed.
    Unobs,
    /// Observed, needs no more observations.
    Done,
    /// Observed with a good redshift, more observations requested.
    MoreZgood,
    /// Observed with a redshift warning, more observations requested.
    MoreZwarn,
}

impl ObsState {
    pub fn key(&self) -> &'static str {
        match self {
            ObsState::Unobs => UNOBS_KEY,
            ObsState::Done => "DONE",
            ObsState::MoreZgood => "MORE_ZGOOD",
            ObsState::MoreZwarn => "MORE_ZWARN",
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawBit {
    name: String,
    bit: u32,
    #[serde(default)]
    description: String,
    #[serde(default)]
    obsconditions: Option<String>,
    #[serde(default)]
    numobs: Option<i64>,
    #[serde(default)]
    priorities: Option<BTreeMap<String, Priority>>,
}

/// Definition of a single bit.
#[derive(Debug, Clone, PartialEq)]
pub struct BitDef {
    pub name: String,
    pub bit: u32,
    pub description: String,
    pub obsconditions: ObsConditions,
    pub numobs: i64,
    /// Priority per observation state; `None` for calibration classes.
    pub priorities: Option<BTreeMap<String, Priority>>,
}

impl BitDef {
    #[inline]
    pub fn mask(&self) -> i64 {
        1_i64 << self.bit
    }

    #[inline]
    pub fn is_set(&self, bits: i64) -> bool {
        bits & self.mask() != 0
    }

    /// Priority of an unobserved target of this class.
    pub fn unobs_priority(&self) -> Option<Priority> {
        self.priorities.as_ref()?.get(UNOBS_KEY).copied()
    }

    /// Priority for a given state.
    ///
    /// `MORE_ZGOOD` and `MORE_ZWARN` default to the `UNOBS` priority, `DONE` defaults to the
    /// terminal `DONE` value when the definition omits them.
    pub fn priority(&self, state: ObsState) -> Option<Priority> {
        let priorities = self.priorities.as_ref()?;
        priorities.get(state.key()).copied().or(match state {
            ObsState::Done => Some(crate::constants::TerminalPriority::Done.value()),
            _ => priorities.get(UNOBS_KEY).copied(),
        })
    }

    fn from_raw(mask: &str, raw: RawBit) -> Result<Self, MtlError> {
        if raw.bit > 62 {
            return Err(MtlError::MaskDefinition(format!(
                "{mask}.{}: bit {} does not fit an i64 column",
                raw.name, raw.bit
            )));
        }
        if let Some(p) = &raw.priorities {
            if !p.contains_key(UNOBS_KEY) {
                return Err(MtlError::MaskDefinition(format!(
                    "{mask}.{}: priorities without {UNOBS_KEY}",
                    raw.name
                )));
            }
        }
        let obsconditions = match raw.obsconditions.as_deref() {
            Some(s) => s.parse()?,
            None => ObsConditions::default(),
        };
        Ok(BitDef {
            name: raw.name,
            bit: raw.bit,
            description: raw.description,
            obsconditions,
            numobs: raw.numobs.unwrap_or(0),
            priorities: raw.priorities,
        })
    }
}

/// Bits of one class column, sorted by bit number.
#[derive(Debug, Clone, PartialEq)]
pub struct BitMask {
    pub name: String,
    bits: Vec<BitDef>,
}

impl BitMask {
    /// Build a mask, sorting bits and checking that names and bit numbers are unique.
    pub fn new(name: impl Into<String>, mut bits: Vec<BitDef>) -> Result<Self, MtlError> {
        let name = name.into();
        bits.sort_by_key(|b| b.bit);

        let mut seen_names = HashSet::new();
        for pair in bits.windows(2) {
            if pair[0].bit == pair[1].bit {
                return Err(MtlError::MaskDefinition(format!(
                    "{name}: bit {} defined twice",
                    pair[0].bit
                )));
            }
        }
        for b in &bits {
            if !seen_names.insert(b.name.as_str()) {
                return Err(MtlError::MaskDefinition(format!(
                    "{name}: bit name {} defined twice",
                    b.name
                )));
            }
        }

        Ok(BitMask { name, bits })
    }

    /// Bit definitions in canonical (increasing bit) order.
    pub fn bits(&self) -> &[BitDef] {
        &self.bits
    }

    /// Bit names in canonical order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bits.iter().map(|b| b.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&BitDef> {
        self.bits.iter().find(|b| b.name == name)
    }

    /// Definitions of the bits set in `value`.
    pub fn set_bits(&self, value: i64) -> impl Iterator<Item = &BitDef> {
        self.bits.iter().filter(move |b| b.is_set(value))
    }
}

/// Named collection of bitmasks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaskRegistry {
    masks: HashMap<String, BitMask>,
}

static BUILTIN: Lazy<MaskRegistry> = Lazy::new(|| {
    MaskRegistry::from_toml_str(BUILTIN_MASKS).expect("built-in bitmask document is valid")
});

impl MaskRegistry {
    /// Parse a registry from a TOML document (one array of tables per mask).
    pub fn from_toml_str(doc: &str) -> Result<Self, MtlError> {
        let raw: HashMap<String, Vec<RawBit>> = toml::from_str(doc)?;
        let masks = raw
            .into_iter()
            .map(|(name, bits)| {
                let defs = bits
                    .into_iter()
                    .map(|b| BitDef::from_raw(&name, b))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((name.clone(), BitMask::new(name, defs)?))
            })
            .collect::<Result<HashMap<_, _>, MtlError>>()?;
        Ok(MaskRegistry { masks })
    }

    /// Built-in registry (main survey and commissioning).
    pub fn builtin() -> &'static MaskRegistry {
        &BUILTIN
    }

    pub fn insert(&mut self, mask: BitMask) {
        self.masks.insert(mask.name.clone(), mask);
    }

    /// Look up a mask by name. `svN_*` names fall back to the main-survey mask.
    pub fn get(&self, name: &str) -> Option<&BitMask> {
        self.masks.get(name).or_else(|| {
            let (prefix, rest) = name.split_once('_')?;
            let is_sv = prefix.len() > 2
                && prefix.starts_with("sv")
                && prefix[2..].chars().all(|c| c.is_ascii_digit());
            if is_sv {
                self.masks.get(rest)
            } else {
                None
            }
        })
    }

    /// Masks of the class columns of a flavor, in canonical column order.
    pub fn masks_for(&self, flavor: Flavor) -> Result<Vec<&BitMask>, MtlError> {
        flavor
            .mask_names()
            .iter()
            .map(|name| {
                self.get(name)
                    .ok_or_else(|| MtlError::MaskDefinition(format!("no mask named {name}")))
            })
            .collect()
    }
}

/// Built-in bitmask document.
const BUILTIN_MASKS: &str = r#"
[[desi_mask]]
name = "LRG"
bit = 0
description = "LRG"
obsconditions = "DARK"
numobs = 2
priorities = { UNOBS = 3200, DONE = 2, MORE_ZGOOD = 3200, MORE_ZWARN = 3200 }

[[desi_mask]]
name = "ELG"
bit = 1
description = "ELG"
obsconditions = "DARK|GRAY"
numobs = 1
priorities = { UNOBS = 3000, DONE = 2, MORE_ZGOOD = 2, MORE_ZWARN = 3000 }

[[desi_mask]]
name = "QSO"
bit = 2
description = "QSO"
obsconditions = "DARK"
numobs = 4
priorities = { UNOBS = 3400, DONE = 2, MORE_ZGOOD = 3500, MORE_ZWARN = 3400 }

[[desi_mask]]
name = "SKY"
bit = 32
description = "Blank sky locations"
obsconditions = "DARK|GRAY|BRIGHT|POOR|TWILIGHT12|TWILIGHT18"

[[desi_mask]]
name = "STD_FAINT"
bit = 33
description = "Standard stars for dark/gray conditions"
obsconditions = "DARK|GRAY"

[[desi_mask]]
name = "STD_WD"
bit = 34
description = "White Dwarf stars"
obsconditions = "DARK|GRAY|BRIGHT"

[[desi_mask]]
name = "STD_BRIGHT"
bit = 35
description = "Standard stars for BRIGHT conditions"
obsconditions = "BRIGHT"

[[desi_mask]]
name = "BAD_SKY"
bit = 36
description = "Blank sky locations that are imperfect but still useable"
obsconditions = "DARK|GRAY|BRIGHT|POOR|TWILIGHT12|TWILIGHT18"

[[desi_mask]]
name = "BGS_ANY"
bit = 60
description = "Any BGS bit is set"
obsconditions = "BRIGHT"

[[desi_mask]]
name = "MWS_ANY"
bit = 61
description = "Any MWS bit is set"
obsconditions = "BRIGHT"

[[desi_mask]]
name = "SCND_ANY"
bit = 62
description = "Any secondary bit is set"
obsconditions = "DARK|GRAY|BRIGHT"

[[bgs_mask]]
name = "BGS_FAINT"
bit = 0
description = "BGS faint targets"
obsconditions = "BRIGHT"
numobs = 2
priorities = { UNOBS = 2000, DONE = 2, MORE_ZGOOD = 1000, MORE_ZWARN = 2000 }

[[bgs_mask]]
name = "BGS_BRIGHT"
bit = 1
description = "BGS bright targets"
obsconditions = "BRIGHT"
numobs = 2
priorities = { UNOBS = 2100, DONE = 2, MORE_ZGOOD = 1000, MORE_ZWARN = 2100 }

[[bgs_mask]]
name = "BGS_WISE"
bit = 2
description = "BGS AGN targets selected with WISE"
obsconditions = "BRIGHT"
numobs = 2
priorities = { UNOBS = 2000, DONE = 2, MORE_ZGOOD = 1000, MORE_ZWARN = 2000 }

[[mws_mask]]
name = "MWS_BROAD"
bit = 0
description = "Milky Way Survey magnitude limited bulk sample"
obsconditions = "BRIGHT"
numobs = 1
priorities = { UNOBS = 1400, DONE = 2, MORE_ZGOOD = 2, MORE_ZWARN = 1400 }

[[mws_mask]]
name = "MWS_WD"
bit = 1
description = "Milky Way Survey White Dwarf"
obsconditions = "BRIGHT|GRAY|DARK"
numobs = 1
priorities = { UNOBS = 1600, DONE = 2, MORE_ZGOOD = 2, MORE_ZWARN = 1600 }

[[mws_mask]]
name = "MWS_NEARBY"
bit = 2
description = "Milky Way Survey volume-complete ~100pc sample"
obsconditions = "BRIGHT|GRAY|DARK"
numobs = 1
priorities = { UNOBS = 1600, DONE = 2, MORE_ZGOOD = 2, MORE_ZWARN = 1600 }

[[scnd_mask]]
name = "VETO"
bit = 0
description = "Never observe, even if a primary target bit is set"
obsconditions = "DARK|GRAY|BRIGHT|POOR|TWILIGHT12|TWILIGHT18"
priorities = { UNOBS = 0, DONE = 0, MORE_ZGOOD = 0, MORE_ZWARN = 0 }

[[scnd_mask]]
name = "DR16Q"
bit = 1
description = "Known quasars from the SDSS DR16Q catalog"
obsconditions = "DARK|GRAY"
numobs = 1
priorities = { UNOBS = 3400, DONE = 2, MORE_ZGOOD = 2, MORE_ZWARN = 3400 }

[[scnd_mask]]
name = "LOW_MASS_AGN"
bit = 2
description = "Low mass AGN"
obsconditions = "DARK|GRAY"
numobs = 1
priorities = { UNOBS = 1100, DONE = 2, MORE_ZGOOD = 2, MORE_ZWARN = 1100 }

[[scnd_mask]]
name = "FIRST_MALS"
bit = 3
description = "Radio sources from FIRST and MALS"
obsconditions = "DARK|GRAY"
numobs = 1
priorities = { UNOBS = 1050, DONE = 2, MORE_ZGOOD = 2, MORE_ZWARN = 1050 }

[[cmx_mask]]
name = "STD_GAIA"
bit = 0
description = "Gaia stars used for dither and other tests"
obsconditions = "DARK|GRAY|BRIGHT|POOR|TWILIGHT12|TWILIGHT18"

[[cmx_mask]]
name = "SKY"
bit = 1
description = "Blank sky locations"
obsconditions = "DARK|GRAY|BRIGHT|POOR|TWILIGHT12|TWILIGHT18"

[[cmx_mask]]
name = "SV0_BGS"
bit = 10
description = "BGS targets for SV0"
obsconditions = "BRIGHT"
numobs = 1
priorities = { UNOBS = 2000, DONE = 2, MORE_ZGOOD = 2, MORE_ZWARN = 2000 }

[[cmx_mask]]
name = "SV0_MWS"
bit = 11
description = "MWS targets for SV0"
obsconditions = "BRIGHT"
numobs = 1
priorities = { UNOBS = 1500, DONE = 2, MORE_ZGOOD = 2, MORE_ZWARN = 1500 }

[[cmx_mask]]
name = "SV0_QSO"
bit = 12
description = "QSO targets for SV0"
obsconditions = "DARK|GRAY"
numobs = 4
priorities = { UNOBS = 3400, DONE = 2, MORE_ZGOOD = 3500, MORE_ZWARN = 3400 }

[[cmx_mask]]
name = "SV0_ELG"
bit = 13
description = "ELG targets for SV0"
obsconditions = "DARK|GRAY"
numobs = 1
priorities = { UNOBS = 3000, DONE = 2, MORE_ZGOOD = 2, MORE_ZWARN = 3000 }

[[cmx_mask]]
name = "SV0_LRG"
bit = 14
description = "LRG targets for SV0"
obsconditions = "DARK"
numobs = 2
priorities = { UNOBS = 3200, DONE = 2, MORE_ZGOOD = 3200, MORE_ZWARN = 3200 }
"#;

#[cfg(test)]
mod bitmask_test {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        let reg = MaskRegistry::builtin();
        let desi = reg.get("desi_mask").unwrap();
        assert_eq!(desi.get("QSO").unwrap().unobs_priority(), Some(3400));
        assert_eq!(desi.get("SKY").unwrap().unobs_priority(), None);
        assert!(desi.get("ELG").unwrap().obsconditions.contains(ObsConditions::GRAY));

        let names: Vec<&str> = reg.get("bgs_mask").unwrap().names().collect();
        assert_eq!(names, vec!["BGS_FAINT", "BGS_BRIGHT", "BGS_WISE"]);
    }

    #[test]
    fn test_sv_fallback() {
        let reg = MaskRegistry::builtin();
        assert_eq!(
            reg.get("sv1_desi_mask").unwrap(),
            reg.get("desi_mask").unwrap()
        );
        assert!(reg.get("foo_desi_mask").is_none());
        assert_eq!(reg.masks_for(Flavor::Sv(2)).unwrap().len(), 4);
        assert_eq!(reg.masks_for(Flavor::Cmx).unwrap()[0].name, "cmx_mask");
    }

    #[test]
    fn test_bits_sorted_and_state_priority() {
        let doc = r#"
            [[m]]
            name = "B"
            bit = 3
            priorities = { UNOBS = 10 }

            [[m]]
            name = "A"
            bit = 1
        "#;
        let reg = MaskRegistry::from_toml_str(doc).unwrap();
        let m = reg.get("m").unwrap();
        assert_eq!(m.names().collect::<Vec<_>>(), vec!["A", "B"]);

        let b = m.get("B").unwrap();
        assert_eq!(b.priority(ObsState::MoreZwarn), Some(10));
        assert_eq!(b.priority(ObsState::Done), Some(2));
        assert_eq!(m.set_bits(0b1010).count(), 2);
    }

    #[test]
    fn test_invalid_documents() {
        let dup = r#"
            [[m]]
            name = "A"
            bit = 1
            [[m]]
            name = "B"
            bit = 1
        "#;
        assert!(matches!(
            MaskRegistry::from_toml_str(dup),
            Err(MtlError::MaskDefinition(_))
        ));

        let no_unobs = r#"
            [[m]]
            name = "A"
            bit = 1
            priorities = { DONE = 2 }
        "#;
        assert!(MaskRegistry::from_toml_str(no_unobs).is_err());

        let bad_obscon = r#"
            [[m]]
            name = "A"
            bit = 1
            obsconditions = "MOON"
        "#;
        assert_eq!(
            MaskRegistry::from_toml_str(bad_obscon),
            Err(MtlError::UnknownObsCondition("MOON".into()))
        );
    }
}
