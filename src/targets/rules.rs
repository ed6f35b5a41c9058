//! # Target rule evaluators
//!
//! The reconciliation engine does not decide priorities itself. It delegates three
//! questions to a [`TargetRules`] implementation:
//!
//! * how many more observations does each target need (`numobs_more`),
//! * what is each target's current priority (`priority`),
//! * under which observing conditions may each target be observed (`obsconditions`).
//!
//! The crate ships [`BitmaskRules`], a table-driven evaluator reading the bit definitions of
//! a [`MaskRegistry`]. Survey-specific rule books plug in by implementing [`TargetRules`].
//!
//! Reference rules
//! -----------------
//! For a target aligned with its redshift row:
//!
//! * `numobs_more = max(NUMOBS_INIT - NUMOBS, 0)`
//! * the observation state is
//!   * `UNOBS` when `NUMOBS == 0`,
//!   * `DONE` when `numobs_more == 0`,
//!   * `MORE_ZGOOD` when `ZWARN == 0`,
//!   * `MORE_ZWARN` otherwise;
//! * `priority` is the maximum, over the bits set in the class columns whose
//!   obsconditions intersect the requested ones, of the bit's priority for that state
//!   (zero when no bit applies);
//! * `obsconditions` is the OR of the obsconditions of every set bit of the class columns,
//!   or of the secondary column alone for secondary targets.
use itertools::izip;

use crate::constants::{Priority, TerminalPriority};
use crate::mtl_errors::MtlError;
use crate::obscon::ObsConditions;
use crate::targets::bitmask::{BitMask, MaskRegistry, ObsState};
use crate::targets::{Flavor, TargetRecord};
use crate::zcat::Redshift;

/// Evaluators consumed by [`make_mtl`](crate::mtl::merge::make_mtl).
///
/// `targets` and `zcat` passed to [`numobs_more`](TargetRules::numobs_more) and
/// [`priority`](TargetRules::priority) are aligned row by row. Every method returns one value
/// per target row.
pub trait TargetRules: Sync {
    fn numobs_more(
        &self,
        flavor: Flavor,
        targets: &[TargetRecord],
        zcat: &[Redshift],
        obscon: ObsConditions,
    ) -> Result<Vec<i64>, MtlError>;

    fn priority(
        &self,
        flavor: Flavor,
        targets: &[TargetRecord],
        zcat: &[Redshift],
        obscon: ObsConditions,
    ) -> Result<Vec<Priority>, MtlError>;

    fn obsconditions(
        &self,
        flavor: Flavor,
        targets: &[TargetRecord],
        secondary: bool,
    ) -> Result<Vec<i64>, MtlError>;

    /// Priorities meaning "no further observation".
    fn terminal_priorities(&self) -> &[Priority] {
        &TerminalPriority::VALUES
    }

    /// Masks used to label ledger rows, in canonical column order.
    fn masks(&self, flavor: Flavor) -> Result<Vec<&BitMask>, MtlError>;
}

/// Table-driven [`TargetRules`] over the bit definitions of a [`MaskRegistry`].
#[derive(Debug, Clone, Copy)]
pub struct BitmaskRules<'a> {
    registry: &'a MaskRegistry,
}

impl BitmaskRules<'static> {
    /// Rules over the built-in registry.
    pub fn builtin() -> Self {
        BitmaskRules {
            registry: MaskRegistry::builtin(),
        }
    }
}

impl<'a> BitmaskRules<'a> {
    pub fn new(registry: &'a MaskRegistry) -> Self {
        BitmaskRules { registry }
    }

    pub fn registry(&self) -> &'a MaskRegistry {
        self.registry
    }

    #[inline]
    fn remaining(target: &TargetRecord, z: &Redshift) -> i64 {
        (target.numobs_init - z.numobs).max(0)
    }

    fn state(target: &TargetRecord, z: &Redshift) -> ObsState {
        if z.numobs == 0 {
            ObsState::Unobs
        } else if Self::remaining(target, z) == 0 {
            ObsState::Done
        } else if z.zwarn == 0 {
            ObsState::MoreZgood
        } else {
            ObsState::MoreZwarn
        }
    }

    fn check_aligned(targets: &[TargetRecord], zcat: &[Redshift]) -> Result<(), MtlError> {
        if targets.len() != zcat.len() {
            return Err(MtlError::LengthMismatch {
                expected: targets.len(),
                found: zcat.len(),
            });
        }
        Ok(())
    }
}

impl TargetRules for BitmaskRules<'_> {
    fn numobs_more(
        &self,
        _flavor: Flavor,
        targets: &[TargetRecord],
        zcat: &[Redshift],
        _obscon: ObsConditions,
    ) -> Result<Vec<i64>, MtlError> {
        Self::check_aligned(targets, zcat)?;
        Ok(targets
            .iter()
            .zip(zcat)
            .map(|(t, z)| Self::remaining(t, z))
            .collect())
    }

    fn priority(
        &self,
        flavor: Flavor,
        targets: &[TargetRecord],
        zcat: &[Redshift],
        obscon: ObsConditions,
    ) -> Result<Vec<Priority>, MtlError> {
        Self::check_aligned(targets, zcat)?;
        let masks = self.masks(flavor)?;

        Ok(targets
            .iter()
            .zip(zcat)
            .map(|(t, z)| {
                let state = Self::state(t, z);
                izip!(&masks, t.class_bits())
                    .flat_map(|(mask, bits)| mask.set_bits(bits))
                    .filter(|b| b.obsconditions.intersects(obscon))
                    .filter_map(|b| b.priority(state))
                    .max()
                    .unwrap_or(0)
            })
            .collect())
    }

    fn obsconditions(
        &self,
        flavor: Flavor,
        targets: &[TargetRecord],
        secondary: bool,
    ) -> Result<Vec<i64>, MtlError> {
        let masks = self.masks(flavor)?;

        Ok(targets
            .iter()
            .map(|t| {
                let pairs = izip!(&masks, t.class_bits()).enumerate();
                pairs
                    // secondaries only look at the secondary class column
                    .filter(|(i, _)| !secondary || *i == 3)
                    .flat_map(|(_, (mask, bits))| mask.set_bits(bits))
                    .fold(0_i64, |acc, b| acc | b.obsconditions.bits())
            })
            .collect())
    }

    fn masks(&self, flavor: Flavor) -> Result<Vec<&BitMask>, MtlError> {
        self.registry.masks_for(flavor)
    }
}
