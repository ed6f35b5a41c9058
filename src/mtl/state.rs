//! # Target-state classification
//!
//! Every ledger row carries a human-readable `TARGET_STATE` label derived from its
//! **initial** priority. The labels come from the bit definitions of the flavor's masks:
//!
//! 1. walk the masks in canonical column order, and the bits of each mask in canonical
//!    (increasing bit) order;
//! 2. for every bit with an `UNOBS` priority, record `priority → bit name` unless that
//!    priority was already recorded (**first seen wins**);
//! 3. map priority `0` to `CALIBRATION`, whatever the bits say.
//!
//! A row whose initial priority is not in the table keeps `NOSTATE`.
//!
//! The first-seen tie-break is order dependent and must stay reproducible, so the table is
//! an insertion-ordered `Vec`, never a hash map.
use std::fmt;

use crate::constants::{Priority, CALIBRATION, NOSTATE, TARGET_STATE_WIDTH};
use crate::mtl::MtlTable;
use crate::targets::bitmask::BitMask;

/// Fixed-width (`TARGET_STATE_WIDTH` bytes) target-state label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetState(String);

impl TargetState {
    /// Build a label, truncated to the column width.
    pub fn new(label: &str) -> Self {
        let mut end = label.len().min(TARGET_STATE_WIDTH);
        while !label.is_char_boundary(end) {
            end -= 1;
        }
        TargetState(label[..end].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TargetState {
    fn default() -> Self {
        TargetState(NOSTATE.to_string())
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Insertion-ordered `priority → label` table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PriorityLabels {
    entries: Vec<(Priority, TargetState)>,
}

impl PriorityLabels {
    /// Build the table from the masks of a flavor.
    ///
    /// Arguments
    /// -----------------
    /// * `masks`: Bitmasks in canonical column order (`desi`, `bgs`, `mws`, `scnd`).
    ///
    /// Return
    /// ----------
    /// * The table, with `0 → CALIBRATION` always present.
    pub fn from_masks(masks: &[&BitMask]) -> Self {
        let mut labels = PriorityLabels::default();
        for bit in masks.iter().flat_map(|m| m.bits()) {
            if let Some(prio) = bit.unobs_priority() {
                if labels.get(prio).is_none() {
                    labels.entries.push((prio, TargetState::new(&bit.name)));
                }
            }
        }
        labels.set(0, CALIBRATION);
        labels
    }

    /// Set the label of a priority, keeping its position if already present.
    pub fn set(&mut self, priority: Priority, label: &str) {
        let state = TargetState::new(label);
        match self.entries.iter_mut().find(|(p, _)| *p == priority) {
            Some(entry) => entry.1 = state,
            None => self.entries.push((priority, state)),
        }
    }

    pub fn get(&self, priority: Priority) -> Option<&TargetState> {
        self.entries
            .iter()
            .find(|(p, _)| *p == priority)
            .map(|(_, s)| s)
    }

    /// Label of an initial priority, if any bit defines one.
    pub fn label(&self, priority_init: Priority) -> Option<&str> {
        self.get(priority_init).map(TargetState::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Priority, &TargetState)> {
        self.entries.iter().map(|(p, s)| (*p, s))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Label every row of `mtl` from its `PRIORITY_INIT`.
pub fn classify(mtl: &mut MtlTable, labels: &PriorityLabels) {
    for row in mtl.rows.iter_mut() {
        row.target_state = labels
            .get(row.target.priority_init)
            .cloned()
            .unwrap_or_default();
    }
}
