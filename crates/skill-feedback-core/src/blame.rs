//! Per-target accumulation of attributed signals.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::catalog::Target;
use crate::linker::LinkedTarget;
use crate::round_to;

pub const ERROR_BLAME_WEIGHT: u32 = 3;
pub const CORRECTION_BLAME_WEIGHT: u32 = 2;
pub const MAX_ENTRY_KEYWORDS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Error,
    Correction,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlameEntry {
    pub target: Target,
    pub errors: u32,
    pub corrections: u32,
    pub link_count: u32,
    pub raw_blame_score: u32,
    pub blame_score: f64,
    pub avg_confidence: f64,
    pub keywords: Vec<String>,
}

#[derive(Debug, Default)]
struct Accumulator {
    errors: u32,
    corrections: u32,
    summed_confidence: f64,
    link_count: u32,
    keywords: BTreeSet<String>,
}

impl Accumulator {
    fn into_entry(self, target: Target) -> BlameEntry {
        let raw_blame_score = ERROR_BLAME_WEIGHT * self.errors
            + CORRECTION_BLAME_WEIGHT * self.corrections;
        let avg_confidence = if self.link_count == 0 {
            0.0
        } else {
            self.summed_confidence / f64::from(self.link_count)
        };

        BlameEntry {
            target,
            errors: self.errors,
            corrections: self.corrections,
            link_count: self.link_count,
            raw_blame_score,
            blame_score: round_to(f64::from(raw_blame_score) * avg_confidence, 1),
            avg_confidence: round_to(avg_confidence, 2),
            keywords: self
                .keywords
                .into_iter()
                .take(MAX_ENTRY_KEYWORDS)
                .collect(),
        }
    }
}

/// Entries are created only through linking, so every entry keeps
/// `link_count == errors + corrections`.
#[derive(Debug, Default)]
pub struct BlameAggregator {
    entries: BTreeMap<Target, Accumulator>,
}

impl BlameAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_link(&mut self, linked: &LinkedTarget, kind: SignalKind) {
        let entry = self.entries.entry(linked.target.clone()).or_default();
        match kind {
            SignalKind::Error => entry.errors += 1,
            SignalKind::Correction => entry.corrections += 1,
        }
        entry.summed_confidence += linked.confidence;
        entry.link_count += 1;
        entry
            .keywords
            .extend(linked.matched_keywords.iter().cloned());
    }

    /// Folds an already ranked entry from another transcript into this one.
    /// The summed confidence is reconstructed from the rounded average.
    pub fn merge_entry(&mut self, other: &BlameEntry) {
        let entry = self.entries.entry(other.target.clone()).or_default();
        entry.errors += other.errors;
        entry.corrections += other.corrections;
        entry.summed_confidence += other.avg_confidence * f64::from(other.link_count);
        entry.link_count += other.link_count;
        entry.keywords.extend(other.keywords.iter().cloned());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorted by weighted score, then raw score, both descending. Equal
    /// entries keep target order.
    #[must_use]
    pub fn into_ranked(self) -> Vec<BlameEntry> {
        let mut ranked = self
            .entries
            .into_iter()
            .map(|(target, accumulator)| accumulator.into_entry(target))
            .collect::<Vec<_>>();
        ranked.sort_by(|left, right| {
            right
                .blame_score
                .total_cmp(&left.blame_score)
                .then_with(|| right.raw_blame_score.cmp(&left.raw_blame_score))
        });
        ranked
    }
}
