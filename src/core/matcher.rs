use crate::core::hash::{FuzzyHash, StrictHash};
use crate::core::record::PostId;
use crate::core::store::{DuplicateStore, RecordLog, StoreError};
use log::debug;
use serde::{Deserialize, Serialize};

/// Largest distance at or below which two images count as near-duplicates.
pub const FUZZY_THRESHOLD: u32 = 25;

/// Reference distance scale used when reporting similarity.
pub const MAX_DISTANCE: u32 = 254;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Unique,
    ExactDuplicate,
    FuzzyDuplicate { distance: u32 },
}

impl Verdict {
    pub fn is_unique(&self) -> bool {
        matches!(self, Verdict::Unique)
    }
}

/// Similarity in percent for a Hamming distance, for display only.
pub fn similarity_percent(distance: u32) -> f64 {
    let max = f64::from(MAX_DISTANCE);
    (max - 1.0 - f64::from(distance)) / max * 100.0
}

/// Decides whether a hashed post duplicates something already in the store.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityMatcher {
    pub threshold: u32,
}

impl Default for SimilarityMatcher {
    fn default() -> Self {
        Self::new(FUZZY_THRESHOLD)
    }
}

impl SimilarityMatcher {
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }

    pub fn evaluate<L: RecordLog>(
        &self,
        store: &DuplicateStore<L>,
        id: &PostId,
        strict: &StrictHash,
        fuzzy: &FuzzyHash,
    ) -> Verdict {
        if store.contains_identity(id) {
            return Verdict::ExactDuplicate;
        }
        let verdict = self.match_hashes(store, strict, fuzzy);
        if let Verdict::FuzzyDuplicate { distance } = verdict {
            debug!("{} is within {} bits of a stored image", id, distance);
        }
        verdict
    }

    /// Hash-only half of [`evaluate`](Self::evaluate): exact lookup, then
    /// the closest entry in the fuzzy bucket.
    pub fn match_hashes<L: RecordLog>(
        &self,
        store: &DuplicateStore<L>,
        strict: &StrictHash,
        fuzzy: &FuzzyHash,
    ) -> Verdict {
        if store.contains_strict_hash(strict) {
            return Verdict::ExactDuplicate;
        }

        let bucket = store.bucket_for(fuzzy);
        let Some(distance) = bucket.iter().map(|other| strict.distance(other)).min() else {
            return Verdict::Unique;
        };
        debug!(
            "Closest of {} bucketed hashes is at distance {}",
            bucket.len(),
            distance
        );

        if distance <= self.threshold {
            Verdict::FuzzyDuplicate { distance }
        } else {
            Verdict::Unique
        }
    }

    /// Applies the store mutation that goes with `verdict`.
    pub fn record_verdict<L: RecordLog>(
        &self,
        store: &mut DuplicateStore<L>,
        id: &PostId,
        strict: &StrictHash,
        fuzzy: &FuzzyHash,
        verdict: Verdict,
    ) -> Result<(), StoreError> {
        match verdict {
            Verdict::Unique => store.record_unique(id, strict, fuzzy),
            Verdict::ExactDuplicate => store.record_identity_only(id),
            Verdict::FuzzyDuplicate { .. } => store.record_fuzzy_duplicate(id, strict, fuzzy),
        }
    }
}
