// 🔁 Finding Deduplication
// Same finding type + same set of related transactions = same finding

use crate::db::{FindingFilter, LedgerStore};
use crate::error::Result;
use crate::model::{Finding, FindingCandidate, FindingType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

// ============================================================================
// DEDUPLICATION RESULT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeduplicationOutcome {
    /// Candidates not yet recorded for the case
    pub fresh: Vec<FindingCandidate>,

    /// Dropped because an identical finding is already persisted
    pub already_recorded: usize,

    /// Dropped because an earlier candidate in the same batch covers it
    pub repeated_in_batch: usize,
}

// ============================================================================
// DEDUPLICATION ENGINE
// ============================================================================

/// Known transaction-id sets per finding type. Comparison ignores order.
#[derive(Debug, Default)]
pub struct FindingDeduplicator {
    recorded: HashMap<FindingType, Vec<BTreeSet<String>>>,
    admitted: HashMap<FindingType, Vec<BTreeSet<String>>>,
}

impl FindingDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_existing(existing: &[Finding]) -> Self {
        let mut engine = Self::new();
        for finding in existing {
            engine.record(finding.finding_type, finding.transaction_id_set());
        }
        engine
    }

    pub fn record(&mut self, finding_type: FindingType, ids: BTreeSet<String>) {
        self.recorded.entry(finding_type).or_default().push(ids);
    }

    pub fn is_recorded(&self, candidate: &FindingCandidate) -> bool {
        Self::contains(&self.recorded, candidate.finding_type, &candidate.transaction_id_set())
    }

    fn contains(
        known: &HashMap<FindingType, Vec<BTreeSet<String>>>,
        finding_type: FindingType,
        ids: &BTreeSet<String>,
    ) -> bool {
        known
            .get(&finding_type)
            .is_some_and(|sets| sets.iter().any(|set| set == ids))
    }

    /// Partition candidates into fresh and dropped, keeping first occurrences
    pub fn filter(&mut self, candidates: Vec<FindingCandidate>) -> DeduplicationOutcome {
        let mut outcome = DeduplicationOutcome::default();

        for candidate in candidates {
            let ids = candidate.transaction_id_set();
            if Self::contains(&self.recorded, candidate.finding_type, &ids) {
                outcome.already_recorded += 1;
                continue;
            }
            if Self::contains(&self.admitted, candidate.finding_type, &ids) {
                outcome.repeated_in_batch += 1;
                continue;
            }
            self.admitted.entry(candidate.finding_type).or_default().push(ids);
            outcome.fresh.push(candidate);
        }

        outcome
    }
}

/// Drop candidates already persisted for the case, one lookup per finding type
pub fn deduplicate_findings<S: LedgerStore + ?Sized>(
    store: &S,
    case_id: &str,
    candidates: Vec<FindingCandidate>,
) -> Result<DeduplicationOutcome> {
    let types: BTreeSet<FindingType> = candidates.iter().map(|c| c.finding_type).collect();

    let mut engine = FindingDeduplicator::new();
    for finding_type in types {
        let existing = store.find_findings(&FindingFilter::for_case(case_id).of_type(finding_type))?;
        for finding in &existing {
            engine.record(finding.finding_type, finding.transaction_id_set());
        }
    }

    let outcome = engine.filter(candidates);
    if outcome.already_recorded + outcome.repeated_in_batch > 0 {
        log::debug!(
            "case {}: dropped {} recorded and {} repeated findings",
            case_id,
            outcome.already_recorded,
            outcome.repeated_in_batch
        );
    }
    Ok(outcome)
}
