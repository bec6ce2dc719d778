// 🔎 Forensic Detectors
// Pure functions over a classified transaction snapshot → FindingCandidates

pub mod collateral;
pub mod preference;
pub mod priority;

pub use collateral::CollateralIssueDetector;
pub use preference::PreferenceRepaymentDetector;
pub use priority::PriorityRepaymentDetector;

use crate::config::DetectionConfig;
use crate::model::{FindingCandidate, PersistedTransaction, TransactionNature};
use chrono::NaiveDate;

/// Placeholder for a creditor the classifier did not name
pub const UNKNOWN_CREDITOR: &str = "알 수 없음";

/// A detector reads the shared index and never mutates anything,
/// so all of them can run side by side on one snapshot.
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect(&self, index: &TransactionIndex<'_>) -> Vec<FindingCandidate>;
}

/// The three detectors run by the analysis orchestrator
pub fn standard_detectors(config: &DetectionConfig) -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(PreferenceRepaymentDetector::from_config(config)),
        Box::new(PriorityRepaymentDetector),
        Box::new(CollateralIssueDetector),
    ]
}

// ============================================================================
// TRANSACTION INDEX
// ============================================================================

/// One pass over the snapshot, split by nature. Input order is preserved.
#[derive(Debug, Default)]
pub struct TransactionIndex<'a> {
    pub general: Vec<&'a PersistedTransaction>,
    pub collateral: Vec<&'a PersistedTransaction>,
    pub priority_repayment: Vec<&'a PersistedTransaction>,
    pub creditor: Vec<&'a PersistedTransaction>,
}

impl<'a> TransactionIndex<'a> {
    pub fn build(transactions: &'a [PersistedTransaction]) -> Self {
        let mut index = TransactionIndex::default();
        for tx in transactions {
            match tx.transaction_nature {
                Some(TransactionNature::General) => index.general.push(tx),
                Some(TransactionNature::Collateral) => index.collateral.push(tx),
                Some(TransactionNature::PriorityRepayment) => index.priority_repayment.push(tx),
                Some(TransactionNature::Creditor) => index.creditor.push(tx),
                None => {}
            }
        }
        index
    }

    pub fn len(&self) -> usize {
        self.general.len() + self.collateral.len() + self.priority_repayment.len() + self.creditor.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Trim, collapse inner whitespace, lowercase
pub fn normalize_creditor_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Normalized creditor name, None when absent or blank
pub fn creditor_of(tx: &PersistedTransaction) -> Option<String> {
    tx.creditor_name
        .as_deref()
        .map(normalize_creditor_name)
        .filter(|name| !name.is_empty())
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::model::{PersistedTransaction, TransactionNature};
    use chrono::{Duration, NaiveDate};

    pub fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(offset)
    }

    pub fn withdrawal(id: &str, nature: TransactionNature, offset: i64, amount: f64) -> PersistedTransaction {
        PersistedTransaction {
            id: id.to_string(),
            case_id: "case-1".to_string(),
            document_id: "doc-1".to_string(),
            transaction_date: day(offset),
            deposit_amount: None,
            withdrawal_amount: Some(amount),
            balance: None,
            memo: None,
            transaction_nature: Some(nature),
            creditor_name: None,
            collateral_type: None,
        }
    }

    pub fn deposit(id: &str, nature: TransactionNature, offset: i64, amount: f64) -> PersistedTransaction {
        PersistedTransaction {
            deposit_amount: Some(amount),
            withdrawal_amount: None,
            ..withdrawal(id, nature, offset, 0.0)
        }
    }

    pub fn with_creditor(mut tx: PersistedTransaction, name: &str) -> PersistedTransaction {
        tx.creditor_name = Some(name.to_string());
        tx
    }

    pub fn with_memo(mut tx: PersistedTransaction, memo: &str) -> PersistedTransaction {
        tx.memo = Some(memo.to_string());
        tx
    }
}
