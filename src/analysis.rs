// 🧮 Analysis Orchestrator
// Load classified transactions → run detectors side by side → dedup → persist

use crate::config::DetectionConfig;
use crate::db::{LedgerStore, TransactionFilter};
use crate::deduplication::deduplicate_findings;
use crate::detectors::{standard_detectors, Detector, TransactionIndex};
use crate::error::{ForensicsError, Result};
use crate::model::{FindingCandidate, NewFinding, PersistedTransaction};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub findings_created: usize,
    pub analysis_duration_ms: u64,
    pub transactions_analyzed: usize,
    pub duplicates_skipped: usize,
}

/// Run every detector over the same snapshot on its own thread.
/// Output order follows the detector list, not completion order.
/// Every thread is joined before the first panic is reported.
pub fn run_detectors(
    detectors: &[Box<dyn Detector>],
    transactions: &[PersistedTransaction],
) -> Result<Vec<FindingCandidate>> {
    let index = TransactionIndex::build(transactions);

    thread::scope(|scope| {
        let handles: Vec<_> = detectors
            .iter()
            .map(|detector| {
                let index = &index;
                (detector.name(), scope.spawn(move || detector.detect(index)))
            })
            .collect();

        let joined: Vec<_> = handles
            .into_iter()
            .map(|(name, handle)| (name, handle.join()))
            .collect();

        let mut candidates = Vec::new();
        for (name, outcome) in joined {
            let found = outcome.map_err(|_| ForensicsError::DetectorPanicked(name))?;
            log::debug!("{} detector: {} candidates", name, found.len());
            candidates.extend(found);
        }
        Ok(candidates)
    })
}

/// Analyze one case and persist findings that are not already recorded.
///
/// A failure while loading transactions aborts the run before anything is written.
pub fn analyze_findings<S: LedgerStore + ?Sized>(
    store: &S,
    case_id: &str,
    config: &DetectionConfig,
) -> Result<AnalysisResult> {
    let started = Instant::now();

    let transactions = store.find_transactions(&TransactionFilter::for_case(case_id).classified())?;
    log::info!("🔎 Analyzing {} classified transactions for case {}", transactions.len(), case_id);

    let candidates = run_detectors(&standard_detectors(config), &transactions)?;
    let outcome = deduplicate_findings(store, case_id, candidates)?;

    let records: Vec<NewFinding> = outcome
        .fresh
        .into_iter()
        .map(|candidate| NewFinding::new(case_id, candidate))
        .collect();
    let findings_created = if records.is_empty() {
        0
    } else {
        store.create_findings(&records)?
    };

    let elapsed = started.elapsed();
    if elapsed > Duration::from_millis(config.slow_analysis_warn_ms) {
        log::warn!(
            "⚠️  Analysis of case {} took {} ms ({} transactions)",
            case_id,
            elapsed.as_millis(),
            transactions.len()
        );
    }
    log::info!("✅ Case {}: {} new findings", case_id, findings_created);

    Ok(AnalysisResult {
        findings_created,
        analysis_duration_ms: elapsed.as_millis() as u64,
        transactions_analyzed: transactions.len(),
        duplicates_skipped: outcome.already_recorded + outcome.repeated_in_batch,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{setup_database, update_classification, FindingFilter};
    use crate::model::{
        CanonicalTransaction, Direction, Finding, FindingType, NewTransaction, TransactionNature,
    };
    use chrono::NaiveDate;
    use rusqlite::Connection;

    fn seed(conn: &Connection, row: usize, day: u32, direction: Direction, amount: f64) -> String {
        seed_with_memo(conn, row, day, direction, amount, &format!("row {}", row))
    }

    fn seed_with_memo(
        conn: &Connection,
        row: usize,
        day: u32,
        direction: Direction,
        amount: f64,
        memo: &str,
    ) -> String {
        let record = NewTransaction {
            case_id: "case-1".to_string(),
            document_id: "doc-1".to_string(),
            row_number: row,
            transaction: CanonicalTransaction {
                date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
                direction,
                amount,
                balance: None,
                memo: memo.to_string(),
            },
            raw_metadata: serde_json::Value::Null,
        };
        conn.create_transactions(&[record], false).unwrap();
        conn.find_transactions(&TransactionFilter::for_case("case-1"))
            .unwrap()
            .into_iter()
            .find(|tx| tx.memo.as_deref() == Some(memo))
            .unwrap()
            .id
    }

    fn preference_case(conn: &Connection) {
        let loan = seed(conn, 1, 1, Direction::Withdrawal, 100_000_000.0);
        let pledge = seed(conn, 2, 20, Direction::Deposit, 100_000_000.0);
        let _unclassified = seed(conn, 3, 21, Direction::Withdrawal, 5_000.0);
        update_classification(conn, &loan, Some(TransactionNature::General), None, None).unwrap();
        update_classification(conn, &pledge, Some(TransactionNature::Collateral), Some("A캐피탈"), None)
            .unwrap();
    }

    #[test]
    fn test_analysis_creates_findings_once() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        preference_case(&conn);

        let first = analyze_findings(&conn, "case-1", &DetectionConfig::default()).unwrap();
        assert_eq!(first.findings_created, 1);
        assert_eq!(first.transactions_analyzed, 2);

        let second = analyze_findings(&conn, "case-1", &DetectionConfig::default()).unwrap();
        assert_eq!(second.findings_created, 0);
        assert_eq!(second.duplicates_skipped, 1);

        let stored = conn.find_findings(&FindingFilter::for_case("case-1")).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].finding_type, FindingType::PreferenceRepayment);
        assert!(!stored[0].is_resolved);
    }

    #[test]
    fn test_empty_case() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let result = analyze_findings(&conn, "nobody", &DetectionConfig::default()).unwrap();
        assert_eq!(result.findings_created, 0);
        assert_eq!(result.transactions_analyzed, 0);
    }

    struct FailingStore;

    impl LedgerStore for FailingStore {
        fn create_transactions(&self, _: &[NewTransaction], _: bool) -> Result<usize> {
            panic!("not used");
        }

        fn find_transactions(&self, _: &TransactionFilter) -> Result<Vec<PersistedTransaction>> {
            Err(ForensicsError::Database(rusqlite::Error::InvalidQuery))
        }

        fn count_transactions(&self, _: &TransactionFilter) -> Result<i64> {
            Ok(0)
        }

        fn create_findings(&self, _: &[NewFinding]) -> Result<usize> {
            panic!("nothing may be written after a failed load");
        }

        fn find_findings(&self, _: &FindingFilter) -> Result<Vec<Finding>> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_load_failure_aborts_run() {
        let result = analyze_findings(&FailingStore, "case-1", &DetectionConfig::default());
        assert!(matches!(result, Err(ForensicsError::Database(_))));
    }

    struct PanickingDetector;

    impl Detector for PanickingDetector {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn detect(&self, _: &TransactionIndex<'_>) -> Vec<FindingCandidate> {
            panic!("boom")
        }
    }

    #[test]
    fn test_detector_panic_is_reported() {
        let detectors: Vec<Box<dyn Detector>> = vec![Box::new(PanickingDetector)];
        let result = run_detectors(&detectors, &[]);
        assert!(matches!(result, Err(ForensicsError::DetectorPanicked("panicking"))));
    }

    struct SecondPanickingDetector;

    impl Detector for SecondPanickingDetector {
        fn name(&self) -> &'static str {
            "second"
        }

        fn detect(&self, _: &TransactionIndex<'_>) -> Vec<FindingCandidate> {
            panic!("boom again")
        }
    }

    #[test]
    fn test_two_panicking_detectors_report_the_first() {
        let detectors: Vec<Box<dyn Detector>> = vec![
            Box::new(PanickingDetector),
            Box::new(SecondPanickingDetector),
            Box::new(crate::detectors::PriorityRepaymentDetector),
        ];
        let result = run_detectors(&detectors, &[]);
        assert!(matches!(result, Err(ForensicsError::DetectorPanicked("panicking"))));
    }

    #[test]
    fn test_amountless_discharge_written_through_store_is_found() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        // registry entries carry no amount, so they are written directly rather than extracted
        let discharge = seed_with_memo(&conn, 1, 4, Direction::Deposit, 0.0, "근저당 말소 등기");
        update_classification(&conn, &discharge, Some(TransactionNature::Collateral), Some("B은행"), None)
            .unwrap();

        let result = analyze_findings(&conn, "case-1", &DetectionConfig::default()).unwrap();
        assert_eq!(result.transactions_analyzed, 1);
        assert_eq!(result.findings_created, 1);

        let findings = conn
            .find_findings(&FindingFilter::for_case("case-1").of_type(FindingType::CollateralDischarge))
            .unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].related_transaction_ids, vec![discharge]);
        assert_eq!(findings[0].related_creditor_names, vec!["b은행"]);
    }
}
