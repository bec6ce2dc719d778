// 🏠 Collateral Issues
// Timing, duplicate pledge, and discharge checks over COLLATERAL transactions

use super::{creditor_of, Detector, TransactionIndex};
use crate::model::{FindingCandidate, FindingType, PersistedTransaction, Severity};
use std::collections::{BTreeMap, BTreeSet};

pub const TIMING_TITLE: &str = "담보권 설정 시점 이슈";
pub const DUPLICATE_TITLE: &str = "동일 담보물 중복 설정 의심";
pub const DISCHARGE_TITLE: &str = "담보권 해지 확인";

/// Memo words marking a released or cancelled security interest
pub const DISCHARGE_KEYWORDS: [&str; 3] = ["해지", "소멸", "말소"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollateralIssueDetector;

impl CollateralIssueDetector {
    /// Collateral dated before a same-creditor general withdrawal.
    /// Both sides need a creditor name; two unnamed records never match.
    pub fn timing_issues(&self, index: &TransactionIndex<'_>) -> Vec<FindingCandidate> {
        let mut findings = Vec::new();

        for collateral in &index.collateral {
            let Some(creditor) = creditor_of(collateral) else {
                continue;
            };

            for general in index.general.iter().filter(|tx| tx.is_withdrawal()) {
                if collateral.transaction_date >= general.transaction_date {
                    continue;
                }
                if creditor_of(general).as_deref() != Some(creditor.as_str()) {
                    continue;
                }

                findings.push(FindingCandidate {
                    finding_type: FindingType::CollateralTimingIssue,
                    severity: Severity::Warning,
                    title: TIMING_TITLE.to_string(),
                    description: Some("대출 실행 이전에 담보를 제공하였습니다.".to_string()),
                    related_transaction_ids: vec![collateral.id.clone(), general.id.clone()],
                    related_creditor_names: vec![creditor.clone()],
                });
            }
        }

        findings
    }

    /// Same memo text pledged to two or more distinct creditors.
    /// Repeat pledges to one creditor (after name normalization) are not flagged.
    pub fn duplicate_pledges(&self, index: &TransactionIndex<'_>) -> Vec<FindingCandidate> {
        let mut by_memo: BTreeMap<&str, Vec<&PersistedTransaction>> = BTreeMap::new();
        for tx in &index.collateral {
            let memo = tx.memo_text();
            if memo.trim().is_empty() {
                continue;
            }
            by_memo.entry(memo).or_default().push(tx);
        }

        by_memo
            .into_iter()
            .filter_map(|(memo, group)| {
                let creditors: BTreeSet<String> =
                    group.iter().filter_map(|tx| creditor_of(tx)).collect();
                if creditors.len() < 2 {
                    return None;
                }

                Some(FindingCandidate {
                    finding_type: FindingType::CollateralDuplicate,
                    severity: Severity::Warning,
                    title: DUPLICATE_TITLE.to_string(),
                    description: Some(format!(
                        "동일한 담보물({})에 대해 중복 설정이 의심됩니다.",
                        memo
                    )),
                    related_transaction_ids: group.iter().map(|tx| tx.id.clone()).collect(),
                    related_creditor_names: creditors.into_iter().collect(),
                })
            })
            .collect()
    }

    /// Discharge memo with no money moving.
    ///
    /// The extractor drops rows without an amount, so these records reach the
    /// ledger through `LedgerStore::create_transactions` from an upstream writer
    /// (registry entries, manual classification) with a zero amount.
    pub fn unverified_discharges(&self, index: &TransactionIndex<'_>) -> Vec<FindingCandidate> {
        index
            .collateral
            .iter()
            .filter(|tx| {
                let memo = tx.memo_text();
                DISCHARGE_KEYWORDS.iter().any(|k| memo.contains(k))
                    && !tx.is_deposit()
                    && !tx.is_withdrawal()
            })
            .map(|tx| FindingCandidate {
                finding_type: FindingType::CollateralDischarge,
                severity: Severity::Info,
                title: DISCHARGE_TITLE.to_string(),
                description: Some(
                    "담보권이 해지되었습니다. 변제 완료 여부를 확인하십시오.".to_string(),
                ),
                related_transaction_ids: vec![tx.id.clone()],
                related_creditor_names: creditor_of(tx).into_iter().collect(),
            })
            .collect()
    }
}

impl Detector for CollateralIssueDetector {
    fn name(&self) -> &'static str {
        "collateral_issue"
    }

    fn detect(&self, index: &TransactionIndex<'_>) -> Vec<FindingCandidate> {
        let mut findings = self.timing_issues(index);
        findings.extend(self.duplicate_pledges(index));
        findings.extend(self.unverified_discharges(index));
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::fixtures::*;
    use crate::model::TransactionNature::{Collateral, General};

    fn run(txs: &[PersistedTransaction]) -> Vec<FindingCandidate> {
        CollateralIssueDetector.detect(&TransactionIndex::build(txs))
    }

    fn of_type(findings: &[FindingCandidate], finding_type: FindingType) -> Vec<&FindingCandidate> {
        findings.iter().filter(|f| f.finding_type == finding_type).collect()
    }

    #[test]
    fn test_collateral_before_same_creditor_loan() {
        let txs = vec![
            with_creditor(deposit("col", Collateral, 0, 50_000_000.0), "A캐피탈"),
            with_creditor(withdrawal("gen", General, 7, 50_000_000.0), "a캐피탈 "),
        ];

        let findings = run(&txs);
        let timing = of_type(&findings, FindingType::CollateralTimingIssue);
        assert_eq!(timing.len(), 1);
        assert_eq!(timing[0].severity, Severity::Warning);
        assert_eq!(timing[0].title, TIMING_TITLE);
        assert_eq!(timing[0].related_transaction_ids, vec!["col", "gen"]);
        assert_eq!(timing[0].related_creditor_names, vec!["a캐피탈"]);
    }

    #[test]
    fn test_timing_needs_matching_named_creditor() {
        let different = vec![
            with_creditor(deposit("col", Collateral, 0, 1.0), "A캐피탈"),
            with_creditor(withdrawal("gen", General, 7, 1.0), "B캐피탈"),
        ];
        assert!(of_type(&run(&different), FindingType::CollateralTimingIssue).is_empty());

        let after = vec![
            with_creditor(deposit("col", Collateral, 9, 1.0), "A캐피탈"),
            with_creditor(withdrawal("gen", General, 7, 1.0), "A캐피탈"),
        ];
        assert!(of_type(&run(&after), FindingType::CollateralTimingIssue).is_empty());
    }

    #[test]
    fn test_unnamed_creditors_never_match_timing() {
        let both_unnamed = vec![
            deposit("col", Collateral, 0, 1.0),
            withdrawal("gen", General, 7, 1.0),
        ];
        assert!(run(&both_unnamed).is_empty());

        let loan_unnamed = vec![
            with_creditor(deposit("col", Collateral, 0, 1.0), "A캐피탈"),
            withdrawal("gen", General, 7, 1.0),
        ];
        assert!(of_type(&run(&loan_unnamed), FindingType::CollateralTimingIssue).is_empty());

        let collateral_blank = vec![
            with_creditor(deposit("col", Collateral, 0, 1.0), "   "),
            with_creditor(withdrawal("gen", General, 7, 1.0), "A캐피탈"),
        ];
        assert!(of_type(&run(&collateral_blank), FindingType::CollateralTimingIssue).is_empty());
    }

    #[test]
    fn test_duplicate_pledge_across_creditors() {
        let memo = "서울시 강남구 아파트 근저당";
        let txs = vec![
            with_memo(with_creditor(deposit("c1", Collateral, 0, 1.0), "A캐피탈"), memo),
            with_memo(with_creditor(deposit("c2", Collateral, 5, 1.0), "B은행"), memo),
            with_memo(with_creditor(deposit("c3", Collateral, 6, 1.0), "B은행"), "다른 담보"),
        ];

        let findings = run(&txs);
        let duplicates = of_type(&findings, FindingType::CollateralDuplicate);
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].related_transaction_ids, vec!["c1", "c2"]);
        assert_eq!(duplicates[0].related_creditor_names, vec!["a캐피탈", "b은행"]);
        assert_eq!(
            duplicates[0].description.as_deref(),
            Some("동일한 담보물(서울시 강남구 아파트 근저당)에 대해 중복 설정이 의심됩니다.")
        );
    }

    #[test]
    fn test_same_creditor_same_memo_is_not_duplicate() {
        let txs = vec![
            with_memo(with_creditor(deposit("c1", Collateral, 0, 1.0), "A캐피탈"), "토지"),
            with_memo(with_creditor(deposit("c2", Collateral, 5, 1.0), "A캐피탈"), "토지"),
            with_memo(with_creditor(deposit("c3", Collateral, 6, 1.0), " a캐피탈"), "토지"),
            with_memo(deposit("c4", Collateral, 7, 1.0), "토지"),
        ];
        assert!(of_type(&run(&txs), FindingType::CollateralDuplicate).is_empty());
    }

    #[test]
    fn test_discharge_without_amount() {
        let mut discharge = with_memo(deposit("d1", Collateral, 0, 0.0), "근저당 말소");
        discharge.deposit_amount = None;
        let paid = with_memo(deposit("d2", Collateral, 1, 3_000_000.0), "근저당 해지 상환");

        let findings = run(&[discharge, paid]);
        let discharges = of_type(&findings, FindingType::CollateralDischarge);
        assert_eq!(discharges.len(), 1);
        assert_eq!(discharges[0].severity, Severity::Info);
        assert_eq!(discharges[0].related_transaction_ids, vec!["d1"]);
    }
}
