// 🚩 Preference Repayment
// A GENERAL withdrawal followed shortly by a COLLATERAL deposit of similar size

use super::{creditor_of, format_date, Detector, TransactionIndex};
use crate::config::DetectionConfig;
use crate::model::{FindingCandidate, FindingType, Severity};

pub const TITLE: &str = "악의성 의심: 대출 후 짧은 기간 내 담보제공";

#[derive(Debug, Clone, PartialEq)]
pub struct PreferenceRepaymentDetector {
    /// Inclusive upper bound on days between the pair; same-day pairs never match
    pub window_days: i64,
    pub amount_similarity: f64,
}

impl PreferenceRepaymentDetector {
    pub fn new() -> Self {
        Self::from_config(&DetectionConfig::default())
    }

    pub fn from_config(config: &DetectionConfig) -> Self {
        PreferenceRepaymentDetector {
            window_days: config.preference_window_days,
            amount_similarity: config.amount_similarity,
        }
    }

    fn amounts_similar(&self, loan: f64, collateral: f64) -> bool {
        (collateral - loan).abs() / loan <= self.amount_similarity
    }
}

impl Default for PreferenceRepaymentDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for PreferenceRepaymentDetector {
    fn name(&self) -> &'static str {
        "preference_repayment"
    }

    fn detect(&self, index: &TransactionIndex<'_>) -> Vec<FindingCandidate> {
        let collateral_deposits: Vec<_> = index
            .collateral
            .iter()
            .filter(|tx| tx.is_deposit())
            .collect();

        let mut findings = Vec::new();

        for loan in index.general.iter().filter(|tx| tx.is_withdrawal()) {
            let loan_amount = loan.withdrawal();

            for collateral in &collateral_deposits {
                let days = (collateral.transaction_date - loan.transaction_date).num_days();
                if days <= 0 || days > self.window_days {
                    continue;
                }
                if !self.amounts_similar(loan_amount, collateral.deposit()) {
                    continue;
                }

                findings.push(FindingCandidate {
                    finding_type: FindingType::PreferenceRepayment,
                    severity: Severity::Critical,
                    title: TITLE.to_string(),
                    description: Some(format!(
                        "대출 실행일({})로부터 {}일 이내에 담보를 제공하여 악의성이 의심됩니다.",
                        format_date(loan.transaction_date),
                        days
                    )),
                    related_transaction_ids: vec![loan.id.clone(), collateral.id.clone()],
                    related_creditor_names: creditor_of(collateral).into_iter().collect(),
                });
            }
        }

        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::fixtures::*;
    use crate::model::TransactionNature::{Collateral, General};

    fn run(txs: &[crate::model::PersistedTransaction]) -> Vec<FindingCandidate> {
        PreferenceRepaymentDetector::new().detect(&TransactionIndex::build(txs))
    }

    #[test]
    fn test_same_amount_within_window() {
        let txs = vec![
            withdrawal("loan", General, 0, 100_000_000.0),
            with_creditor(deposit("col", Collateral, 19, 100_000_000.0), " 대부  업체 "),
        ];

        let findings = run(&txs);
        assert_eq!(findings.len(), 1);
        let finding = &findings[0];
        assert_eq!(finding.severity, Severity::Critical);
        assert_eq!(finding.finding_type, FindingType::PreferenceRepayment);
        assert_eq!(finding.related_transaction_ids, vec!["loan", "col"]);
        assert_eq!(finding.related_creditor_names, vec!["대부 업체"]);
        assert_eq!(
            finding.description.as_deref(),
            Some("대출 실행일(2024-01-01)로부터 19일 이내에 담보를 제공하여 악의성이 의심됩니다.")
        );
    }

    #[test]
    fn test_fifteen_percent_difference_still_matches() {
        let txs = vec![
            withdrawal("loan", General, 0, 100_000_000.0),
            deposit("col", Collateral, 19, 115_000_000.0),
        ];
        assert_eq!(run(&txs).len(), 1);
    }

    #[test]
    fn test_thirty_percent_difference_does_not_match() {
        let txs = vec![
            withdrawal("loan", General, 0, 100_000_000.0),
            deposit("col", Collateral, 19, 130_000_000.0),
        ];
        assert!(run(&txs).is_empty());
    }

    #[test]
    fn test_window_bounds() {
        let day_35 = vec![
            withdrawal("loan", General, 0, 100_000_000.0),
            deposit("col", Collateral, 35, 100_000_000.0),
        ];
        assert!(run(&day_35).is_empty());

        let day_30 = vec![
            withdrawal("loan", General, 0, 100_000_000.0),
            deposit("col", Collateral, 30, 100_000_000.0),
        ];
        assert_eq!(run(&day_30).len(), 1);

        let same_day = vec![
            withdrawal("loan", General, 0, 100_000_000.0),
            deposit("col", Collateral, 0, 100_000_000.0),
        ];
        assert!(run(&same_day).is_empty());
    }

    #[test]
    fn test_collateral_before_loan_is_ignored() {
        let txs = vec![
            deposit("col", Collateral, 0, 100_000_000.0),
            withdrawal("loan", General, 10, 100_000_000.0),
        ];
        assert!(run(&txs).is_empty());
    }

    #[test]
    fn test_collateral_withdrawal_is_not_a_pledge() {
        let txs = vec![
            withdrawal("loan", General, 0, 100_000_000.0),
            withdrawal("col", Collateral, 5, 100_000_000.0),
        ];
        assert!(run(&txs).is_empty());
    }

    #[test]
    fn test_custom_window_from_config() {
        let config = DetectionConfig {
            preference_window_days: 40,
            ..DetectionConfig::default()
        };
        let txs = vec![
            withdrawal("loan", General, 0, 100_000_000.0),
            deposit("col", Collateral, 35, 100_000_000.0),
        ];
        let detector = PreferenceRepaymentDetector::from_config(&config);
        assert_eq!(detector.detect(&TransactionIndex::build(&txs)).len(), 1);
    }
}
