// ⚖️ Priority Repayment Violation
// General creditors repaid before a senior (priority) creditor

use super::{creditor_of, Detector, TransactionIndex, UNKNOWN_CREDITOR};
use crate::model::{FindingCandidate, FindingType, PersistedTransaction, Severity};

pub const TITLE: &str = "우선변제권 침해 가능성";

/// One finding per priority withdrawal, bundling every general
/// withdrawal dated strictly before it.
///
/// A general withdrawal counts whether or not the classifier named its
/// creditor: it is listed as "알 수 없음" in the description and left out of
/// `related_creditor_names`, but its id is always bundled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriorityRepaymentDetector;

fn display_name(tx: &PersistedTransaction) -> &str {
    tx.creditor_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(UNKNOWN_CREDITOR)
}

impl Detector for PriorityRepaymentDetector {
    fn name(&self) -> &'static str {
        "priority_repayment"
    }

    fn detect(&self, index: &TransactionIndex<'_>) -> Vec<FindingCandidate> {
        let general: Vec<_> = index
            .general
            .iter()
            .filter(|tx| tx.is_withdrawal())
            .collect();

        let mut priority: Vec<_> = index
            .priority_repayment
            .iter()
            .filter(|tx| tx.is_withdrawal())
            .collect();
        priority.sort_by_key(|tx| tx.transaction_date);

        let mut findings = Vec::new();

        for senior in priority {
            let earlier: Vec<_> = general
                .iter()
                .filter(|g| g.transaction_date < senior.transaction_date)
                .collect();
            if earlier.is_empty() {
                continue;
            }

            let mut related_transaction_ids: Vec<String> =
                earlier.iter().map(|g| g.id.clone()).collect();
            related_transaction_ids.push(senior.id.clone());

            let mut related_creditor_names: Vec<String> =
                earlier.iter().filter_map(|g| creditor_of(g)).collect();
            related_creditor_names
                .push(creditor_of(senior).unwrap_or_else(|| UNKNOWN_CREDITOR.to_string()));

            let general_names: Vec<&str> = earlier.iter().map(|g| display_name(g)).collect();

            findings.push(FindingCandidate {
                finding_type: FindingType::PriorityRepaymentViolation,
                severity: Severity::Critical,
                title: TITLE.to_string(),
                description: Some(format!(
                    "{}명의 일반 채권자({})를 우선변제권 채권자({})보다 먼저 변제하였습니다.",
                    earlier.len(),
                    general_names.join(", "),
                    display_name(senior)
                )),
                related_transaction_ids,
                related_creditor_names,
            });
        }

        findings
    }
}
