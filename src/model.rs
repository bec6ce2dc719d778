// 🧱 Core domain types
// Closed-set enums, raw cells, canonical and persisted transactions, findings

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// RAW CELLS
// ============================================================================

/// One untyped cell of an extracted statement table.
///
/// JSON rows map naturally: numbers → `Number`, strings → `Text`, null → `Empty`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Number(f64),
    Text(String),
    Empty,
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(_) => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Display text of the cell (numbers without a trailing ".0")
    pub fn to_text(&self) -> String {
        match self {
            Cell::Text(s) => s.trim().to_string(),
            Cell::Number(n) if n.fract() == 0.0 && n.is_finite() => format!("{}", *n as i64),
            Cell::Number(n) => n.to_string(),
            Cell::Empty => String::new(),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(value.to_string())
        }
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::from(value.as_str())
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number(value)
    }
}

pub type Row = Vec<Cell>;

// ============================================================================
// CLOSED-SET ENUMS
// ============================================================================

/// Unknown enum label coming back from storage or user input
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Deposit,
    Withdrawal,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Deposit => "DEPOSIT",
            Direction::Withdrawal => "WITHDRAWAL",
        }
    }

    /// Korean statement label (입금/출금)
    pub fn label(&self) -> &'static str {
        match self {
            Direction::Deposit => "입금",
            Direction::Withdrawal => "출금",
        }
    }
}

/// Upstream classification of a persisted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionNature {
    General,
    Collateral,
    PriorityRepayment,
    Creditor,
}

impl TransactionNature {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionNature::General => "GENERAL",
            TransactionNature::Collateral => "COLLATERAL",
            TransactionNature::PriorityRepayment => "PRIORITY_REPAYMENT",
            TransactionNature::Creditor => "CREDITOR",
        }
    }
}

impl FromStr for TransactionNature {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GENERAL" => Ok(TransactionNature::General),
            "COLLATERAL" => Ok(TransactionNature::Collateral),
            "PRIORITY_REPAYMENT" => Ok(TransactionNature::PriorityRepayment),
            "CREDITOR" => Ok(TransactionNature::Creditor),
            other => Err(UnknownVariant {
                kind: "transaction nature",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingType {
    PreferenceRepayment,
    PriorityRepaymentViolation,
    CollateralTimingIssue,
    CollateralDuplicate,
    CollateralDischarge,
}

impl FindingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingType::PreferenceRepayment => "PREFERENCE_REPAYMENT",
            FindingType::PriorityRepaymentViolation => "PRIORITY_REPAYMENT_VIOLATION",
            FindingType::CollateralTimingIssue => "COLLATERAL_TIMING_ISSUE",
            FindingType::CollateralDuplicate => "COLLATERAL_DUPLICATE",
            FindingType::CollateralDischarge => "COLLATERAL_DISCHARGE",
        }
    }
}

impl FromStr for FindingType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PREFERENCE_REPAYMENT" => Ok(FindingType::PreferenceRepayment),
            "PRIORITY_REPAYMENT_VIOLATION" => Ok(FindingType::PriorityRepaymentViolation),
            "COLLATERAL_TIMING_ISSUE" => Ok(FindingType::CollateralTimingIssue),
            "COLLATERAL_DUPLICATE" => Ok(FindingType::CollateralDuplicate),
            "COLLATERAL_DISCHARGE" => Ok(FindingType::CollateralDischarge),
            other => Err(UnknownVariant {
                kind: "finding type",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl FromStr for Severity {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(Severity::Info),
            "WARNING" => Ok(Severity::Warning),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(UnknownVariant {
                kind: "severity",
                value: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// TRANSACTIONS
// ============================================================================

/// Normalized statement line, independent of the source layout.
/// `amount` is always a positive magnitude; `direction` carries the sign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTransaction {
    pub date: NaiveDate,
    pub direction: Direction,
    pub amount: f64,
    pub balance: Option<f64>,
    pub memo: String,
}

/// A canonical transaction ready to be written for a case/document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransaction {
    pub case_id: String,
    pub document_id: String,
    /// 1-based data row number inside the source document
    pub row_number: usize,
    pub transaction: CanonicalTransaction,
    pub raw_metadata: serde_json::Value,
}

impl NewTransaction {
    /// Hash backing the uniqueness constraint that makes re-imports duplicate-safe
    pub fn idempotency_hash(&self) -> String {
        let tx = &self.transaction;
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.case_id,
            self.document_id,
            self.row_number,
            tx.date,
            tx.direction.as_str(),
            tx.amount,
            tx.balance.map(|b| b.to_string()).unwrap_or_default(),
            tx.memo
        ));
        format!("{:x}", hasher.finalize())
    }
}

/// Transaction record as held by the persistence collaborator.
/// Classification fields are filled upstream and read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedTransaction {
    pub id: String,
    pub case_id: String,
    pub document_id: String,
    pub transaction_date: NaiveDate,
    pub deposit_amount: Option<f64>,
    pub withdrawal_amount: Option<f64>,
    pub balance: Option<f64>,
    pub memo: Option<String>,
    pub transaction_nature: Option<TransactionNature>,
    pub creditor_name: Option<String>,
    pub collateral_type: Option<String>,
}

impl PersistedTransaction {
    /// Deposit amount, 0 when absent or not finite
    pub fn deposit(&self) -> f64 {
        self.deposit_amount.filter(|a| a.is_finite()).unwrap_or(0.0)
    }

    /// Withdrawal amount, 0 when absent or not finite
    pub fn withdrawal(&self) -> f64 {
        self.withdrawal_amount.filter(|a| a.is_finite()).unwrap_or(0.0)
    }

    pub fn is_deposit(&self) -> bool {
        self.deposit() > 0.0
    }

    pub fn is_withdrawal(&self) -> bool {
        self.withdrawal() > 0.0
    }

    pub fn has_nature(&self, nature: TransactionNature) -> bool {
        self.transaction_nature == Some(nature)
    }

    pub fn memo_text(&self) -> &str {
        self.memo.as_deref().unwrap_or("")
    }
}

// ============================================================================
// FINDINGS
// ============================================================================

/// Detector output, not yet bound to a case or persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingCandidate {
    pub finding_type: FindingType,
    pub severity: Severity,
    pub title: String,
    pub description: Option<String>,
    pub related_transaction_ids: Vec<String>,
    pub related_creditor_names: Vec<String>,
}

impl FindingCandidate {
    /// Unordered identity used for de-duplication
    pub fn transaction_id_set(&self) -> BTreeSet<String> {
        self.related_transaction_ids.iter().cloned().collect()
    }
}

/// A candidate bound to its case, ready for bulk insert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFinding {
    pub case_id: String,
    #[serde(flatten)]
    pub candidate: FindingCandidate,
}

impl NewFinding {
    pub fn new(case_id: &str, candidate: FindingCandidate) -> Self {
        NewFinding {
            case_id: case_id.to_string(),
            candidate,
        }
    }
}

/// Persisted finding. Resolution is an external workflow; this crate never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub case_id: String,
    pub finding_type: FindingType,
    pub severity: Severity,
    pub title: String,
    pub description: Option<String>,
    pub related_transaction_ids: Vec<String>,
    pub related_creditor_names: Vec<String>,
    pub is_resolved: bool,
    pub created_at: DateTime<Utc>,
}

impl Finding {
    pub fn transaction_id_set(&self) -> BTreeSet<String> {
        self.related_transaction_ids.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_from_json_row() {
        let row: Vec<Cell> = serde_json::from_str(r#"["2024-01-01", 15000, null, ""]"#).unwrap();

        assert_eq!(row[0], Cell::Text("2024-01-01".to_string()));
        assert_eq!(row[1], Cell::Number(15000.0));
        assert_eq!(row[2], Cell::Empty);
        assert!(row[3].is_empty());
    }

    #[test]
    fn test_cell_to_text() {
        assert_eq!(Cell::Number(44927.0).to_text(), "44927");
        assert_eq!(Cell::Number(1.5).to_text(), "1.5");
        assert_eq!(Cell::Text("  잔액 ".to_string()).to_text(), "잔액");
        assert_eq!(Cell::Empty.to_text(), "");
    }

    #[test]
    fn test_enum_labels_roundtrip_through_storage_strings() {
        for nature in [
            TransactionNature::General,
            TransactionNature::Collateral,
            TransactionNature::PriorityRepayment,
            TransactionNature::Creditor,
        ] {
            assert_eq!(nature.as_str().parse::<TransactionNature>().unwrap(), nature);
        }

        assert_eq!(
            "COLLATERAL_DISCHARGE".parse::<FindingType>().unwrap(),
            FindingType::CollateralDischarge
        );
        assert!("SOMETHING_ELSE".parse::<Severity>().is_err());
    }

    #[test]
    fn test_idempotency_hash_is_stable_and_row_sensitive() {
        let tx = CanonicalTransaction {
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            direction: Direction::Deposit,
            amount: 1000.0,
            balance: Some(5000.0),
            memo: "홍길동".to_string(),
        };
        let a = NewTransaction {
            case_id: "case-1".to_string(),
            document_id: "doc-1".to_string(),
            row_number: 1,
            transaction: tx.clone(),
            raw_metadata: serde_json::Value::Null,
        };
        let mut b = a.clone();

        assert_eq!(a.idempotency_hash(), b.idempotency_hash());
        assert_eq!(a.idempotency_hash().len(), 64);

        b.row_number = 2;
        assert_ne!(a.idempotency_hash(), b.idempotency_hash());
    }

    #[test]
    fn test_finding_id_set_ignores_order() {
        let candidate = FindingCandidate {
            finding_type: FindingType::PreferenceRepayment,
            severity: Severity::Critical,
            title: "t".to_string(),
            description: None,
            related_transaction_ids: vec!["b".to_string(), "a".to_string()],
            related_creditor_names: vec![],
        };
        let expected: BTreeSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();

        assert_eq!(candidate.transaction_id_set(), expected);
    }
}
