// 🗂️ Statement Schema Detector
// Keyword tables for the known Korean statement layouts → ColumnMapping

use crate::error::{ForensicsError, Result};
use crate::memo_scorer;
use crate::model::{Cell, Row};
use serde::{Deserialize, Serialize};

/// Header cells containing this are always the transaction-type column
pub const TRANSACTION_TYPE_HEADER: &str = "거래구분";

/// Identification keywords a header must contain before a schema is accepted
pub const MIN_IDENTIFICATION_MATCHES: usize = 2;

// ============================================================================
// COLUMN MAPPING
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnRole {
    Date,
    Deposit,
    Withdrawal,
    /// Single signed-by-type amount column (used together with TransactionType)
    Amount,
    Balance,
    Memo,
    TransactionType,
}

/// Role → column index, built once per statement and reused for every row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMapping {
    pub date: usize,
    pub deposit: Option<usize>,
    pub withdrawal: Option<usize>,
    pub amount: Option<usize>,
    pub balance: Option<usize>,
    pub memo: Option<usize>,
    pub transaction_type: Option<usize>,
}

impl ColumnMapping {
    pub fn new(date: usize) -> Self {
        ColumnMapping {
            date,
            deposit: None,
            withdrawal: None,
            amount: None,
            balance: None,
            memo: None,
            transaction_type: None,
        }
    }

    pub fn get(&self, role: ColumnRole) -> Option<usize> {
        match role {
            ColumnRole::Date => Some(self.date),
            ColumnRole::Deposit => self.deposit,
            ColumnRole::Withdrawal => self.withdrawal,
            ColumnRole::Amount => self.amount,
            ColumnRole::Balance => self.balance,
            ColumnRole::Memo => self.memo,
            ColumnRole::TransactionType => self.transaction_type,
        }
    }

    fn set(&mut self, role: ColumnRole, index: usize) {
        match role {
            ColumnRole::Date => self.date = index,
            ColumnRole::Deposit => self.deposit = Some(index),
            ColumnRole::Withdrawal => self.withdrawal = Some(index),
            ColumnRole::Amount => self.amount = Some(index),
            ColumnRole::Balance => self.balance = Some(index),
            ColumnRole::Memo => self.memo = Some(index),
            ColumnRole::TransactionType => self.transaction_type = Some(index),
        }
    }
}

// ============================================================================
// SCHEMA TABLE
// ============================================================================

/// A known statement layout: identification keywords plus per-role header keywords.
/// Adding a layout means adding an entry to `STATEMENT_SCHEMAS`.
#[derive(Debug, Clone, Copy)]
pub struct StatementSchema {
    pub name: &'static str,
    pub identification: &'static [&'static str],
    pub roles: &'static [(ColumnRole, &'static [&'static str])],
}

impl StatementSchema {
    /// Number of identification keywords found (substring match) in the header
    pub fn identification_matches(&self, headers: &[String]) -> usize {
        self.identification
            .iter()
            .filter(|kw| headers.iter().any(|h| h.contains(*kw)))
            .count()
    }

    pub fn keywords_for(&self, role: ColumnRole) -> &'static [&'static str] {
        self.roles
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, kws)| *kws)
            .unwrap_or(&[])
    }

    /// First header cell containing any keyword for `role`
    pub fn find_column(&self, headers: &[String], role: ColumnRole) -> Option<usize> {
        let keywords = self.keywords_for(role);
        headers
            .iter()
            .position(|h| keywords.iter().any(|kw| h.contains(kw)))
    }
}

/// Declared order matters: the first schema that identifies wins.
pub static STATEMENT_SCHEMAS: [StatementSchema; 3] = [
    // 거래일자, 일련번호, 적요, 상태, 지급금액, 입금금액, 잔액, 취급점, 시각, Teller
    StatementSchema {
        name: "general_bank",
        identification: &["지급금액", "입금금액", "적요", "상태", "취급점", "Teller"],
        roles: &[
            (ColumnRole::Date, &["거래일자", "일자"]),
            (ColumnRole::Deposit, &["입금금액", "입금"]),
            (ColumnRole::Withdrawal, &["지급금액", "지급", "출금"]),
            (ColumnRole::Balance, &["잔액"]),
            (ColumnRole::Memo, &["적요", "내용", "비고"]),
        ],
    },
    // 거래일자, 내용, 찾으신금액, 맡기신금액, 비고, 잔액, 후송, 마감후, 키, 기번, 점, 점명
    StatementSchema {
        name: "passbook",
        identification: &["찾으신금액", "맡기신금액", "비고", "후송", "마감후", "기번", "점명"],
        roles: &[
            (ColumnRole::Date, &["거래일자", "일자"]),
            (ColumnRole::Deposit, &["맡기신금액", "입금", "예금"]),
            (ColumnRole::Withdrawal, &["찾으신금액", "출금", "인출"]),
            (ColumnRole::Balance, &["잔액"]),
            (ColumnRole::Memo, &["비고", "내용", "적요"]),
        ],
    },
    // No, 거래일시, 거래구분, 거래금액, 거래후잔액, 은행, 계좌정보/결제정보
    StatementSchema {
        name: "mobile_wallet",
        identification: &["거래구분", "거래일시", "계좌정보", "결제정보"],
        roles: &[
            (ColumnRole::Date, &["거래일시", "일자"]),
            (ColumnRole::Amount, &["거래금액"]),
            (ColumnRole::Balance, &["거래후잔액", "잔액"]),
            (ColumnRole::Memo, &["계좌정보", "결제정보", "내용"]),
        ],
    },
];

// ============================================================================
// DETECTION
// ============================================================================

/// Outcome of header-based detection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedColumns {
    pub schema_name: &'static str,
    pub mapping: ColumnMapping,
    /// Memo column chosen by the content scorer instead of a header keyword
    pub memo_inferred: bool,
}

fn header_texts(header: &[Cell]) -> Vec<String> {
    header.iter().map(|cell| cell.to_text()).collect()
}

/// Pick the first schema whose identification threshold is met
pub fn identify_schema(headers: &[String]) -> Option<&'static StatementSchema> {
    STATEMENT_SCHEMAS
        .iter()
        .find(|schema| schema.identification_matches(headers) >= MIN_IDENTIFICATION_MATCHES)
}

/// Match a header row against the schema table and assign column roles.
///
/// Does not consult data rows; see `detect_statement_columns` for the memo fallback.
pub fn detect_columns(header: &[Cell]) -> Result<DetectedColumns> {
    let headers = header_texts(header);

    let schema = identify_schema(&headers).ok_or(ForensicsError::UnknownSchema)?;
    let date = schema
        .find_column(&headers, ColumnRole::Date)
        .ok_or_else(|| ForensicsError::MissingDateColumn(schema.name.to_string()))?;

    let mut mapping = ColumnMapping::new(date);
    for role in [
        ColumnRole::Deposit,
        ColumnRole::Withdrawal,
        ColumnRole::Amount,
        ColumnRole::Balance,
        ColumnRole::Memo,
    ] {
        if let Some(index) = schema.find_column(&headers, role) {
            mapping.set(role, index);
        }
    }

    if let Some(index) = headers.iter().position(|h| h.contains(TRANSACTION_TYPE_HEADER)) {
        mapping.transaction_type = Some(index);
    }

    Ok(DetectedColumns {
        schema_name: schema.name,
        mapping,
        memo_inferred: false,
    })
}

/// Header detection plus the memo-column scorer fallback over the sample rows
pub fn detect_statement_columns(rows: &[Row], header_row_index: usize) -> Result<DetectedColumns> {
    let header = rows
        .get(header_row_index)
        .ok_or(ForensicsError::HeaderRowOutOfRange {
            index: header_row_index,
            rows: rows.len(),
        })?;

    let mut detected = detect_columns(header)?;

    if detected.mapping.memo.is_none() {
        if let Some(memo) = memo_scorer::detect_memo_column(rows, header_row_index) {
            detected.mapping.memo = Some(memo);
            detected.memo_inferred = true;
        }
    }

    log::info!(
        "Detected statement schema '{}' (date column {}, memo {:?}{})",
        detected.schema_name,
        detected.mapping.date,
        detected.mapping.memo,
        if detected.memo_inferred { ", inferred" } else { "" }
    );

    Ok(detected)
}

// ============================================================================
// EXTERNAL COLUMN ANALYZER
// ============================================================================

/// Mapping proposed by an external analyzer (OCR/LLM agent) for unknown layouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnAnalysis {
    pub mapping: ColumnMapping,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub reasoning: String,
}

/// Seam for the upstream column-analysis collaborator.
/// `Ok(None)` means the analyzer declines to propose a mapping.
pub trait ColumnAnalyzer {
    fn analyze(&self, rows: &[Row], header_row_index: usize) -> Result<Option<ColumnAnalysis>>;
}

/// A proposal the caller already holds, e.g. one sent along with an API request
impl ColumnAnalyzer for ColumnAnalysis {
    fn analyze(&self, _rows: &[Row], _header_row_index: usize) -> Result<Option<ColumnAnalysis>> {
        Ok(Some(self.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MappingSource {
    Schema {
        name: &'static str,
        memo_inferred: bool,
    },
    Analyzer {
        confidence: f64,
        reasoning: String,
    },
}

impl MappingSource {
    pub fn label(&self) -> &str {
        match self {
            MappingSource::Schema { name, .. } => name,
            MappingSource::Analyzer { .. } => "external_analyzer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedMapping {
    pub source: MappingSource,
    pub mapping: ColumnMapping,
}

/// Schema detector first; the analyzer is asked only when no schema applies.
/// If the analyzer also declines, the schema error is returned.
pub fn resolve_column_mapping(
    rows: &[Row],
    header_row_index: usize,
    analyzer: Option<&dyn ColumnAnalyzer>,
) -> Result<ResolvedMapping> {
    let schema_error = match detect_statement_columns(rows, header_row_index) {
        Ok(detected) => {
            return Ok(ResolvedMapping {
                source: MappingSource::Schema {
                    name: detected.schema_name,
                    memo_inferred: detected.memo_inferred,
                },
                mapping: detected.mapping,
            })
        }
        Err(e @ ForensicsError::HeaderRowOutOfRange { .. }) => return Err(e),
        Err(e) => e,
    };

    let Some(analyzer) = analyzer else {
        return Err(schema_error);
    };

    match analyzer.analyze(rows, header_row_index)? {
        Some(analysis) => {
            log::info!(
                "Schema detection failed ({}); using external column analysis (confidence {:.2})",
                schema_error,
                analysis.confidence
            );
            Ok(ResolvedMapping {
                source: MappingSource::Analyzer {
                    confidence: analysis.confidence,
                    reasoning: analysis.reasoning,
                },
                mapping: analysis.mapping,
            })
        }
        None => {
            log::warn!("External column analyzer declined; {}", schema_error);
            Err(schema_error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Row {
        cells.iter().map(|c| Cell::from(*c)).collect()
    }

    fn general_header() -> Row {
        row(&[
            "거래일자", "일련번호", "적요", "상태", "지급금액", "입금금액", "잔액", "취급점", "시각", "Teller",
        ])
    }

    #[test]
    fn test_detect_general_bank_layout() {
        let detected = detect_columns(&general_header()).unwrap();

        assert_eq!(detected.schema_name, "general_bank");
        assert_eq!(detected.mapping.date, 0);
        assert_eq!(detected.mapping.memo, Some(2));
        assert_eq!(detected.mapping.withdrawal, Some(4));
        assert_eq!(detected.mapping.deposit, Some(5));
        assert_eq!(detected.mapping.balance, Some(6));
        assert_eq!(detected.mapping.transaction_type, None);
    }

    #[test]
    fn test_detect_passbook_layout() {
        let header = row(&[
            "거래일자", "내용", "찾으신금액", "맡기신금액", "비고", "잔액", "후송", "마감후", "키", "기번", "점", "점명",
        ]);
        let detected = detect_columns(&header).unwrap();

        assert_eq!(detected.schema_name, "passbook");
        assert_eq!(detected.mapping.withdrawal, Some(2));
        assert_eq!(detected.mapping.deposit, Some(3));
        // first header cell carrying a memo keyword
        assert_eq!(detected.mapping.memo, Some(1));
    }

    #[test]
    fn test_detect_mobile_wallet_layout_maps_type_and_amount() {
        let header = row(&["No", "거래일시", "거래구분", "거래금액", "거래후잔액", "은행", "계좌정보/결제정보"]);
        let detected = detect_columns(&header).unwrap();

        assert_eq!(detected.schema_name, "mobile_wallet");
        assert_eq!(detected.mapping.date, 1);
        assert_eq!(detected.mapping.transaction_type, Some(2));
        assert_eq!(detected.mapping.amount, Some(3));
        assert_eq!(detected.mapping.balance, Some(4));
        assert_eq!(detected.mapping.memo, Some(6));
    }

    #[test]
    fn test_single_identification_keyword_is_not_enough() {
        let header = row(&["거래일자", "적요", "금액"]);
        assert!(matches!(detect_columns(&header), Err(ForensicsError::UnknownSchema)));
    }

    #[test]
    fn test_missing_date_column_fails() {
        let header = row(&["지급금액", "입금금액", "잔액"]);
        match detect_columns(&header) {
            Err(ForensicsError::MissingDateColumn(name)) => assert_eq!(name, "general_bank"),
            other => panic!("expected MissingDateColumn, got {:?}", other),
        }
    }

    #[test]
    fn test_memo_fallback_uses_scorer() {
        let rows = vec![
            row(&["거래일자", "지급금액", "입금금액", "잔액", "취급점", "거래처"]),
            row(&["2024-01-02", "", "50,000", "150,000", "01", "홍길동"]),
            row(&["2024-01-03", "20,000", "", "130,000", "02", "김철수"]),
        ];
        let detected = detect_statement_columns(&rows, 0).unwrap();

        assert_eq!(detected.mapping.memo, Some(5));
        assert!(detected.memo_inferred);
    }

    #[test]
    fn test_header_row_out_of_range() {
        let rows = vec![general_header()];
        assert!(matches!(
            detect_statement_columns(&rows, 3),
            Err(ForensicsError::HeaderRowOutOfRange { index: 3, rows: 1 })
        ));
    }

    struct FixedAnalyzer(Option<ColumnAnalysis>);

    impl ColumnAnalyzer for FixedAnalyzer {
        fn analyze(&self, _rows: &[Row], _header: usize) -> Result<Option<ColumnAnalysis>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_analyzer_consulted_only_on_schema_failure() {
        let proposal = ColumnAnalysis {
            mapping: ColumnMapping::new(3),
            confidence: 0.8,
            reasoning: "날짜 형식 열".to_string(),
        };
        let analyzer = FixedAnalyzer(Some(proposal));

        let known = vec![general_header()];
        let resolved = resolve_column_mapping(&known, 0, Some(&analyzer)).unwrap();
        assert_eq!(resolved.source.label(), "general_bank");

        let unknown = vec![row(&["a", "b", "c", "d"])];
        let resolved = resolve_column_mapping(&unknown, 0, Some(&analyzer)).unwrap();
        assert_eq!(resolved.mapping.date, 3);
        assert!(matches!(resolved.source, MappingSource::Analyzer { .. }));
    }

    #[test]
    fn test_declining_analyzer_surfaces_schema_error() {
        let unknown = vec![row(&["a", "b"])];
        let result = resolve_column_mapping(&unknown, 0, Some(&FixedAnalyzer(None)));
        assert!(matches!(result, Err(ForensicsError::UnknownSchema)));

        let result = resolve_column_mapping(&unknown, 0, None);
        assert!(matches!(result, Err(ForensicsError::UnknownSchema)));
    }
}
