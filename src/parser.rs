// 🧾 Row-to-Transaction Parser
// One raw row + ColumnMapping → CanonicalTransaction, or the reason it was skipped

use crate::error::Result;
use crate::model::{CanonicalTransaction, Cell, Direction, Row};
use crate::normalizer::{parse_amount, parse_balance, parse_date};
use crate::schema::{resolve_column_mapping, ColumnAnalyzer, ColumnMapping, MappingSource};
use serde::Serialize;
use thiserror::Error;

static EMPTY_CELL: Cell = Cell::Empty;

// ============================================================================
// SKIP REASONS
// ============================================================================

/// Why a row produced no transaction. Row-level, recoverable: the batch continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SkipReason {
    #[error("empty row")]
    EmptyRow,

    #[error("invalid date")]
    InvalidDate,

    #[error("unrecognized transaction type")]
    UnknownTransactionType,

    #[error("invalid amount")]
    InvalidAmount,

    #[error("no amount data")]
    NoAmountData,

    #[error("metadata too large ({bytes} bytes, limit {limit})")]
    OversizedMetadata { bytes: usize, limit: usize },
}

/// Skipped row with its 1-based row number
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowError {
    pub row: usize,
    pub error: String,
}

impl RowError {
    pub fn new(row: usize, reason: &SkipReason) -> Self {
        RowError {
            row,
            error: reason.to_string(),
        }
    }
}

// ============================================================================
// FIELD PARSERS
// ============================================================================

fn cell_at(row: &[Cell], index: Option<usize>) -> &Cell {
    index.and_then(|i| row.get(i)).unwrap_or(&EMPTY_CELL)
}

/// Read the direction from a transaction-type cell.
///
/// Bracket tags (`[입금]`, `[출금]`) and sign characters are checked first,
/// then a leading `입금/` or `출금/`. Non-text cells never classify.
pub fn parse_transaction_type(value: &Cell) -> Option<Direction> {
    let text = value.as_text()?.trim();

    if text.contains("[입금]") || text.contains('+') {
        return Some(Direction::Deposit);
    }
    if text.contains("[출금]") || text.contains('-') {
        return Some(Direction::Withdrawal);
    }
    if text.starts_with("입금/") {
        return Some(Direction::Deposit);
    }
    if text.starts_with("출금/") {
        return Some(Direction::Withdrawal);
    }
    None
}

/// Amount as a positive magnitude; zero counts as no amount
fn magnitude(value: &Cell) -> Option<f64> {
    parse_amount(value).map(f64::abs).filter(|a| *a > 0.0)
}

/// Resolve amount and direction from separate deposit/withdrawal cells.
///
/// Some statements put a note in the "other" column, so each cell is parsed on
/// its own. When both hold numbers the larger wins; deposit only when strictly larger.
pub fn extract_amount_with_fallback(deposit: &Cell, withdrawal: &Cell) -> Option<(f64, Direction)> {
    match (magnitude(deposit), magnitude(withdrawal)) {
        (Some(d), Some(w)) if d > w => Some((d, Direction::Deposit)),
        (Some(_), Some(w)) => Some((w, Direction::Withdrawal)),
        (Some(d), None) => Some((d, Direction::Deposit)),
        (None, Some(w)) => Some((w, Direction::Withdrawal)),
        (None, None) => None,
    }
}

/// Balance cell; merged two-line rows may carry several numbers, the last one is the balance
fn balance_of(value: &Cell) -> Option<f64> {
    match value.as_text() {
        Some(text) if text.trim().contains(char::is_whitespace) => parse_balance(value),
        _ => parse_amount(value),
    }
}

pub fn is_empty_row(row: &[Cell]) -> bool {
    row.iter().all(Cell::is_empty)
}

// ============================================================================
// ROW PARSER
// ============================================================================

/// Parse one data row with an already-resolved mapping
pub fn parse_transaction_row(
    row: &[Cell],
    mapping: &ColumnMapping,
) -> std::result::Result<CanonicalTransaction, SkipReason> {
    if is_empty_row(row) {
        return Err(SkipReason::EmptyRow);
    }

    let date = parse_date(cell_at(row, Some(mapping.date))).ok_or(SkipReason::InvalidDate)?;

    let (amount, direction) = match mapping.transaction_type {
        Some(type_column) => {
            let direction = parse_transaction_type(cell_at(row, Some(type_column)))
                .ok_or(SkipReason::UnknownTransactionType)?;
            let amount_column = mapping.amount.or(mapping.deposit).or(mapping.withdrawal);
            let amount = magnitude(cell_at(row, amount_column)).ok_or(SkipReason::InvalidAmount)?;
            (amount, direction)
        }
        None => extract_amount_with_fallback(
            cell_at(row, mapping.deposit),
            cell_at(row, mapping.withdrawal),
        )
        .ok_or(SkipReason::NoAmountData)?,
    };

    let balance = balance_of(cell_at(row, mapping.balance));
    let memo = cell_at(row, mapping.memo).to_text();

    Ok(CanonicalTransaction {
        date,
        direction,
        amount,
        balance,
        memo,
    })
}

// ============================================================================
// WHOLE STATEMENT
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ParsedRow {
    /// 1-based position in the input (header rows included)
    pub row: usize,
    #[serde(flatten)]
    pub transaction: CanonicalTransaction,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedStatement {
    pub source: MappingSource,
    pub mapping: ColumnMapping,
    pub transactions: Vec<ParsedRow>,
    pub errors: Vec<RowError>,
    pub empty_rows: usize,
}

/// Detect the layout and parse every row below the header
pub fn parse_statement(rows: &[Row], header_row_index: usize) -> Result<ParsedStatement> {
    parse_statement_with(rows, header_row_index, None)
}

/// Same as `parse_statement`, with an external analyzer for unknown layouts
pub fn parse_statement_with(
    rows: &[Row],
    header_row_index: usize,
    analyzer: Option<&dyn ColumnAnalyzer>,
) -> Result<ParsedStatement> {
    let resolved = resolve_column_mapping(rows, header_row_index, analyzer)?;

    let mut transactions = Vec::new();
    let mut errors = Vec::new();
    let mut empty_rows = 0;

    for (i, row) in rows.iter().enumerate().skip(header_row_index + 1) {
        match parse_transaction_row(row, &resolved.mapping) {
            Ok(transaction) => transactions.push(ParsedRow {
                row: i + 1,
                transaction,
            }),
            Err(SkipReason::EmptyRow) => empty_rows += 1,
            Err(reason) => errors.push(RowError::new(i + 1, &reason)),
        }
    }

    log::info!(
        "Parsed statement ({}): {} transactions, {} rejected rows, {} empty rows",
        resolved.source.label(),
        transactions.len(),
        errors.len(),
        empty_rows
    );

    Ok(ParsedStatement {
        source: resolved.source,
        mapping: resolved.mapping,
        transactions,
        errors,
        empty_rows,
    })
}
