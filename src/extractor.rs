// 📥 Batch Extractor
// Every data row → NewTransaction or a recorded skip, committed in one bounded transaction

use crate::config::ExtractionConfig;
use crate::db::{run_in_transaction, LedgerStore, TransactionOptions};
use crate::error::{ForensicsError, Result};
use crate::model::{Cell, NewTransaction, Row};
use crate::parser::{is_empty_row, parse_transaction_row, RowError, SkipReason};
use crate::schema::{resolve_column_mapping, ColumnAnalyzer, ColumnMapping};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

pub const DEFAULT_MAX_METADATA_BYTES: usize = 5 * 1024;

// ============================================================================
// OPTIONS & RESULT
// ============================================================================

/// How statement lines map onto transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowMergePattern {
    /// One line per transaction
    #[default]
    None,
    /// Two lines per transaction (NH-style): the first carries the sequence
    /// number in column 0, the second leaves it blank
    Pair,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractionOptions {
    pub merge: RowMergePattern,
    pub max_metadata_bytes: usize,
    pub transaction: TransactionOptions,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        ExtractionOptions {
            merge: RowMergePattern::None,
            max_metadata_bytes: DEFAULT_MAX_METADATA_BYTES,
            transaction: TransactionOptions::default(),
        }
    }
}

impl ExtractionOptions {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        ExtractionOptions {
            merge: RowMergePattern::None,
            max_metadata_bytes: config.max_metadata_bytes,
            transaction: config.transaction_options(),
        }
    }

    pub fn with_merge(mut self, merge: RowMergePattern) -> Self {
        self.merge = merge;
        self
    }
}

/// `success + skipped == total_rows` always holds.
/// Rows ignored as duplicates of earlier imports count in both `skipped` and `duplicates`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub success: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub total_rows: usize,
    pub errors: Vec<RowError>,
}

/// Parsed but not yet persisted
#[derive(Debug, Clone)]
pub struct PreparedBatch {
    pub records: Vec<NewTransaction>,
    pub skipped: usize,
    pub total_rows: usize,
    pub errors: Vec<RowError>,
}

// ============================================================================
// ROW MERGE
// ============================================================================

fn merge_cells(first: &Cell, second: &Cell) -> Cell {
    if second.is_empty() {
        return first.clone();
    }
    if first.is_empty() {
        return second.clone();
    }
    match first {
        Cell::Number(_) => first.clone(),
        _ => Cell::Text(format!("{} {}", first.to_text(), second.to_text())),
    }
}

/// Merge two-line transactions.
///
/// A pair is merged only when the first line has a sequence number and the
/// second does not; otherwise both lines pass through unchanged. A trailing
/// unpaired line is kept as is.
pub fn merge_paired_rows(rows: &[Row]) -> Vec<Row> {
    let mut merged = Vec::with_capacity(rows.len() / 2 + 1);
    let mut mismatched = 0;

    for pair in rows.chunks(2) {
        let [first, second] = pair else {
            merged.push(pair[0].clone());
            break;
        };

        let has_sequence = first.first().is_some_and(|c| !c.is_empty());
        let second_has_sequence = second.first().is_some_and(|c| !c.is_empty());

        if has_sequence && !second_has_sequence {
            let width = first.len().max(second.len());
            let row = (0..width)
                .map(|i| {
                    merge_cells(
                        first.get(i).unwrap_or(&Cell::Empty),
                        second.get(i).unwrap_or(&Cell::Empty),
                    )
                })
                .collect();
            merged.push(row);
        } else {
            mismatched += 1;
            merged.push(first.clone());
            merged.push(second.clone());
        }
    }

    log::debug!(
        "Row merge: {} lines → {} rows ({} pairs left unmerged)",
        rows.len(),
        merged.len(),
        mismatched
    );
    merged
}

// ============================================================================
// EXTRACTION
// ============================================================================

/// Parse every data row below the header into insertable records.
/// Row numbers are 1-based over the data rows (after any merge).
pub fn prepare_records(
    case_id: &str,
    document_id: &str,
    rows: &[Row],
    header_row_index: usize,
    mapping: &ColumnMapping,
    options: &ExtractionOptions,
) -> Result<PreparedBatch> {
    let data_rows = rows.get(header_row_index + 1..).unwrap_or(&[]);
    let data_rows = match options.merge {
        RowMergePattern::Pair => merge_paired_rows(data_rows),
        RowMergePattern::None => data_rows.to_vec(),
    };

    let mut records = Vec::new();
    let mut errors = Vec::new();

    for (i, row) in data_rows.iter().enumerate() {
        let row_number = i + 1;

        let outcome = if is_empty_row(row) {
            Err(SkipReason::EmptyRow)
        } else {
            parse_transaction_row(row, mapping)
        };

        let transaction = match outcome {
            Ok(tx) => tx,
            Err(reason) => {
                errors.push(RowError::new(row_number, &reason));
                continue;
            }
        };

        let metadata = serde_json::json!({
            "rowNumber": row_number,
            "originalData": row,
        });
        let bytes = serde_json::to_vec(&metadata)?.len();
        if bytes > options.max_metadata_bytes {
            let reason = SkipReason::OversizedMetadata {
                bytes,
                limit: options.max_metadata_bytes,
            };
            errors.push(RowError::new(row_number, &reason));
            continue;
        }

        records.push(NewTransaction {
            case_id: case_id.to_string(),
            document_id: document_id.to_string(),
            row_number,
            transaction,
            raw_metadata: metadata,
        });
    }

    Ok(PreparedBatch {
        skipped: errors.len(),
        total_rows: data_rows.len(),
        records,
        errors,
    })
}

/// Parse and persist a statement with a known mapping.
///
/// The insert runs inside one bounded transaction; any storage failure rolls
/// back every row and propagates.
pub fn extract_and_save_transactions(
    conn: &mut Connection,
    case_id: &str,
    document_id: &str,
    rows: &[Row],
    header_row_index: usize,
    mapping: &ColumnMapping,
    options: &ExtractionOptions,
) -> Result<ExtractionResult> {
    if rows.get(header_row_index).is_none() {
        return Err(ForensicsError::HeaderRowOutOfRange {
            index: header_row_index,
            rows: rows.len(),
        });
    }

    let batch = prepare_records(case_id, document_id, rows, header_row_index, mapping, options)?;

    let success = run_in_transaction(conn, options.transaction, |tx| {
        tx.create_transactions(&batch.records, true)
    })?;

    let duplicates = batch.records.len() - success;
    let result = ExtractionResult {
        success,
        skipped: batch.skipped + duplicates,
        duplicates,
        total_rows: batch.total_rows,
        errors: batch.errors,
    };

    log::info!(
        "Extracted document {} (case {}): {} saved, {} skipped ({} duplicates) of {} rows",
        document_id,
        case_id,
        result.success,
        result.skipped,
        result.duplicates,
        result.total_rows
    );
    if !result.errors.is_empty() {
        log::debug!("First skipped rows: {:?}", &result.errors[..result.errors.len().min(10)]);
    }

    Ok(result)
}

/// Detect the layout (schema table, then optional analyzer) and extract
pub fn extract_statement(
    conn: &mut Connection,
    case_id: &str,
    document_id: &str,
    rows: &[Row],
    header_row_index: usize,
    analyzer: Option<&dyn ColumnAnalyzer>,
    options: &ExtractionOptions,
) -> Result<ExtractionResult> {
    let resolved = resolve_column_mapping(rows, header_row_index, analyzer)?;
    extract_and_save_transactions(
        conn,
        case_id,
        document_id,
        rows,
        header_row_index,
        &resolved.mapping,
        options,
    )
}

// ============================================================================
// ROW FILES
// ============================================================================

/// Load raw rows from disk: `.json` is an array of arrays of string/number/null,
/// anything else is read as header-less CSV with every cell as text.
pub fn load_rows(path: &Path) -> Result<Vec<Row>> {
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    if is_json {
        let file = File::open(path)?;
        let rows: Vec<Row> = serde_json::from_reader(std::io::BufReader::new(file))?;
        return Ok(rows);
    }

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record?;
        rows.push(record.iter().map(|field| Cell::from(field.trim())).collect());
    }
    Ok(rows)
}
