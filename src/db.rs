// 🗄️ Ledger storage
// Persistence contract (LedgerStore) + SQLite implementation, bounded all-or-nothing transactions

use crate::error::{ForensicsError, Result};
use crate::model::{
    Direction, Finding, FindingType, NewFinding, NewTransaction, PersistedTransaction, Severity,
    TransactionNature,
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, TransactionBehavior};
use std::path::Path;
use std::time::{Duration, Instant};

const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Transactions (written by the extractor, classified upstream)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            idempotency_hash TEXT UNIQUE NOT NULL,
            case_id TEXT NOT NULL,
            document_id TEXT NOT NULL,
            row_number INTEGER NOT NULL,
            transaction_date TEXT NOT NULL,
            deposit_amount REAL,
            withdrawal_amount REAL,
            balance REAL,
            memo TEXT,
            raw_metadata TEXT,
            transaction_nature TEXT,
            creditor_name TEXT,
            collateral_type TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Findings (uniqueness is logical, enforced by the deduplicator)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS findings (
            id TEXT PRIMARY KEY,
            case_id TEXT NOT NULL,
            finding_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            related_transaction_ids TEXT NOT NULL,
            related_creditor_names TEXT NOT NULL,
            is_resolved INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_case ON transactions(case_id, transaction_date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_document ON transactions(document_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_findings_case_type ON findings(case_id, finding_type)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// FILTERS
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub case_id: Option<String>,
    pub document_id: Option<String>,
    /// Only rows whose transaction_nature is set
    pub classified_only: bool,
}

impl TransactionFilter {
    pub fn for_case(case_id: &str) -> Self {
        TransactionFilter {
            case_id: Some(case_id.to_string()),
            ..Default::default()
        }
    }

    pub fn document(mut self, document_id: &str) -> Self {
        self.document_id = Some(document_id.to_string());
        self
    }

    pub fn classified(mut self) -> Self {
        self.classified_only = true;
        self
    }

    fn where_clause(&self) -> (String, Vec<String>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        if let Some(case_id) = &self.case_id {
            clauses.push("case_id = ?");
            values.push(case_id.clone());
        }
        if let Some(document_id) = &self.document_id {
            clauses.push("document_id = ?");
            values.push(document_id.clone());
        }
        if self.classified_only {
            clauses.push("transaction_nature IS NOT NULL");
        }

        (render_where(&clauses), values)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FindingFilter {
    pub case_id: Option<String>,
    pub finding_type: Option<FindingType>,
}

impl FindingFilter {
    pub fn for_case(case_id: &str) -> Self {
        FindingFilter {
            case_id: Some(case_id.to_string()),
            finding_type: None,
        }
    }

    pub fn of_type(mut self, finding_type: FindingType) -> Self {
        self.finding_type = Some(finding_type);
        self
    }

    fn where_clause(&self) -> (String, Vec<String>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        if let Some(case_id) = &self.case_id {
            clauses.push("case_id = ?");
            values.push(case_id.clone());
        }
        if let Some(finding_type) = self.finding_type {
            clauses.push("finding_type = ?");
            values.push(finding_type.as_str().to_string());
        }

        (render_where(&clauses), values)
    }
}

fn render_where(clauses: &[&str]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}

// ============================================================================
// PERSISTENCE CONTRACT
// ============================================================================

/// What the extractor and the analysis pipeline need from storage.
/// Connection management and migrations stay outside this contract.
pub trait LedgerStore {
    /// Bulk insert. With `skip_duplicates`, rows violating the idempotency
    /// constraint are silently ignored; returns the number actually inserted.
    fn create_transactions(&self, records: &[NewTransaction], skip_duplicates: bool) -> Result<usize>;

    fn find_transactions(&self, filter: &TransactionFilter) -> Result<Vec<PersistedTransaction>>;

    fn count_transactions(&self, filter: &TransactionFilter) -> Result<i64>;

    /// Bulk insert, all or nothing
    fn create_findings(&self, records: &[NewFinding]) -> Result<usize>;

    fn find_findings(&self, filter: &FindingFilter) -> Result<Vec<Finding>>;
}

impl LedgerStore for Connection {
    fn create_transactions(&self, records: &[NewTransaction], skip_duplicates: bool) -> Result<usize> {
        let sql = format!(
            "INSERT {} INTO transactions (
                id, idempotency_hash, case_id, document_id, row_number, transaction_date,
                deposit_amount, withdrawal_amount, balance, memo, raw_metadata
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            if skip_duplicates { "OR IGNORE" } else { "" }
        );
        let mut stmt = self.prepare(&sql)?;

        let mut inserted = 0;
        for record in records {
            let tx = &record.transaction;
            let (deposit, withdrawal) = match tx.direction {
                Direction::Deposit => (Some(tx.amount), None),
                Direction::Withdrawal => (None, Some(tx.amount)),
            };
            let metadata_json = serde_json::to_string(&record.raw_metadata)?;

            inserted += stmt.execute(params![
                uuid::Uuid::new_v4().to_string(),
                record.idempotency_hash(),
                record.case_id,
                record.document_id,
                record.row_number as i64,
                tx.date.format(DATE_FORMAT).to_string(),
                deposit,
                withdrawal,
                tx.balance,
                tx.memo,
                metadata_json,
            ])?;
        }

        Ok(inserted)
    }

    fn find_transactions(&self, filter: &TransactionFilter) -> Result<Vec<PersistedTransaction>> {
        let (where_sql, values) = filter.where_clause();
        let sql = format!(
            "SELECT id, case_id, document_id, transaction_date, deposit_amount, withdrawal_amount,
                    balance, memo, transaction_nature, creditor_name, collateral_type
             FROM transactions{}
             ORDER BY transaction_date ASC, document_id ASC, row_number ASC",
            where_sql
        );

        let mut stmt = self.prepare(&sql)?;
        let transactions = stmt
            .query_map(params_from_iter(values.iter()), row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(transactions)
    }

    fn count_transactions(&self, filter: &TransactionFilter) -> Result<i64> {
        let (where_sql, values) = filter.where_clause();
        let sql = format!("SELECT COUNT(*) FROM transactions{}", where_sql);
        let count = self.query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
        Ok(count)
    }

    fn create_findings(&self, records: &[NewFinding]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        // Own transaction when called in autocommit mode; otherwise join the caller's
        let guard = if self.is_autocommit() {
            Some(self.unchecked_transaction()?)
        } else {
            None
        };

        let mut inserted = 0;
        {
            let mut stmt = self.prepare(
                "INSERT INTO findings (
                    id, case_id, finding_type, severity, title, description,
                    related_transaction_ids, related_creditor_names, is_resolved, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9)",
            )?;

            let now = Utc::now().to_rfc3339();
            for record in records {
                let finding = &record.candidate;
                inserted += stmt.execute(params![
                    uuid::Uuid::new_v4().to_string(),
                    record.case_id,
                    finding.finding_type.as_str(),
                    finding.severity.as_str(),
                    finding.title,
                    finding.description,
                    serde_json::to_string(&finding.related_transaction_ids)?,
                    serde_json::to_string(&finding.related_creditor_names)?,
                    now,
                ])?;
            }
        }

        if let Some(tx) = guard {
            tx.commit()?;
        }

        Ok(inserted)
    }

    fn find_findings(&self, filter: &FindingFilter) -> Result<Vec<Finding>> {
        let (where_sql, values) = filter.where_clause();
        let sql = format!(
            "SELECT id, case_id, finding_type, severity, title, description,
                    related_transaction_ids, related_creditor_names, is_resolved, created_at
             FROM findings{}
             ORDER BY created_at ASC, rowid ASC",
            where_sql
        );

        let mut stmt = self.prepare(&sql)?;
        let findings = stmt
            .query_map(params_from_iter(values.iter()), row_to_finding)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(findings)
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn conversion_error<E>(index: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}

fn parse_label<T>(row: &rusqlite::Row, index: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(index)?;
    text.parse::<T>().map_err(|e| conversion_error(index, e))
}

fn parse_json_list(row: &rusqlite::Row, index: usize) -> rusqlite::Result<Vec<String>> {
    let text: String = row.get(index)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(index, e))
}

fn row_to_transaction(row: &rusqlite::Row) -> rusqlite::Result<PersistedTransaction> {
    let date_text: String = row.get(3)?;
    let transaction_date =
        NaiveDate::parse_from_str(&date_text, DATE_FORMAT).map_err(|e| conversion_error(3, e))?;

    let nature: Option<String> = row.get(8)?;
    let transaction_nature = nature
        .map(|n| n.parse::<TransactionNature>())
        .transpose()
        .map_err(|e| conversion_error(8, e))?;

    Ok(PersistedTransaction {
        id: row.get(0)?,
        case_id: row.get(1)?,
        document_id: row.get(2)?,
        transaction_date,
        deposit_amount: row.get(4)?,
        withdrawal_amount: row.get(5)?,
        balance: row.get(6)?,
        memo: row.get(7)?,
        transaction_nature,
        creditor_name: row.get(9)?,
        collateral_type: row.get(10)?,
    })
}

fn row_to_finding(row: &rusqlite::Row) -> rusqlite::Result<Finding> {
    let created_text: String = row.get(9)?;
    let created_at = DateTime::parse_from_rfc3339(&created_text)
        .map_err(|e| conversion_error(9, e))?
        .with_timezone(&Utc);

    Ok(Finding {
        id: row.get(0)?,
        case_id: row.get(1)?,
        finding_type: parse_label::<FindingType>(row, 2)?,
        severity: parse_label::<Severity>(row, 3)?,
        title: row.get(4)?,
        description: row.get(5)?,
        related_transaction_ids: parse_json_list(row, 6)?,
        related_creditor_names: parse_json_list(row, 7)?,
        is_resolved: row.get(8)?,
        created_at,
    })
}

// ============================================================================
// CLASSIFICATION HOOK
// ============================================================================

/// Upstream classifier writes its verdict here; the detectors only read it.
/// Returns false when no transaction has that id.
pub fn update_classification(
    conn: &Connection,
    transaction_id: &str,
    nature: Option<TransactionNature>,
    creditor_name: Option<&str>,
    collateral_type: Option<&str>,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE transactions
         SET transaction_nature = ?1, creditor_name = ?2, collateral_type = ?3
         WHERE id = ?4",
        params![
            nature.map(|n| n.as_str()),
            creditor_name,
            collateral_type,
            transaction_id
        ],
    )?;
    Ok(updated > 0)
}

// ============================================================================
// BOUNDED TRANSACTIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    /// How long to wait for the write lock before giving up
    pub max_wait: Duration,
    /// Upper bound on the work itself; exceeding it rolls back
    pub timeout: Duration,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        TransactionOptions {
            max_wait: Duration::from_secs(60),
            timeout: Duration::from_secs(90),
        }
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked
    )
}

/// Run `work` inside one IMMEDIATE transaction.
///
/// Commits only if `work` succeeds within `options.timeout`. Any error from
/// `work` rolls everything back and propagates. The timeout is checked once
/// `work` returns; SQLite offers no safe way to interrupt it mid-statement.
pub fn run_in_transaction<T, F>(conn: &mut Connection, options: TransactionOptions, work: F) -> Result<T>
where
    F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
{
    conn.busy_timeout(options.max_wait)?;

    let tx = match conn.transaction_with_behavior(TransactionBehavior::Immediate) {
        Ok(tx) => tx,
        Err(e) if is_busy(&e) => {
            log::warn!("Could not acquire write lock within {:?}", options.max_wait);
            return Err(ForensicsError::TransactionWaitExceeded(options.max_wait));
        }
        Err(e) => return Err(e.into()),
    };

    let started = Instant::now();
    // Dropping `tx` on the error path rolls back
    let value = work(&tx)?;

    let elapsed = started.elapsed();
    if elapsed > options.timeout {
        tx.rollback()?;
        log::warn!("Transaction rolled back after {:?} (limit {:?})", elapsed, options.timeout);
        return Err(ForensicsError::TransactionTimeout {
            elapsed,
            timeout: options.timeout,
        });
    }

    tx.commit()?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CanonicalTransaction, FindingCandidate};

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn new_tx(case_id: &str, row_number: usize, direction: Direction, amount: f64) -> NewTransaction {
        NewTransaction {
            case_id: case_id.to_string(),
            document_id: "doc-1".to_string(),
            row_number,
            transaction: CanonicalTransaction {
                date: NaiveDate::from_ymd_opt(2024, 1, row_number as u32).unwrap(),
                direction,
                amount,
                balance: Some(1_000_000.0),
                memo: format!("메모 {}", row_number),
            },
            raw_metadata: serde_json::json!({ "rowNumber": row_number }),
        }
    }

    fn candidate(ids: &[&str]) -> FindingCandidate {
        FindingCandidate {
            finding_type: FindingType::CollateralTimingIssue,
            severity: Severity::Warning,
            title: "담보권 설정 시점 이슈".to_string(),
            description: Some("설명".to_string()),
            related_transaction_ids: ids.iter().map(|s| s.to_string()).collect(),
            related_creditor_names: vec!["김채권".to_string()],
        }
    }

    #[test]
    fn test_idempotency_import_twice() {
        let conn = setup();
        let records = vec![
            new_tx("case-1", 1, Direction::Deposit, 50_000.0),
            new_tx("case-1", 2, Direction::Withdrawal, 20_000.0),
        ];

        assert_eq!(conn.create_transactions(&records, true).unwrap(), 2);
        assert_eq!(conn.create_transactions(&records, true).unwrap(), 0);
        assert_eq!(conn.count_transactions(&TransactionFilter::for_case("case-1")).unwrap(), 2);
    }

    #[test]
    fn test_duplicate_without_skip_is_an_error() {
        let conn = setup();
        let records = vec![new_tx("case-1", 1, Direction::Deposit, 50_000.0)];

        conn.create_transactions(&records, false).unwrap();
        let err = conn.create_transactions(&records, false).unwrap_err();
        assert!(matches!(err, ForensicsError::Database(_)));
    }

    #[test]
    fn test_direction_maps_to_amount_columns() {
        let conn = setup();
        conn.create_transactions(
            &[
                new_tx("case-1", 1, Direction::Deposit, 50_000.0),
                new_tx("case-1", 2, Direction::Withdrawal, 20_000.0),
            ],
            true,
        )
        .unwrap();

        let txs = conn.find_transactions(&TransactionFilter::for_case("case-1")).unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].deposit_amount, Some(50_000.0));
        assert_eq!(txs[0].withdrawal_amount, None);
        assert_eq!(txs[1].deposit_amount, None);
        assert_eq!(txs[1].withdrawal_amount, Some(20_000.0));
        assert_eq!(txs[1].memo.as_deref(), Some("메모 2"));
    }

    #[test]
    fn test_classified_filter_and_update_classification() {
        let conn = setup();
        conn.create_transactions(
            &[
                new_tx("case-1", 1, Direction::Deposit, 50_000.0),
                new_tx("case-1", 2, Direction::Withdrawal, 20_000.0),
                new_tx("case-2", 3, Direction::Withdrawal, 10_000.0),
            ],
            true,
        )
        .unwrap();

        let filter = TransactionFilter::for_case("case-1").classified();
        assert!(conn.find_transactions(&filter).unwrap().is_empty());

        let first = conn.find_transactions(&TransactionFilter::for_case("case-1")).unwrap()[0].clone();
        assert!(update_classification(
            &conn,
            &first.id,
            Some(TransactionNature::Collateral),
            Some("김채권"),
            Some("부동산"),
        )
        .unwrap());
        assert!(!update_classification(&conn, "missing", None, None, None).unwrap());

        let classified = conn.find_transactions(&filter).unwrap();
        assert_eq!(classified.len(), 1);
        assert_eq!(classified[0].transaction_nature, Some(TransactionNature::Collateral));
        assert_eq!(classified[0].creditor_name.as_deref(), Some("김채권"));
        assert_eq!(conn.count_transactions(&TransactionFilter::default()).unwrap(), 3);
    }

    #[test]
    fn test_findings_roundtrip_and_filter() {
        let conn = setup();
        let records = vec![
            NewFinding::new("case-1", candidate(&["a", "b"])),
            NewFinding::new("case-2", candidate(&["c"])),
        ];
        assert_eq!(conn.create_findings(&records).unwrap(), 2);

        let found = conn
            .find_findings(&FindingFilter::for_case("case-1").of_type(FindingType::CollateralTimingIssue))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].related_transaction_ids, vec!["a", "b"]);
        assert_eq!(found[0].severity, Severity::Warning);
        assert!(!found[0].is_resolved);

        let other_type = conn
            .find_findings(&FindingFilter::for_case("case-1").of_type(FindingType::CollateralDuplicate))
            .unwrap();
        assert!(other_type.is_empty());
    }

    #[test]
    fn test_run_in_transaction_commits() {
        let mut conn = setup();
        let inserted = run_in_transaction(&mut conn, TransactionOptions::default(), |tx| {
            tx.create_transactions(&[new_tx("case-1", 1, Direction::Deposit, 1.0)], true)
        })
        .unwrap();

        assert_eq!(inserted, 1);
        assert_eq!(conn.count_transactions(&TransactionFilter::default()).unwrap(), 1);
    }

    #[test]
    fn test_run_in_transaction_rolls_back_on_error() {
        let mut conn = setup();
        let result: Result<()> = run_in_transaction(&mut conn, TransactionOptions::default(), |tx| {
            tx.create_transactions(&[new_tx("case-1", 1, Direction::Deposit, 1.0)], true)?;
            Err(ForensicsError::InvalidInput("boom".to_string()))
        });

        assert!(result.is_err());
        assert_eq!(conn.count_transactions(&TransactionFilter::default()).unwrap(), 0);
    }

    #[test]
    fn test_run_in_transaction_timeout_rolls_back() {
        let mut conn = setup();
        let options = TransactionOptions {
            max_wait: Duration::from_secs(1),
            timeout: Duration::ZERO,
        };
        let result = run_in_transaction(&mut conn, options, |tx| {
            let n = tx.create_transactions(&[new_tx("case-1", 1, Direction::Deposit, 1.0)], true)?;
            std::thread::sleep(Duration::from_millis(5));
            Ok(n)
        });

        assert!(matches!(result, Err(ForensicsError::TransactionTimeout { .. })));
        assert_eq!(conn.count_transactions(&TransactionFilter::default()).unwrap(), 0);
    }

    #[test]
    fn test_run_in_transaction_wait_exceeded_when_locked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");

        let mut holder = open_database(&path).unwrap();
        let mut waiter = open_database(&path).unwrap();

        let _lock = holder
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .unwrap();

        let options = TransactionOptions {
            max_wait: Duration::from_millis(20),
            timeout: Duration::from_secs(1),
        };
        let result = run_in_transaction(&mut waiter, options, |_| Ok(()));
        assert!(matches!(result, Err(ForensicsError::TransactionWaitExceeded(_))));
    }
}
