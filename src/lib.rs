// Statement Forensics - Core Library
// Korean bank statement normalization + forensic finding detection,
// shared by the CLI, the API server, and tests

pub mod error;
pub mod logging;
pub mod config;
pub mod model;
pub mod normalizer;     // Cell values → dates / amounts
pub mod memo_scorer;    // Memo column fallback heuristics
pub mod schema;         // Header → ColumnMapping
pub mod parser;         // Row → CanonicalTransaction
pub mod db;             // SQLite ledger store
pub mod extractor;      // Batch persistence
pub mod loan_tracker;   // Fund flow after a loan deposit
pub mod detectors;      // Preference / priority / collateral
pub mod deduplication;  // Finding dedup
pub mod analysis;       // Detector orchestration

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use error::{ForensicsError, Result};
pub use config::{DetectionConfig, ExtractionConfig, ForensicsConfig, LoanConfig};
pub use model::{
    CanonicalTransaction, Cell, Direction, Finding, FindingCandidate, FindingType,
    NewFinding, NewTransaction, PersistedTransaction, Row, Severity, TransactionNature,
};
pub use normalizer::{excel_serial_to_date, parse_amount, parse_balance, parse_date};
pub use memo_scorer::detect_memo_column;
pub use schema::{
    detect_columns, detect_statement_columns, resolve_column_mapping,
    ColumnAnalysis, ColumnAnalyzer, ColumnMapping, ColumnRole, DetectedColumns,
    MappingSource, ResolvedMapping, STATEMENT_SCHEMAS,
};
pub use parser::{
    parse_statement, parse_statement_with, parse_transaction_row,
    ParsedStatement, RowError, SkipReason,
};
pub use db::{
    open_database, run_in_transaction, setup_database, update_classification,
    FindingFilter, LedgerStore, TransactionFilter, TransactionOptions,
};
pub use extractor::{
    extract_and_save_transactions, extract_statement, load_rows,
    ExtractionOptions, ExtractionResult, RowMergePattern,
};
pub use loan_tracker::{
    suspected_loan_deposits, trace_case_funds, trace_downstream, trace_fund_chains,
    trace_upstream, track_case_loan_usage, track_loan_usage, FundTraceOptions, LoanQuery,
    LoanUsage, LoanUsageTrace, SuspectedLoanDeposit, TraceDirection, TracingResult,
};
pub use detectors::{
    normalize_creditor_name, CollateralIssueDetector, Detector,
    PreferenceRepaymentDetector, PriorityRepaymentDetector,
};
pub use deduplication::{deduplicate_findings, DeduplicationOutcome, FindingDeduplicator};
pub use analysis::{analyze_findings, AnalysisResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
