// 💸 Fund-Flow / Loan-Usage Tracker
// Find the loan deposit, then walk later withdrawals until the loan is used up

use crate::db::{LedgerStore, TransactionFilter};
use crate::error::{ForensicsError, Result};
use crate::model::{Direction, PersistedTransaction};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};

/// Memo words that mark a deposit as loan-like
pub const LOAN_KEYWORDS: [&str; 8] = [
    "대출", "론", "융자", "담보", "신용", "마이너스", "카드론", "현금서비스",
];

/// Memo words that mark a withdrawal as a transfer rather than spending
const TRANSFER_KEYWORDS: [&str; 3] = ["이체", "송금", "振込"];

const MAX_SUSPECTS: usize = 100;
const ROUND_UNIT: f64 = 1_000_000.0;
const LARGE_DEPOSIT: f64 = 10_000_000.0;

// ============================================================================
// QUERY & TRACE
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoanQuery {
    /// Case-insensitive memo substring
    pub keyword: Option<String>,
    pub amount: Option<f64>,
    /// Accepted distance from `amount`
    #[serde(default)]
    pub tolerance: f64,
    /// Restrict the loan and its withdrawals to one statement
    #[serde(default)]
    pub document_id: Option<String>,
}

impl LoanQuery {
    pub fn keyword(keyword: &str) -> Self {
        LoanQuery {
            keyword: Some(keyword.to_string()),
            ..Default::default()
        }
    }

    pub fn with_amount(mut self, amount: f64, tolerance: f64) -> Self {
        self.amount = Some(amount);
        self.tolerance = tolerance;
        self
    }

    pub fn in_document(mut self, document_id: &str) -> Self {
        self.document_id = Some(document_id.to_string());
        self
    }

    fn in_scope(&self, tx: &PersistedTransaction) -> bool {
        self.document_id
            .as_deref()
            .map_or(true, |doc| tx.document_id == doc)
    }

    fn normalized_keyword(&self) -> Option<String> {
        self.keyword
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_lowercase)
    }

    fn has_criteria(&self) -> bool {
        self.normalized_keyword().is_some() || self.amount.is_some()
    }

    fn matches(&self, tx: &PersistedTransaction) -> bool {
        if !tx.is_deposit() || !self.in_scope(tx) {
            return false;
        }
        if let Some(keyword) = self.normalized_keyword() {
            if !tx.memo_text().to_lowercase().contains(&keyword) {
                return false;
            }
        }
        if let Some(target) = self.amount {
            if (tx.deposit() - target).abs() > self.tolerance.abs() {
                return false;
            }
        }
        true
    }

    fn describe(&self) -> String {
        match (self.normalized_keyword(), self.amount) {
            (Some(_), Some(amount)) => format!(
                "\"{}\" 키워드와 금액 {}원(±{})",
                self.keyword.as_deref().unwrap_or("").trim(),
                amount,
                self.tolerance
            ),
            (Some(_), None) => format!("\"{}\" 키워드", self.keyword.as_deref().unwrap_or("").trim()),
            (None, Some(amount)) => format!("금액 {}원(±{})", amount, self.tolerance),
            (None, None) => String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    LoanExecution,
    Withdrawal,
    Transfer,
    /// Moved to another of the debtor's statements; leaves the loan untouched
    InternalMove,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanUsageStep {
    pub transaction_id: String,
    pub date: NaiveDate,
    pub direction: Direction,
    pub kind: StepKind,
    pub amount: f64,
    /// Withdrawals accumulated up to and including this step
    pub cumulative: f64,
    pub balance: Option<f64>,
    pub memo: String,
    /// Deposit on the receiving statement, for internal moves
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterpart_transaction_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanUsageTrace {
    pub loan_transaction_id: String,
    pub loan_amount: f64,
    pub loan_date: NaiveDate,
    pub total_withdrawn: f64,
    /// Loan left after the walk, never below zero
    pub remaining: f64,
    pub exhausted: bool,
    pub internal_moves: usize,
    pub steps: Vec<LoanUsageStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum LoanUsage {
    Found(LoanUsageTrace),
    NotFound { message: String },
}

// ============================================================================
// TRACKING
// ============================================================================

/// Largest matching deposit; equal amounts resolve to the earliest
fn select_loan<'a>(
    transactions: &'a [PersistedTransaction],
    query: &LoanQuery,
) -> Option<&'a PersistedTransaction> {
    transactions
        .iter()
        .filter(|tx| query.matches(tx))
        .max_by(|a, b| {
            a.deposit()
                .partial_cmp(&b.deposit())
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.transaction_date.cmp(&a.transaction_date))
        })
}

fn step_kind(memo: &str) -> StepKind {
    if TRANSFER_KEYWORDS.iter().any(|k| memo.contains(k)) {
        StepKind::Transfer
    } else {
        StepKind::Withdrawal
    }
}

/// Deposits on other statements, keyed by (date, amount), first one wins
fn counterpart_deposits<'a>(
    transactions: &'a [PersistedTransaction],
    loan: &PersistedTransaction,
) -> HashMap<(NaiveDate, u64), &'a PersistedTransaction> {
    let mut counterparts = HashMap::new();
    for tx in transactions {
        if tx.is_deposit()
            && tx.document_id != loan.document_id
            && tx.transaction_date >= loan.transaction_date
        {
            counterparts
                .entry((tx.transaction_date, tx.deposit().to_bits()))
                .or_insert(tx);
        }
    }
    counterparts
}

/// Trace how a loan deposit was spent.
///
/// Withdrawals on or after the loan date (the loan itself excluded) are walked
/// in date order; the walk stops once the accumulated total reaches the loan.
/// A withdrawal met by a same-day, same-amount deposit on another statement is
/// an internal move: it is listed but not counted, and each deposit offsets once.
pub fn track_loan_usage(transactions: &[PersistedTransaction], query: &LoanQuery) -> LoanUsage {
    if !query.has_criteria() {
        return LoanUsage::NotFound {
            message: "검색 조건(키워드 또는 금액)이 필요합니다.".to_string(),
        };
    }

    let Some(loan) = select_loan(transactions, query) else {
        return LoanUsage::NotFound {
            message: format!("{}에 해당하는 입금 거래를 찾을 수 없습니다.", query.describe()),
        };
    };
    let loan_amount = loan.deposit();

    let mut withdrawals: Vec<&PersistedTransaction> = transactions
        .iter()
        .filter(|tx| tx.id != loan.id && query.in_scope(tx))
        .filter(|tx| tx.is_withdrawal() && tx.transaction_date >= loan.transaction_date)
        .collect();
    withdrawals.sort_by_key(|tx| tx.transaction_date);

    let mut counterparts = counterpart_deposits(transactions, loan);

    let mut steps = vec![LoanUsageStep {
        transaction_id: loan.id.clone(),
        date: loan.transaction_date,
        direction: Direction::Deposit,
        kind: StepKind::LoanExecution,
        amount: loan_amount,
        cumulative: 0.0,
        balance: loan.balance,
        memo: loan.memo_text().to_string(),
        counterpart_transaction_id: None,
    }];

    let mut cumulative = 0.0;
    let mut internal_moves = 0;
    for tx in withdrawals {
        let key = (tx.transaction_date, tx.withdrawal().to_bits());
        let counterpart = counterparts.remove(&key);
        let kind = match counterpart {
            Some(_) => {
                internal_moves += 1;
                StepKind::InternalMove
            }
            None => {
                cumulative += tx.withdrawal();
                step_kind(tx.memo_text())
            }
        };
        steps.push(LoanUsageStep {
            transaction_id: tx.id.clone(),
            date: tx.transaction_date,
            direction: Direction::Withdrawal,
            kind,
            amount: tx.withdrawal(),
            cumulative,
            balance: tx.balance,
            memo: tx.memo_text().to_string(),
            counterpart_transaction_id: counterpart.map(|c| c.id.clone()),
        });
        if cumulative >= loan_amount {
            break;
        }
    }

    let exhausted = cumulative >= loan_amount;
    log::debug!(
        "Loan {} ({}원): {} withdrawals traced ({} internal moves), exhausted={}",
        loan.id,
        loan_amount,
        steps.len() - 1,
        internal_moves,
        exhausted
    );

    LoanUsage::Found(LoanUsageTrace {
        loan_transaction_id: loan.id.clone(),
        loan_amount,
        loan_date: loan.transaction_date,
        total_withdrawn: cumulative,
        remaining: (loan_amount - cumulative).max(0.0),
        exhausted,
        internal_moves,
        steps,
    })
}

/// Load the case's transactions and trace the loan.
/// The whole case is loaded so moves into other statements can be matched.
pub fn track_case_loan_usage(
    store: &impl LedgerStore,
    case_id: &str,
    query: &LoanQuery,
) -> Result<LoanUsage> {
    let transactions = store.find_transactions(&TransactionFilter::for_case(case_id))?;
    Ok(track_loan_usage(&transactions, query))
}

// ============================================================================
// FUND CHAINS
// ============================================================================

const MAX_TRACE_DEPTH: usize = 5;
const CONFIDENCE_WINDOW_DAYS: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceDirection {
    /// Deposit back to the earlier withdrawals that could have funded it
    Upstream,
    /// Withdrawal forward to the later deposits it could have become
    Downstream,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FundTraceOptions {
    /// Hops from the start, capped at 5
    pub max_depth: usize,
    /// Relative amount band, 0.1 = ±10%
    pub amount_tolerance: f64,
    pub max_matches_per_step: usize,
}

impl Default for FundTraceOptions {
    fn default() -> Self {
        FundTraceOptions {
            max_depth: 3,
            amount_tolerance: 0.1,
            max_matches_per_step: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainNode {
    pub transaction_id: String,
    pub depth: usize,
    pub date: NaiveDate,
    pub amount: f64,
    pub memo: String,
    pub creditor_name: Option<String>,
    /// None for the start node
    pub match_reason: Option<String>,
    /// 0.0-1.0, the start node is 1.0
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionChain {
    pub nodes: Vec<ChainNode>,
    pub total_amount: f64,
    pub depth: usize,
    /// Node ids joined by ","
    pub path: String,
}

impl TransactionChain {
    fn from_nodes(nodes: Vec<ChainNode>) -> Self {
        TransactionChain {
            total_amount: nodes.iter().map(|n| n.amount).sum(),
            depth: nodes.len().saturating_sub(1),
            path: nodes
                .iter()
                .map(|n| n.transaction_id.as_str())
                .collect::<Vec<_>>()
                .join(","),
            nodes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TracingResult {
    pub start_transaction_id: String,
    pub direction: TraceDirection,
    pub chains: Vec<TransactionChain>,
    /// Distinct transactions reached, the start included
    pub total_transactions: usize,
}

fn moved_amount(tx: &PersistedTransaction) -> f64 {
    if tx.is_deposit() {
        tx.deposit()
    } else {
        tx.withdrawal()
    }
}

/// 70% amount closeness, 30% date closeness over a 30-day window
fn match_confidence(amount_diff: f64, days: i64) -> f64 {
    (1.0 - amount_diff).max(0.0) * 0.7 + (1.0 - days as f64 / CONFIDENCE_WINDOW_DAYS).max(0.0) * 0.3
}

fn chain_node(
    tx: &PersistedTransaction,
    depth: usize,
    match_reason: Option<String>,
    confidence: f64,
) -> ChainNode {
    ChainNode {
        transaction_id: tx.id.clone(),
        depth,
        date: tx.transaction_date,
        amount: moved_amount(tx),
        memo: tx.memo_text().to_string(),
        creditor_name: tx.creditor_name.clone(),
        match_reason,
        confidence,
    }
}

/// Follow money through amount-matched transactions, breadth first.
///
/// Upstream starts from a deposit and matches earlier withdrawals; downstream
/// starts from a withdrawal and matches later deposits. A candidate matches when
/// its amount is within the tolerance band of the current node's amount. Every
/// transaction joins at most one chain, which also stops cycles. A chain is
/// recorded when it reaches `max_depth` or runs out of matches after one hop.
pub fn trace_fund_chains(
    transactions: &[PersistedTransaction],
    start_id: &str,
    direction: TraceDirection,
    options: &FundTraceOptions,
) -> Result<TracingResult> {
    let start = transactions
        .iter()
        .find(|tx| tx.id == start_id)
        .ok_or_else(|| ForensicsError::InvalidInput(format!("거래를 찾을 수 없습니다: {}", start_id)))?;

    match direction {
        TraceDirection::Upstream if !start.is_deposit() => {
            return Err(ForensicsError::InvalidInput("입금 거래만 추적 가능합니다".to_string()));
        }
        TraceDirection::Downstream if !start.is_withdrawal() => {
            return Err(ForensicsError::InvalidInput("출금 거래만 추적 가능합니다".to_string()));
        }
        _ => {}
    }

    let max_depth = options.max_depth.clamp(1, MAX_TRACE_DEPTH);
    let tolerance = options.amount_tolerance.abs();

    let mut visited: HashSet<&str> = HashSet::from([start.id.as_str()]);
    let mut queue = VecDeque::from([(start, vec![chain_node(start, 0, None, 1.0)])]);
    let mut chains = Vec::new();

    while let Some((current, path)) = queue.pop_front() {
        let depth = path.len() - 1;
        if depth >= max_depth {
            chains.push(TransactionChain::from_nodes(path));
            continue;
        }

        let amount = moved_amount(current);
        let mut matches: Vec<(&PersistedTransaction, f64, i64)> = transactions
            .iter()
            .filter(|tx| !visited.contains(tx.id.as_str()))
            .filter(|tx| match direction {
                TraceDirection::Upstream => {
                    tx.is_withdrawal() && tx.transaction_date < current.transaction_date
                }
                TraceDirection::Downstream => {
                    tx.is_deposit() && tx.transaction_date > current.transaction_date
                }
            })
            .filter_map(|tx| {
                let diff = (moved_amount(tx) - amount).abs() / amount;
                let days = (tx.transaction_date - current.transaction_date).num_days().abs();
                (diff <= tolerance).then_some((tx, diff, days))
            })
            .collect();

        matches.sort_by(|a, b| {
            match_confidence(b.1, b.2)
                .partial_cmp(&match_confidence(a.1, a.2))
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.transaction_date.cmp(&b.0.transaction_date))
        });
        matches.truncate(options.max_matches_per_step);

        if matches.is_empty() {
            if depth > 0 {
                chains.push(TransactionChain::from_nodes(path));
            }
            continue;
        }

        let when = match direction {
            TraceDirection::Upstream => "전",
            TraceDirection::Downstream => "후",
        };
        for (tx, diff, days) in matches {
            visited.insert(tx.id.as_str());
            let reason = format!(
                "금액 {:.0}원 ({:.1}% 일치), {}일 {}",
                moved_amount(tx),
                (1.0 - diff) * 100.0,
                days,
                when
            );
            let mut next = path.clone();
            next.push(chain_node(tx, depth + 1, Some(reason), match_confidence(diff, days)));
            queue.push_back((tx, next));
        }
    }

    log::debug!(
        "Traced {:?} from {}: {} chains over {} transactions",
        direction,
        start_id,
        chains.len(),
        visited.len()
    );

    Ok(TracingResult {
        start_transaction_id: start.id.clone(),
        direction,
        chains,
        total_transactions: visited.len(),
    })
}

/// Where a deposit's money came from
pub fn trace_upstream(
    transactions: &[PersistedTransaction],
    start_id: &str,
    options: &FundTraceOptions,
) -> Result<TracingResult> {
    trace_fund_chains(transactions, start_id, TraceDirection::Upstream, options)
}

/// Where a withdrawal's money went
pub fn trace_downstream(
    transactions: &[PersistedTransaction],
    start_id: &str,
    options: &FundTraceOptions,
) -> Result<TracingResult> {
    trace_fund_chains(transactions, start_id, TraceDirection::Downstream, options)
}

/// Load the case's transactions and trace from one of them
pub fn trace_case_funds(
    store: &impl LedgerStore,
    case_id: &str,
    start_id: &str,
    direction: TraceDirection,
    options: &FundTraceOptions,
) -> Result<TracingResult> {
    let transactions = store.find_transactions(&TransactionFilter::for_case(case_id))?;
    trace_fund_chains(&transactions, start_id, direction, options)
}

// ============================================================================
// SUSPECTED LOAN DEPOSITS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspectedLoanDeposit {
    pub transaction_id: String,
    pub document_id: String,
    pub date: NaiveDate,
    pub amount: f64,
    pub balance: Option<f64>,
    pub memo: String,
    pub is_round_number: bool,
    pub has_loan_keyword: bool,
    /// 0-100
    pub confidence: u32,
}

fn has_loan_keyword(memo: &str) -> bool {
    let memo = memo.to_lowercase();
    LOAN_KEYWORDS.iter().any(|k| memo.contains(k))
}

/// Deposits worth a look as loan disbursements: large ones and loan-worded ones.
///
/// Scored +30 for a whole-million amount, +50 for a loan keyword, +20 at 10M or more.
/// Sorted by amount (largest first) then date, at most 100.
pub fn suspected_loan_deposits(
    transactions: &[PersistedTransaction],
    min_amount: f64,
) -> Vec<SuspectedLoanDeposit> {
    let mut suspects: Vec<SuspectedLoanDeposit> = transactions
        .iter()
        .filter(|tx| tx.is_deposit())
        .filter(|tx| tx.deposit() >= min_amount || has_loan_keyword(tx.memo_text()))
        .map(|tx| {
            let amount = tx.deposit();
            let is_round_number = amount >= ROUND_UNIT && amount % ROUND_UNIT == 0.0;
            let keyword = has_loan_keyword(tx.memo_text());
            let confidence = if is_round_number { 30 } else { 0 }
                + if keyword { 50 } else { 0 }
                + if amount >= LARGE_DEPOSIT { 20 } else { 0 };

            SuspectedLoanDeposit {
                transaction_id: tx.id.clone(),
                document_id: tx.document_id.clone(),
                date: tx.transaction_date,
                amount,
                balance: tx.balance,
                memo: tx.memo_text().to_string(),
                is_round_number,
                has_loan_keyword: keyword,
                confidence,
            }
        })
        .collect();

    suspects.sort_by(|a, b| {
        b.amount
            .partial_cmp(&a.amount)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.date.cmp(&b.date))
    });
    suspects.truncate(MAX_SUSPECTS);
    suspects
}
