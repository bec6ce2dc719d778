// 📝 Memo-Column Scorer
// Content heuristics that pick the free-text column when a header has none

use crate::model::Row;
use regex::Regex;
use std::sync::OnceLock;

/// Data rows sampled after the header
pub const SAMPLE_ROWS: usize = 10;

/// Cells shorter than this (in characters) carry no signal
const MIN_CELL_CHARS: usize = 2;

// ============================================================================
// SIGNAL TABLE
// ============================================================================

/// What a memo cell tends to look like, and how much it counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoSignal {
    /// 2-4 Hangul syllables, i.e. a counterparty name
    KoreanName,
    /// 10-14 digits, i.e. an account number
    AccountNumber,
    BankName,
    /// Hangul and digits mixed in one value
    MixedText,
    /// Anything that is neither a bare integer nor an ISO date
    NotPlainNumberOrDate,
    TransactionKeyword,
}

impl MemoSignal {
    pub const ALL: [MemoSignal; 6] = [
        MemoSignal::KoreanName,
        MemoSignal::AccountNumber,
        MemoSignal::BankName,
        MemoSignal::MixedText,
        MemoSignal::NotPlainNumberOrDate,
        MemoSignal::TransactionKeyword,
    ];

    pub fn weight(&self) -> u32 {
        match self {
            MemoSignal::KoreanName => 3,
            MemoSignal::AccountNumber => 2,
            MemoSignal::BankName => 2,
            MemoSignal::MixedText => 1,
            MemoSignal::NotPlainNumberOrDate => 1,
            MemoSignal::TransactionKeyword => 2,
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        let re = patterns();
        match self {
            MemoSignal::KoreanName => re.korean_name.is_match(text),
            MemoSignal::AccountNumber => re.account_number.is_match(text),
            MemoSignal::BankName => re.bank_name.is_match(text),
            MemoSignal::MixedText => re.mixed_text.is_match(text),
            MemoSignal::NotPlainNumberOrDate => {
                !re.plain_integer.is_match(text) && !re.iso_date.is_match(text)
            }
            MemoSignal::TransactionKeyword => re.transaction_keyword.is_match(text),
        }
    }
}

struct Patterns {
    korean_name: Regex,
    account_number: Regex,
    bank_name: Regex,
    mixed_text: Regex,
    plain_integer: Regex,
    iso_date: Regex,
    transaction_keyword: Regex,
}

const BANK_NAMES: &[&str] = &[
    "은행", "뱅크", "제일", "기업", "국민", "외환", "수협", "농협", "카카오", "토스", "새마을",
];

const TRANSACTION_KEYWORDS: &[&str] = &[
    "이체", "송금", "입금", "출금", "자동", "이자", "수수료", "월세", "상환", "대출", "적립",
];

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        korean_name: Regex::new(r"^[가-힣]{2,4}$").expect("invalid korean name regex"),
        account_number: Regex::new(r"^\d{10,14}$").expect("invalid account number regex"),
        bank_name: Regex::new(&BANK_NAMES.join("|")).expect("invalid bank name regex"),
        mixed_text: Regex::new(r"[가-힣].*\d|\d.*[가-힣]")
            .expect("invalid mixed text regex"),
        plain_integer: Regex::new(r"^\d+$").expect("invalid integer regex"),
        iso_date: Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("invalid iso date regex"),
        transaction_keyword: Regex::new(&TRANSACTION_KEYWORDS.join("|"))
            .expect("invalid transaction keyword regex"),
    })
}

// ============================================================================
// SCORING
// ============================================================================

/// Score of a single cell text
pub fn score_text(text: &str) -> u32 {
    let text = text.trim();
    if text.chars().count() < MIN_CELL_CHARS {
        return 0;
    }
    MemoSignal::ALL
        .iter()
        .filter(|signal| signal.matches(text))
        .map(|signal| signal.weight())
        .sum()
}

/// Per-column scores over the sampled data rows.
/// Only text cells count; numeric cells are amounts or serial dates.
pub fn column_scores(rows: &[Row], header_row_index: usize) -> Vec<u32> {
    let Some(header) = rows.get(header_row_index) else {
        return Vec::new();
    };
    let num_columns = header.len();
    let mut scores = vec![0u32; num_columns];

    for row in rows.iter().skip(header_row_index + 1).take(SAMPLE_ROWS) {
        for (col, cell) in row.iter().take(num_columns).enumerate() {
            if let Some(text) = cell.as_text() {
                scores[col] += score_text(text);
            }
        }
    }

    scores
}

/// Pick the most memo-like column.
///
/// The strictly highest score wins and ties keep the leftmost column.
/// Returns None when no column scores above zero.
pub fn detect_memo_column(rows: &[Row], header_row_index: usize) -> Option<usize> {
    let scores = column_scores(rows, header_row_index);

    let mut best: Option<(usize, u32)> = None;
    for (col, &score) in scores.iter().enumerate() {
        if score == 0 {
            continue;
        }
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((col, score)),
        }
    }

    if let Some((col, score)) = best {
        log::debug!("Memo column fallback picked column {} (score {})", col, score);
    }
    best.map(|(col, _)| col)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Cell;

    fn row(cells: &[&str]) -> Row {
        cells.iter().map(|c| Cell::from(*c)).collect()
    }

    fn sample() -> Vec<Row> {
        vec![
            row(&["거래일자", "출금액", "입금액", "잔액", "기타", "참고"]),
            row(&["2024-01-02", "", "50000", "150000", "홍길동", "A"]),
            row(&["2024-01-03", "20000", "", "130000", "국민은행 이체", "B"]),
            row(&["2024-01-04", "", "1000", "131000", "이자", "C"]),
            row(&["2024-01-05", "5000", "", "126000", "1002345678901", "D"]),
        ]
    }

    #[test]
    fn test_score_text_signals() {
        // name (3) + not plain (1)
        assert_eq!(score_text("홍길동"), 4);
        // account number (2) only
        assert_eq!(score_text("1002345678901"), 2);
        // bank (2) + keyword (2) + not plain (1)
        assert_eq!(score_text("국민은행 이체"), 5);
        assert_eq!(score_text("2024-01-02"), 0);
        assert_eq!(score_text("A"), 0);
        assert_eq!(score_text("12345"), 0);
    }

    #[test]
    fn test_latin_codes_do_not_outscore_korean_memo() {
        assert_eq!(score_text("INV2024A"), 1);
        assert_eq!(score_text("관리비3월"), 2);

        let rows = vec![
            row(&["참조", "적요"]),
            row(&["INV2024A", "관리비3월"]),
            row(&["REF0117B", "가스비4월"]),
            row(&["TX99C", "수도세5월"]),
        ];
        assert_eq!(detect_memo_column(&rows, 0), Some(1));
    }

    #[test]
    fn test_detect_memo_column_picks_counterparty_column() {
        assert_eq!(detect_memo_column(&sample(), 0), Some(4));
    }

    #[test]
    fn test_detect_memo_column_is_deterministic() {
        let rows = sample();
        let first = detect_memo_column(&rows, 0);
        for _ in 0..20 {
            assert_eq!(detect_memo_column(&rows, 0), first);
        }
    }

    #[test]
    fn test_ties_keep_leftmost_column() {
        let rows = vec![
            row(&["a", "b"]),
            row(&["홍길동", "김철수"]),
        ];
        assert_eq!(detect_memo_column(&rows, 0), Some(0));
    }

    #[test]
    fn test_no_positive_score_is_not_found() {
        let rows = vec![
            row(&["거래일자", "금액"]),
            row(&["2024-01-02", "1000"]),
        ];
        assert_eq!(detect_memo_column(&rows, 0), None);
        assert_eq!(detect_memo_column(&rows[..1], 0), None);
        assert_eq!(detect_memo_column(&rows, 5), None);
    }

    #[test]
    fn test_numeric_cells_are_ignored() {
        let rows = vec![
            vec![Cell::from("x"), Cell::from("y")],
            vec![Cell::Number(1002345678901.0), Cell::from("송금")],
        ];
        assert_eq!(detect_memo_column(&rows, 0), Some(1));
    }

    #[test]
    fn test_only_first_ten_data_rows_are_sampled() {
        let mut rows = vec![row(&["a", "b"])];
        for _ in 0..SAMPLE_ROWS {
            rows.push(row(&["", "홍길동"]));
        }
        for _ in 0..50 {
            rows.push(row(&["국민은행 이체", ""]));
        }
        assert_eq!(detect_memo_column(&rows, 0), Some(1));
    }
}
