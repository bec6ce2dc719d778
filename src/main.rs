use anyhow::{bail, Context, Result};
use std::env;
use std::path::Path;

use statement_forensics::{
    analyze_findings, extract_statement, load_rows, logging, open_database, parse_statement,
    suspected_loan_deposits, trace_case_funds, track_case_loan_usage, update_classification,
    ExtractionOptions, FindingFilter, ForensicsConfig, FundTraceOptions, LedgerStore, LoanQuery,
    LoanUsage, RowMergePattern, TraceDirection, TransactionFilter, TransactionNature,
};

const USAGE: &str = "\
Usage: statement-forensics <command> [args]

  init                                          create the database
  normalize <rows-file> [header-row]            parse a statement, print JSON
  extract <case> <document> <rows-file> [header-row] [--pairs]
                                                parse and save transactions
  classify <transaction-id> <nature> [creditor] [collateral-type]
                                                record an upstream classification
  analyze <case>                                run the forensic detectors
  findings <case>                               list recorded findings
  track-loan <case> <keyword> [amount] [tolerance] [--document <id>]
                                                trace spending of a loan deposit
  trace <case> <transaction-id> <upstream|downstream> [max-depth]
                                                follow amount-matched fund chains
  suspects <case>                               list deposits that look like loans

Environment: FORENSICS_CONFIG, FORENSICS_DB, FORENSICS_LOG";

fn main() -> Result<()> {
    logging::init();
    let args: Vec<String> = env::args().skip(1).collect();
    let config = ForensicsConfig::from_env()?;

    match args.first().map(String::as_str) {
        Some("init") => run_init(&config),
        Some("normalize") => run_normalize(&args[1..]),
        Some("extract") => run_extract(&config, &args[1..]),
        Some("classify") => run_classify(&config, &args[1..]),
        Some("analyze") => run_analyze(&config, &args[1..]),
        Some("findings") => run_findings(&config, &args[1..]),
        Some("track-loan") => run_track_loan(&config, &args[1..]),
        Some("trace") => run_trace(&config, &args[1..]),
        Some("suspects") => run_suspects(&config, &args[1..]),
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }
}

fn arg<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    match args.get(index) {
        Some(value) => Ok(value.as_str()),
        None => bail!("missing <{}>\n\n{}", name, USAGE),
    }
}

fn header_row(args: &[String], index: usize) -> Result<usize> {
    match args.get(index).filter(|a| !a.starts_with("--")) {
        Some(value) => value
            .parse()
            .with_context(|| format!("header-row must be a number, got '{}'", value)),
        None => Ok(0),
    }
}

fn run_init(config: &ForensicsConfig) -> Result<()> {
    println!("🗄️  Initializing database");
    open_database(&config.database_path)?;
    println!("✓ {} ready (WAL mode)", config.database_path.display());
    Ok(())
}

fn run_normalize(args: &[String]) -> Result<()> {
    let path = arg(args, 0, "rows-file")?;
    let rows = load_rows(Path::new(path)).with_context(|| format!("reading {}", path))?;
    let parsed = parse_statement(&rows, header_row(args, 1)?)?;
    println!("{}", serde_json::to_string_pretty(&parsed)?);
    Ok(())
}

fn run_extract(config: &ForensicsConfig, args: &[String]) -> Result<()> {
    let case_id = arg(args, 0, "case")?;
    let document_id = arg(args, 1, "document")?;
    let path = arg(args, 2, "rows-file")?;
    let header_row_index = header_row(args, 3)?;

    let mut options = ExtractionOptions::from_config(&config.extraction);
    if args.iter().any(|a| a == "--pairs") {
        options = options.with_merge(RowMergePattern::Pair);
    }

    println!("📂 Loading {}", path);
    let rows = load_rows(Path::new(path)).with_context(|| format!("reading {}", path))?;

    let mut conn = open_database(&config.database_path)?;
    let result = extract_statement(
        &mut conn,
        case_id,
        document_id,
        &rows,
        header_row_index,
        None,
        &options,
    )?;

    println!("✓ Saved {} of {} rows", result.success, result.total_rows);
    if result.skipped > 0 {
        println!("⚠️  Skipped {} ({} duplicates)", result.skipped, result.duplicates);
        for error in result.errors.iter().take(20) {
            println!("   row {}: {}", error.row, error.error);
        }
    }
    Ok(())
}

fn run_classify(config: &ForensicsConfig, args: &[String]) -> Result<()> {
    let transaction_id = arg(args, 0, "transaction-id")?;
    let nature: TransactionNature = arg(args, 1, "nature")?.parse()?;
    let creditor = args.get(2).map(String::as_str);
    let collateral_type = args.get(3).map(String::as_str);

    let conn = open_database(&config.database_path)?;
    if !update_classification(&conn, transaction_id, Some(nature), creditor, collateral_type)? {
        bail!("no transaction with id {}", transaction_id);
    }
    println!("✓ {} classified as {}", transaction_id, nature.as_str());
    Ok(())
}

fn run_analyze(config: &ForensicsConfig, args: &[String]) -> Result<()> {
    let case_id = arg(args, 0, "case")?;
    let conn = open_database(&config.database_path)?;

    println!("🔎 Analyzing case {}", case_id);
    let result = analyze_findings(&conn, case_id, &config.detection)?;
    println!(
        "✓ {} new findings from {} classified transactions ({} ms, {} already known)",
        result.findings_created,
        result.transactions_analyzed,
        result.analysis_duration_ms,
        result.duplicates_skipped
    );
    Ok(())
}

fn run_findings(config: &ForensicsConfig, args: &[String]) -> Result<()> {
    let case_id = arg(args, 0, "case")?;
    let conn = open_database(&config.database_path)?;

    let findings = conn.find_findings(&FindingFilter::for_case(case_id))?;
    if findings.is_empty() {
        println!("No findings for case {}", case_id);
    }
    for finding in findings {
        println!(
            "[{}] {} - {}",
            finding.severity.as_str(),
            finding.finding_type.as_str(),
            finding.title
        );
        if let Some(description) = &finding.description {
            println!("    {}", description);
        }
        println!("    transactions: {}", finding.related_transaction_ids.join(", "));
    }
    Ok(())
}

/// Value following `--name`, if given
fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn run_track_loan(config: &ForensicsConfig, args: &[String]) -> Result<()> {
    let case_id = arg(args, 0, "case")?;
    let mut query = LoanQuery::keyword(arg(args, 1, "keyword")?);
    if let Some(document_id) = flag(args, "--document") {
        query = query.in_document(document_id);
    }
    let positional: Vec<&String> = args.iter().take_while(|a| !a.starts_with("--")).collect();
    if let Some(amount) = positional.get(2) {
        let amount: f64 = amount.parse().context("amount must be a number")?;
        let tolerance: f64 = match positional.get(3) {
            Some(t) => t.parse().context("tolerance must be a number")?,
            None => 0.0,
        };
        query = query.with_amount(amount, tolerance);
    }

    let conn = open_database(&config.database_path)?;
    match track_case_loan_usage(&conn, case_id, &query)? {
        LoanUsage::NotFound { message } => println!("❌ {}", message),
        LoanUsage::Found(trace) => {
            println!(
                "💰 Loan {} on {}: {:.0}원",
                trace.loan_transaction_id, trace.loan_date, trace.loan_amount
            );
            for step in trace.steps.iter().skip(1) {
                let marker = match &step.counterpart_transaction_id {
                    Some(id) => format!("  ↔ {}", id),
                    None => String::new(),
                };
                println!(
                    "   {}  {:>15.0}  (total {:>15.0})  {}{}",
                    step.date, step.amount, step.cumulative, step.memo, marker
                );
            }
            println!(
                "   withdrawn {:.0}원, remaining {:.0}원{}",
                trace.total_withdrawn,
                trace.remaining,
                if trace.exhausted { " - exhausted" } else { "" }
            );
        }
    }
    Ok(())
}

fn run_trace(config: &ForensicsConfig, args: &[String]) -> Result<()> {
    let case_id = arg(args, 0, "case")?;
    let transaction_id = arg(args, 1, "transaction-id")?;
    let direction = match arg(args, 2, "direction")? {
        "upstream" => TraceDirection::Upstream,
        "downstream" => TraceDirection::Downstream,
        other => bail!("direction must be upstream or downstream, got '{}'", other),
    };
    let mut options = FundTraceOptions::default();
    if let Some(depth) = args.get(3) {
        options.max_depth = depth.parse().context("max-depth must be a number")?;
    }

    let conn = open_database(&config.database_path)?;
    let result = trace_case_funds(&conn, case_id, transaction_id, direction, &options)?;
    println!(
        "🔗 {} chains over {} transactions",
        result.chains.len(),
        result.total_transactions
    );
    for chain in &result.chains {
        println!("   {}  ({:.0}원)", chain.path, chain.total_amount);
        for node in chain.nodes.iter().skip(1) {
            println!(
                "     {} {}  {:.2}  {}",
                "  ".repeat(node.depth - 1),
                node.date,
                node.confidence,
                node.match_reason.as_deref().unwrap_or("")
            );
        }
    }
    Ok(())
}

fn run_suspects(config: &ForensicsConfig, args: &[String]) -> Result<()> {
    let case_id = arg(args, 0, "case")?;
    let conn = open_database(&config.database_path)?;

    let transactions = conn.find_transactions(&TransactionFilter::for_case(case_id))?;
    let suspects = suspected_loan_deposits(&transactions, config.loans.suspect_min_amount);
    println!("🏦 {} suspected loan deposits", suspects.len());
    for suspect in suspects {
        println!(
            "   {}  {:>15.0}  {:>3}%  {}",
            suspect.date, suspect.amount, suspect.confidence, suspect.memo
        );
    }
    Ok(())
}
