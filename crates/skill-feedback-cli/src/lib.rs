//! Command surface of the skill feedback pipeline.
//!
//! Host tools embed it through [`run_cli`]; the `sfb` binary only parses
//! arguments and installs the log subscriber before delegating.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use skill_feedback_core::{
    build_structure_report, render_text, scan_transcript_file, CorrectionDetector,
    KeywordCatalog, TargetLinker, TranscriptExtraction,
};
use skill_feedback_store_sqlite::{FeedbackSummary, SqliteFeedbackStore, TriageStatus};
use tracing::{debug, info};
use ulid::Ulid;

pub const FEEDBACK_LIST_CONTRACT_VERSION: &str = "feedback_list.v1";

const LOG_TARGET_PREFIX: &str = "skill_feedback";

#[derive(Debug, Parser)]
#[command(name = "sfb")]
#[command(about = "Skill feedback CLI: mines transcripts for doc improvement signals")]
pub struct Cli {
    #[arg(long, default_value = "./skill_feedback.sqlite3")]
    db: PathBuf,

    /// Keyword catalog JSON; the built-in catalog is used when absent or invalid.
    #[arg(long)]
    catalog: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogLevelArg::Warn)]
    log_level: LogLevelArg,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Filter directive for the workspace's log targets at the requested level.
    #[must_use]
    pub fn log_filter(&self) -> String {
        format!("{LOG_TARGET_PREFIX}={}", self.log_level.as_str())
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan a transcript, link signals to doc sections and rank blame.
    Extract(ExtractArgs),
    /// Scan a transcript without linking.
    Trace(TraceArgs),
    Feedback {
        #[command(subcommand)]
        command: FeedbackCommand,
    },
    /// Cross-session recommendations over recorded feedback.
    Report(ReportArgs),
    Catalog {
        #[command(subcommand)]
        command: CatalogCommand,
    },
}

#[derive(Debug, Args)]
pub struct ExtractArgs {
    path: PathBuf,
    /// Persist the extraction as an open feedback record.
    #[arg(long)]
    record: bool,
}

#[derive(Debug, Args)]
pub struct TraceArgs {
    path: PathBuf,
    #[arg(long)]
    record: bool,
}

#[derive(Debug, Subcommand)]
pub enum FeedbackCommand {
    List(FeedbackListArgs),
    Show(FeedbackIdArgs),
    Triage(FeedbackTriageArgs),
}

#[derive(Debug, Args)]
pub struct FeedbackListArgs {
    #[arg(long, value_enum)]
    status: Option<TriageStatusArg>,
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
pub struct FeedbackIdArgs {
    #[arg(long)]
    id: String,
}

#[derive(Debug, Args)]
pub struct FeedbackTriageArgs {
    #[arg(long)]
    id: String,
    #[arg(long, value_enum)]
    status: TriageStatusArg,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    #[arg(long, value_enum, default_value_t = TriageStatusArg::Open)]
    status: TriageStatusArg,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Subcommand)]
pub enum CatalogCommand {
    /// Print the catalog in effect as JSON.
    Show,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TriageStatusArg {
    Open,
    Accepted,
    Applied,
    Dismissed,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevelArg {
    fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Serialize)]
struct FeedbackListing {
    contract_version: &'static str,
    status: Option<TriageStatus>,
    records: Vec<FeedbackSummary>,
}

/// Executes the parsed top-level command.
///
/// # Errors
/// Returns an error when the transcript cannot be read or parsed, the store
/// cannot be opened or migrated, or a feedback id is malformed or unknown.
pub fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Extract(args) => {
            let catalog = KeywordCatalog::load_or_builtin(cli.catalog.as_deref());
            let linker = TargetLinker::new(catalog);
            let extraction = extract(&args.path, Some(&linker))?;
            emit_extraction(&cli.db, &args.path, &extraction, args.record)
        }
        Command::Trace(args) => {
            let extraction = extract(&args.path, None)?;
            emit_extraction(&cli.db, &args.path, &extraction, args.record)
        }
        Command::Feedback { command } => {
            let store = open_store(&cli.db)?;
            run_feedback(command, &store)
        }
        Command::Report(args) => {
            let store = open_store(&cli.db)?;
            let status = map_triage_status(args.status);
            let snapshots = store.load_snapshots(status)?;
            let report = build_structure_report(status.as_str(), &snapshots);
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", render_text(&report));
            }
            Ok(())
        }
        Command::Catalog {
            command: CatalogCommand::Show,
        } => {
            let catalog = KeywordCatalog::load_or_builtin(cli.catalog.as_deref());
            println!("{}", serde_json::to_string_pretty(&catalog.to_json())?);
            Ok(())
        }
    }
}

/// Executes a feedback subcommand against an open, migrated store.
///
/// # Errors
/// Returns an error for malformed or unknown ids and store failures.
pub fn run_feedback(command: FeedbackCommand, store: &SqliteFeedbackStore) -> Result<()> {
    match command {
        FeedbackCommand::List(args) => {
            let status = args.status.map(map_triage_status);
            let records = store.list(status, args.limit)?;
            let listing = FeedbackListing {
                contract_version: FEEDBACK_LIST_CONTRACT_VERSION,
                status,
                records: records.iter().map(|record| record.summary()).collect(),
            };
            println!("{}", serde_json::to_string_pretty(&listing)?);
            Ok(())
        }
        FeedbackCommand::Show(args) => {
            let feedback_id = parse_feedback_id(&args.id)?;
            let record = store
                .get(feedback_id)?
                .ok_or_else(|| anyhow!("feedback not found: {feedback_id}"))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        FeedbackCommand::Triage(args) => {
            let feedback_id = parse_feedback_id(&args.id)?;
            let record = store.set_triage_status(feedback_id, map_triage_status(args.status))?;
            println!("{}", serde_json::to_string_pretty(&record.summary())?);
            Ok(())
        }
    }
}

fn extract(path: &Path, linker: Option<&TargetLinker>) -> Result<TranscriptExtraction> {
    let detector = CorrectionDetector::new()?;
    let extraction = scan_transcript_file(path, &detector, linker)?;
    debug!(
        path = %path.display(),
        variant = extraction.variant.as_str(),
        errors = extraction.metrics.error_count,
        corrections = extraction.metrics.correction_count,
        "scanned transcript"
    );
    Ok(extraction)
}

fn emit_extraction(
    db: &Path,
    source: &Path,
    extraction: &TranscriptExtraction,
    record: bool,
) -> Result<()> {
    if !record {
        println!("{}", serde_json::to_string_pretty(extraction)?);
        return Ok(());
    }

    let store = open_store(db)?;
    let recorded = store.record_extraction(&source.display().to_string(), extraction)?;
    info!(feedback_id = %recorded.feedback_id, "stored extraction");
    println!("{}", serde_json::to_string_pretty(&recorded)?);
    Ok(())
}

fn open_store(db: &Path) -> Result<SqliteFeedbackStore> {
    let store = SqliteFeedbackStore::open(db)?;
    store.migrate()?;
    Ok(store)
}

fn parse_feedback_id(raw: &str) -> Result<Ulid> {
    Ulid::from_string(raw).with_context(|| format!("invalid feedback id: {raw}"))
}

fn map_triage_status(value: TriageStatusArg) -> TriageStatus {
    match value {
        TriageStatusArg::Open => TriageStatus::Open,
        TriageStatusArg::Accepted => TriageStatus::Accepted,
        TriageStatusArg::Applied => TriageStatus::Applied,
        TriageStatusArg::Dismissed => TriageStatus::Dismissed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        match Cli::try_parse_from(args) {
            Ok(cli) => cli,
            Err(err) => panic!("failed to parse {args:?}: {err}"),
        }
    }

    #[test]
    fn log_filter_defaults_to_warn() {
        let cli = parse(&["sfb", "trace", "session.jsonl"]);
        assert_eq!(cli.log_filter(), "skill_feedback=warn");

        let verbose = parse(&["sfb", "--log-level", "debug", "trace", "session.jsonl"]);
        assert_eq!(verbose.log_filter(), "skill_feedback=debug");
    }

    #[test]
    fn report_status_defaults_to_open() {
        let cli = parse(&["sfb", "report"]);
        match cli.command {
            Command::Report(args) => {
                assert_eq!(map_triage_status(args.status), TriageStatus::Open);
                assert!(!args.json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn triage_rejects_unknown_status() {
        let result = Cli::try_parse_from([
            "sfb",
            "feedback",
            "triage",
            "--id",
            "01J0SQQP7M70P6Y3R4T8D8G8M2",
            "--status",
            "wontfix",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn malformed_feedback_id_is_an_error() {
        assert!(parse_feedback_id("not-a-ulid").is_err());
        assert!(parse_feedback_id("01J0SQQP7M70P6Y3R4T8D8G8M2").is_ok());
    }
}
