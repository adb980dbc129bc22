//! Heuristic mining of assistant transcripts for corrective feedback.
//!
//! The pipeline is pattern and keyword based throughout:
//! - [`scanner`] walks one transcript and collects tool use, errors and
//!   user corrections.
//! - [`correction`] scores a single utterance against a catalog of named
//!   matchers.
//! - [`linker`] attributes a signal to a documentation section of a
//!   [`catalog::KeywordCatalog`].
//! - [`blame`] accumulates attributed signals per target.
//! - [`clustering`] and [`report`] turn many extractions into restructuring
//!   recommendations.
//!
//! None of this understands language; every classification is a heuristic.

use std::path::PathBuf;

pub mod blame;
pub mod catalog;
pub mod clustering;
pub mod correction;
pub mod linker;
pub mod report;
pub mod scanner;
pub mod transcript;

pub use blame::{BlameAggregator, BlameEntry, SignalKind};
pub use catalog::{KeywordCatalog, Target, TargetKind};
pub use clustering::{KeywordProposal, NewSkillCandidate, SplitCandidate, SplitCluster};
pub use correction::{CorrectionCategory, CorrectionDetector, CorrectionMatch, SignalTier};
pub use linker::{LinkedTarget, SectionMatch, TargetLinker};
pub use report::{build_structure_report, render_text, FeedbackSnapshot, StructureReport};
pub use scanner::{
    scan_lines, scan_transcript_file, summarize_tool_input, ExtractionVariant, TranscriptExtraction,
    TranscriptScanner,
};
pub use transcript::{ContentBlock, MessageContent, TranscriptEvent};

pub const EXTRACTION_CONTRACT_VERSION: &str = "extraction.v1";
pub const STRUCTURE_REPORT_CONTRACT_VERSION: &str = "structure_report.v1";

#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no parseable transcript events in {0}")]
    Unparseable(String),
    #[error("catalog error: {0}")]
    Catalog(String),
    #[error("invalid correction pattern {name}: {message}")]
    Pattern { name: &'static str, message: String },
    #[error("validation error: {0}")]
    Validation(String),
}

/// Returns at most `max_chars` characters of `value`, never splitting a
/// UTF-8 sequence.
#[must_use]
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((index, _)) => value[..index].to_string(),
        None => value.to_string(),
    }
}

#[must_use]
pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}
