//! Cross-session structural report.

use serde::{Deserialize, Serialize};

use crate::blame::{BlameAggregator, BlameEntry};
use crate::clustering::{
    detect_keyword_proposals, detect_new_skill_candidates, detect_split_candidates,
    KeywordProposal, NewSkillCandidate, SplitCandidate,
};
use crate::scanner::TranscriptExtraction;
use crate::STRUCTURE_REPORT_CONTRACT_VERSION;

pub const MAX_TOP_TARGETS: usize = 10;
pub const MAX_RENDERED_IDS: usize = 3;
pub const MAX_RENDERED_KEYWORDS: usize = 3;

const RULE: &str = "==========================================";

/// What the recommendation stage needs from one recorded extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackSnapshot {
    pub feedback_id: String,
    pub improvement_targets: Vec<BlameEntry>,
    /// Keywords of individual errors and corrections: the matched keywords
    /// when the signal was linked, its context keywords otherwise.
    pub signal_keywords: Vec<String>,
    /// Context keywords of the errors and corrections no doc section claimed.
    pub unlinked_keywords: Vec<String>,
}

impl FeedbackSnapshot {
    #[must_use]
    pub fn from_extraction(feedback_id: impl Into<String>, extraction: &TranscriptExtraction) -> Self {
        let errors = extraction
            .errors
            .iter()
            .map(|error| (error.linked_target.as_ref(), &error.context_keywords));
        let corrections = extraction
            .corrections
            .iter()
            .map(|item| (item.linked_target.as_ref(), &item.context_keywords));

        let mut signal_keywords = Vec::new();
        let mut unlinked_keywords = Vec::new();
        for (linked, context) in errors.chain(corrections) {
            match linked {
                Some(linked) => signal_keywords.extend(linked.matched_keywords.iter().cloned()),
                None => {
                    signal_keywords.extend(context.iter().cloned());
                    unlinked_keywords.extend(context.iter().cloned());
                }
            }
        }

        Self {
            feedback_id: feedback_id.into(),
            improvement_targets: extraction.improvement_targets.clone().unwrap_or_default(),
            signal_keywords,
            unlinked_keywords,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructureReport {
    pub contract_version: String,
    pub status: String,
    pub total_scanned: usize,
    pub top_targets: Vec<BlameEntry>,
    pub new_skill_candidates: Vec<NewSkillCandidate>,
    pub split_candidates: Vec<SplitCandidate>,
    pub keyword_proposals: Vec<KeywordProposal>,
}

impl StructureReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.top_targets.is_empty()
            && self.new_skill_candidates.is_empty()
            && self.split_candidates.is_empty()
            && self.keyword_proposals.is_empty()
    }
}

#[must_use]
pub fn build_structure_report(status: &str, snapshots: &[FeedbackSnapshot]) -> StructureReport {
    let mut blame = BlameAggregator::new();
    for entry in snapshots
        .iter()
        .flat_map(|snapshot| snapshot.improvement_targets.iter())
    {
        blame.merge_entry(entry);
    }
    let mut top_targets = blame.into_ranked();
    top_targets.truncate(MAX_TOP_TARGETS);

    StructureReport {
        contract_version: STRUCTURE_REPORT_CONTRACT_VERSION.to_string(),
        status: status.to_string(),
        total_scanned: snapshots.len(),
        top_targets,
        new_skill_candidates: detect_new_skill_candidates(snapshots),
        split_candidates: detect_split_candidates(snapshots),
        keyword_proposals: detect_keyword_proposals(snapshots),
    }
}

#[must_use]
pub fn render_text(report: &StructureReport) -> String {
    let mut lines = vec![
        RULE.to_string(),
        "Structure report".to_string(),
        RULE.to_string(),
        String::new(),
        format!(
            "Scanned: {} feedback records (status: {})",
            report.total_scanned, report.status
        ),
        String::new(),
    ];

    lines.push("Top blame targets".to_string());
    if report.top_targets.is_empty() {
        lines.push("  none".to_string());
    }
    for (rank, entry) in report.top_targets.iter().enumerate() {
        lines.push(format!(
            "  {}) {}  blame {} (raw {}, errors {}, corrections {}, confidence {})",
            rank + 1,
            entry.target,
            entry.blame_score,
            entry.raw_blame_score,
            entry.errors,
            entry.corrections,
            entry.avg_confidence
        ));
    }
    lines.push(String::new());

    lines.push("New skill candidates".to_string());
    if report.new_skill_candidates.is_empty() {
        lines.push("  none".to_string());
    }
    for (rank, candidate) in report.new_skill_candidates.iter().enumerate() {
        lines.push(format!(
            "  {}) {} ({} feedback)",
            rank + 1,
            candidate.proposed_name,
            candidate.fb_count
        ));
        lines.push(format!("     rationale: {}", candidate.rationale));
        lines.push(format!("     keywords: {}", candidate.keywords.join(", ")));
        lines.push(format!(
            "     feedback: {}",
            head(&candidate.fb_ids, MAX_RENDERED_IDS).join(", ")
        ));
        if candidate.low_confidence_count > 0 {
            lines.push(format!(
                "     low-confidence links: {}",
                candidate.low_confidence_count
            ));
        }
        lines.push(format!(
            "     action: create skills/{}/SKILL.md with at least three worked examples",
            candidate.proposed_name
        ));
    }
    lines.push(String::new());

    lines.push("Split candidates".to_string());
    if report.split_candidates.is_empty() {
        lines.push("  none".to_string());
    }
    for (rank, candidate) in report.split_candidates.iter().enumerate() {
        lines.push(format!(
            "  {}) {} ({} feedback)",
            rank + 1,
            candidate.skill_path,
            candidate.total_fb_count
        ));
        for (label, cluster) in (b'A'..=b'Z').map(char::from).zip(&candidate.clusters) {
            lines.push(format!(
                "     cluster {label}: {} ({} feedback) keywords: {}",
                cluster.section,
                cluster.fb_count,
                head(&cluster.keywords, MAX_RENDERED_KEYWORDS).join(", ")
            ));
        }
        if !candidate.proposed_splits.is_empty() {
            lines.push(format!(
                "     proposed: split into {}",
                candidate.proposed_splits.join(" + ")
            ));
        }
    }
    lines.push(String::new());

    lines.push("Catalog keyword proposals".to_string());
    if report.keyword_proposals.is_empty() {
        lines.push("  none".to_string());
    }
    for (rank, proposal) in report.keyword_proposals.iter().enumerate() {
        lines.push(format!(
            "  {}) {} ({} feedback without a confident link)",
            rank + 1,
            proposal.keyword,
            proposal.fb_count
        ));
        lines.push(format!("     variants: {}", proposal.variants.join(", ")));
        lines.push(format!("     feedback: {}", proposal.source_fb_ids.join(", ")));
    }
    lines.push(RULE.to_string());

    lines.join("\n")
}

fn head(values: &[String], limit: usize) -> &[String] {
    &values[..values.len().min(limit)]
}
