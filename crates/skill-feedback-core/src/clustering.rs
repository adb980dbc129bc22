//! Keyword clustering over many feedback snapshots.
//!
//! Both recommendation modes work on sets of feedback ids per normalized
//! keyword and compare sets by Jaccard similarity. Keyword maps are
//! `BTreeMap`s, so the greedy clustering visits keywords in lexicographic
//! order. That order is the tie-break: the grouping can change if keywords
//! are renamed, but a given input always produces the same clusters.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::catalog::TargetKind;
use crate::report::FeedbackSnapshot;

pub const MIN_DOC_FREQUENCY: usize = 3;
pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.5;
/// A keyword joins a cluster only above this similarity.
pub const COOCCURRENCE_SIMILARITY: f64 = 0.5;
pub const MAX_NEW_SKILL_CANDIDATES: usize = 5;
pub const MIN_CLUSTER_SIZE: usize = 3;
/// Section pairs at or below this similarity are split boundaries.
pub const MAX_SPLIT_SIMILARITY: f64 = 0.3;
pub const MAX_SPLIT_CANDIDATES: usize = 3;
pub const MAX_PROPOSED_SPLITS: usize = 2;
pub const UNLINKED_CONFIDENCE_THRESHOLD: f64 = 0.3;
pub const MAX_KEYWORD_PROPOSALS: usize = 5;
pub const MAX_LISTED_KEYWORDS: usize = 5;
pub const MAX_LISTED_FEEDBACK_IDS: usize = 5;
pub const MAX_PROPOSAL_EXAMPLES: usize = 3;
pub const MIN_KEYWORD_CHARS: usize = 2;

pub const NEW_SKILL_RATIONALE: &str = "recurring signal not linked to an existing target";
pub const FALLBACK_SKILL_NAME: &str = "unknown-skill";

pub const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "have", "has", "had", "do",
    "does", "did", "will", "would", "could", "should", "may", "might", "must", "shall", "this",
    "that", "these", "those", "it", "its", "and", "or", "but", "if", "then", "else", "for", "to",
    "from", "with", "by", "at", "in", "on", "of", "file", "files", "code", "error", "errors",
    "test", "tests",
];

/// Normalized keyword -> ids of the feedback records that raised it.
pub type KeywordIndex = BTreeMap<String, BTreeSet<String>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordCluster {
    pub keywords: BTreeSet<String>,
    pub feedback_ids: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewSkillCandidate {
    pub proposed_name: String,
    pub keywords: Vec<String>,
    pub fb_count: usize,
    pub fb_ids: Vec<String>,
    pub low_confidence_count: usize,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SplitCluster {
    pub section: String,
    pub keywords: Vec<String>,
    pub fb_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SplitCandidate {
    pub skill_path: String,
    pub clusters: Vec<SplitCluster>,
    pub total_fb_count: usize,
    pub proposed_splits: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeywordProposal {
    pub keyword: String,
    pub variants: Vec<String>,
    pub fb_count: usize,
    pub source_fb_ids: Vec<String>,
}

/// Lowercases and strips everything except word characters, whitespace and
/// hyphens. Compatibility normalization of full-width forms is not applied.
#[must_use]
pub fn normalize_keyword(keyword: &str) -> String {
    keyword
        .to_lowercase()
        .chars()
        .filter(|ch| ch.is_alphanumeric() || *ch == '_' || *ch == '-' || ch.is_whitespace())
        .collect::<String>()
        .trim()
        .to_string()
}

#[must_use]
pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

#[must_use]
pub fn is_valid_keyword(keyword: &str) -> bool {
    let normalized = normalize_keyword(keyword);
    normalized.chars().count() >= MIN_KEYWORD_CHARS && !is_stop_word(&normalized)
}

#[must_use]
pub fn jaccard(left: &BTreeSet<String>, right: &BTreeSet<String>) -> f64 {
    let union = left.union(right).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = left.intersection(right).count();
    usize_ratio(intersection, union)
}

/// Single-pass greedy clustering. Each unclustered keyword seeds a cluster
/// and absorbs every other unclustered keyword whose feedback set is more
/// than [`COOCCURRENCE_SIMILARITY`] similar to the seed's accumulated set.
#[must_use]
pub fn cluster_keywords_by_cooccurrence(index: &KeywordIndex) -> Vec<KeywordCluster> {
    let mut used: BTreeSet<&str> = BTreeSet::new();
    let mut clusters = Vec::new();

    for (seed, seed_ids) in index {
        if used.contains(seed.as_str()) {
            continue;
        }

        let mut cluster = KeywordCluster {
            keywords: BTreeSet::from([seed.clone()]),
            feedback_ids: seed_ids.clone(),
        };
        for (other, other_ids) in index {
            if other == seed || used.contains(other.as_str()) {
                continue;
            }
            if jaccard(&cluster.feedback_ids, other_ids) > COOCCURRENCE_SIMILARITY {
                cluster.keywords.insert(other.clone());
                cluster.feedback_ids.extend(other_ids.iter().cloned());
            }
        }

        for keyword in &cluster.keywords {
            if let Some((key, _)) = index.get_key_value(keyword) {
                used.insert(key.as_str());
            }
        }
        clusters.push(cluster);
    }

    clusters
}

#[must_use]
pub fn detect_new_skill_candidates(snapshots: &[FeedbackSnapshot]) -> Vec<NewSkillCandidate> {
    let mut index = KeywordIndex::new();
    let mut low_confidence: BTreeMap<String, usize> = BTreeMap::new();

    for snapshot in identified(snapshots) {
        let id = &snapshot.feedback_id;
        for target in &snapshot.improvement_targets {
            for keyword in valid_keywords(&target.keywords) {
                index.entry(keyword.clone()).or_default().insert(id.clone());
                if target.avg_confidence < LOW_CONFIDENCE_THRESHOLD {
                    *low_confidence.entry(keyword).or_default() += 1;
                }
            }
        }
        for keyword in valid_keywords(&snapshot.signal_keywords) {
            index.entry(keyword).or_default().insert(id.clone());
        }
    }

    let frequent = index
        .into_iter()
        .filter(|(_, ids)| ids.len() >= MIN_DOC_FREQUENCY)
        .collect::<KeywordIndex>();

    let mut candidates = cluster_keywords_by_cooccurrence(&frequent)
        .into_iter()
        .filter(|cluster| cluster.feedback_ids.len() >= MIN_DOC_FREQUENCY)
        .map(|cluster| NewSkillCandidate {
            proposed_name: suggest_skill_name(&cluster.keywords),
            low_confidence_count: cluster
                .keywords
                .iter()
                .filter_map(|keyword| low_confidence.get(keyword))
                .sum(),
            keywords: by_specificity(&cluster.keywords)
                .into_iter()
                .take(MAX_LISTED_KEYWORDS)
                .cloned()
                .collect(),
            fb_count: cluster.feedback_ids.len(),
            fb_ids: cluster
                .feedback_ids
                .iter()
                .take(MAX_LISTED_FEEDBACK_IDS)
                .cloned()
                .collect(),
            rationale: NEW_SKILL_RATIONALE.to_string(),
        })
        .collect::<Vec<_>>();

    candidates.sort_by(|left, right| right.fb_count.cmp(&left.fb_count));
    candidates.truncate(MAX_NEW_SKILL_CANDIDATES);
    candidates
}

/// The two longest keywords joined by a hyphen; shorter ties resolve in
/// lexicographic order.
#[must_use]
pub fn suggest_skill_name(keywords: &BTreeSet<String>) -> String {
    if keywords.is_empty() {
        return FALLBACK_SKILL_NAME.to_string();
    }
    by_specificity(keywords)
        .into_iter()
        .take(2)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("-")
}

/// Longest keywords first; equal lengths keep lexicographic order.
fn by_specificity(keywords: &BTreeSet<String>) -> Vec<&String> {
    let mut by_length = keywords.iter().collect::<Vec<_>>();
    by_length.sort_by(|left, right| right.chars().count().cmp(&left.chars().count()));
    by_length
}

#[derive(Debug, Default)]
struct SectionStats {
    keywords: BTreeSet<String>,
    feedback_ids: BTreeSet<String>,
}

// Skill file -> sections, both in first-seen order.
type SkillSections = Vec<(String, Vec<(String, SectionStats)>)>;

#[must_use]
pub fn detect_split_candidates(snapshots: &[FeedbackSnapshot]) -> Vec<SplitCandidate> {
    let mut skills: SkillSections = Vec::new();

    for snapshot in identified(snapshots) {
        for target in &snapshot.improvement_targets {
            let target_ref = &target.target;
            if target_ref.kind != TargetKind::Skill
                || target_ref.file.is_empty()
                || target_ref.section.is_empty()
            {
                continue;
            }
            for keyword in valid_keywords(&target.keywords) {
                let stats = section_stats(&mut skills, &target_ref.file, &target_ref.section);
                stats.keywords.insert(keyword);
                stats.feedback_ids.insert(snapshot.feedback_id.clone());
            }
        }
    }

    let mut candidates = skills
        .iter()
        .filter(|(_, sections)| sections.len() >= 2)
        .filter_map(|(skill_path, sections)| split_candidate(skill_path, sections))
        .collect::<Vec<_>>();

    candidates.sort_by(|left, right| right.total_fb_count.cmp(&left.total_fb_count));
    candidates.truncate(MAX_SPLIT_CANDIDATES);
    candidates
}

fn split_candidate(skill_path: &str, sections: &[(String, SectionStats)]) -> Option<SplitCandidate> {
    let mut flagged: Vec<usize> = Vec::new();

    for (i, (_, first)) in sections.iter().enumerate() {
        if first.feedback_ids.len() < MIN_CLUSTER_SIZE {
            continue;
        }
        for (j, (_, second)) in sections.iter().enumerate().skip(i + 1) {
            if second.feedback_ids.len() < MIN_CLUSTER_SIZE {
                continue;
            }
            if jaccard(&first.keywords, &second.keywords) <= MAX_SPLIT_SIMILARITY {
                for index in [i, j] {
                    if !flagged.contains(&index) {
                        flagged.push(index);
                    }
                }
            }
        }
    }

    if flagged.len() < 2 {
        return None;
    }

    let clusters = flagged
        .iter()
        .filter_map(|index| sections.get(*index))
        .map(|(section, stats)| SplitCluster {
            section: section.clone(),
            keywords: stats
                .keywords
                .iter()
                .take(MAX_LISTED_KEYWORDS)
                .cloned()
                .collect(),
            fb_count: stats.feedback_ids.len(),
        })
        .collect::<Vec<_>>();

    let skill = skill_name(skill_path);
    Some(SplitCandidate {
        skill_path: skill_path.to_string(),
        total_fb_count: clusters.iter().map(|cluster| cluster.fb_count).sum(),
        proposed_splits: clusters
            .iter()
            .take(MAX_PROPOSED_SPLITS)
            .map(|cluster| format!("{skill}-{}", section_slug(&cluster.section)))
            .collect(),
        clusters,
    })
}

/// Keywords of unlinked signals and weakly attributed targets that recur
/// often enough to be worth adding to the keyword catalog.
#[must_use]
pub fn detect_keyword_proposals(snapshots: &[FeedbackSnapshot]) -> Vec<KeywordProposal> {
    let mut unlinked: BTreeMap<String, (BTreeSet<String>, BTreeSet<String>)> = BTreeMap::new();

    for snapshot in identified(snapshots) {
        let weak_targets = snapshot
            .improvement_targets
            .iter()
            .filter(|target| target.avg_confidence < UNLINKED_CONFIDENCE_THRESHOLD)
            .flat_map(|target| target.keywords.iter());
        for raw in weak_targets.chain(&snapshot.unlinked_keywords) {
            if !is_valid_keyword(raw) {
                continue;
            }
            let (ids, variants) = unlinked.entry(normalize_keyword(raw)).or_default();
            ids.insert(snapshot.feedback_id.clone());
            variants.insert(raw.clone());
        }
    }

    let mut proposals = unlinked
        .into_iter()
        .filter(|(_, (ids, _))| ids.len() >= MIN_DOC_FREQUENCY)
        .map(|(keyword, (ids, variants))| KeywordProposal {
            keyword,
            variants: variants.into_iter().take(MAX_PROPOSAL_EXAMPLES).collect(),
            fb_count: ids.len(),
            source_fb_ids: ids.into_iter().take(MAX_PROPOSAL_EXAMPLES).collect(),
        })
        .collect::<Vec<_>>();

    proposals.sort_by(|left, right| right.fb_count.cmp(&left.fb_count));
    proposals.truncate(MAX_KEYWORD_PROPOSALS);
    proposals
}

fn identified(snapshots: &[FeedbackSnapshot]) -> impl Iterator<Item = &FeedbackSnapshot> {
    snapshots
        .iter()
        .filter(|snapshot| !snapshot.feedback_id.is_empty())
}

fn valid_keywords(keywords: &[String]) -> impl Iterator<Item = String> + '_ {
    keywords
        .iter()
        .filter(|keyword| is_valid_keyword(keyword))
        .map(|keyword| normalize_keyword(keyword))
}

fn section_stats<'s>(skills: &'s mut SkillSections, file: &str, section: &str) -> &'s mut SectionStats {
    let skill_index = match skills.iter().position(|(path, _)| path == file) {
        Some(index) => index,
        None => {
            skills.push((file.to_string(), Vec::new()));
            skills.len() - 1
        }
    };
    let sections = &mut skills[skill_index].1;

    let section_index = match sections.iter().position(|(name, _)| name == section) {
        Some(index) => index,
        None => {
            sections.push((section.to_string(), SectionStats::default()));
            sections.len() - 1
        }
    };
    &mut sections[section_index].1
}

fn skill_name(skill_path: &str) -> &str {
    let stem = skill_path
        .strip_suffix("/SKILL.md")
        .or_else(|| skill_path.strip_suffix(".md"))
        .unwrap_or(skill_path);
    stem.rsplit('/').next().unwrap_or(stem)
}

fn section_slug(section: &str) -> String {
    normalize_keyword(section.replace("##", "").trim())
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

#[allow(clippy::cast_precision_loss)]
fn usize_ratio(numerator: usize, denominator: usize) -> f64 {
    numerator as f64 / denominator as f64
}
