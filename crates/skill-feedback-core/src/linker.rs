//! Attribution of a context window to one catalog section.

use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogSection, KeywordCatalog, Target, TargetKind};
use crate::round_to;

pub const STRONG_KEYWORD_WEIGHT: f64 = 1.0;
pub const WEAK_KEYWORD_WEIGHT: f64 = 0.5;
pub const ACTIVE_SKILL_BONUS: f64 = 0.5;
/// Evidence score at which confidence reaches 1.0.
pub const CONFIDENCE_SATURATION: f64 = 3.0;

const SCORE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkedTarget {
    #[serde(flatten)]
    pub target: Target,
    pub confidence: f64,
    pub matched_keywords: Vec<String>,
}

/// Score of one eligible section. `score` includes the active-skill bonus;
/// `confidence` does not.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionMatch {
    pub target: Target,
    pub score: f64,
    pub strong_count: usize,
    pub confidence: f64,
    pub matched_keywords: Vec<String>,
}

impl SectionMatch {
    fn outranks(&self, other: &Self) -> bool {
        self.score > other.score + SCORE_EPSILON
            || ((self.score - other.score).abs() <= SCORE_EPSILON
                && self.strong_count > other.strong_count)
    }

    fn into_linked(self) -> LinkedTarget {
        LinkedTarget {
            target: self.target,
            confidence: self.confidence,
            matched_keywords: self.matched_keywords,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TargetLinker {
    catalog: KeywordCatalog,
}

impl TargetLinker {
    #[must_use]
    pub fn new(catalog: KeywordCatalog) -> Self {
        Self { catalog }
    }

    #[must_use]
    pub fn catalog(&self) -> &KeywordCatalog {
        &self.catalog
    }

    /// Picks the best eligible section for `context`. Sections are visited in
    /// catalog order and an equal score only wins with more strong hits, so
    /// the earlier section keeps a full tie.
    #[must_use]
    pub fn link(&self, context: &str, active_skill: Option<&str>) -> Option<LinkedTarget> {
        let mut best: Option<SectionMatch> = None;
        for candidate in self.score_sections(context, active_skill) {
            let replace = best
                .as_ref()
                .map_or(true, |current| candidate.outranks(current));
            if replace {
                best = Some(candidate);
            }
        }
        best.map(SectionMatch::into_linked)
    }

    /// Every section with at least one strong keyword hit, in catalog order.
    #[must_use]
    pub fn score_sections(&self, context: &str, active_skill: Option<&str>) -> Vec<SectionMatch> {
        if context.trim().is_empty() {
            return Vec::new();
        }

        let haystack = context.to_lowercase();
        self.catalog
            .sections()
            .iter()
            .filter_map(|section| score_section(section, &haystack, active_skill))
            .collect()
    }
}

fn score_section(
    section: &CatalogSection,
    haystack: &str,
    active_skill: Option<&str>,
) -> Option<SectionMatch> {
    let mut evidence = 0.0;
    let mut strong_count = 0_usize;
    let mut matched_keywords = Vec::new();

    for keyword in &section.keywords {
        if !haystack.contains(keyword.needle.as_str()) {
            continue;
        }
        matched_keywords.push(keyword.text.clone());
        if keyword.strong {
            evidence += STRONG_KEYWORD_WEIGHT;
            strong_count += 1;
        } else {
            evidence += WEAK_KEYWORD_WEIGHT;
        }
    }

    if strong_count == 0 {
        return None;
    }

    let hinted = section.target.kind == TargetKind::Skill
        && active_skill.is_some()
        && section.skill.as_deref() == active_skill;
    let bonus = if hinted { ACTIVE_SKILL_BONUS } else { 0.0 };

    matched_keywords.sort();
    Some(SectionMatch {
        target: section.target.clone(),
        score: evidence + bonus,
        strong_count,
        confidence: round_to((evidence / CONFIDENCE_SATURATION).min(1.0), 2),
        matched_keywords,
    })
}
