//! Corrective-feedback classification for a single user utterance.
//!
//! The matcher set is an ordered list of named categories, each a predicate
//! over text with a declared tier. High-signal categories are explicit enough
//! to qualify on their own; low-signal ones need a second signal or a
//! concrete-noun bonus to reach [`CORRECTION_THRESHOLD`].

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{truncate_chars, FeedbackError};

pub const CORRECTION_THRESHOLD: u32 = 3;
pub const HIGH_SIGNAL_POINTS: u32 = 3;
pub const LOW_SIGNAL_POINTS: u32 = 2;
pub const FILE_EXTENSION_BONUS: u32 = 1;
pub const CAMEL_CASE_BONUS: u32 = 1;
pub const EXCERPT_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionCategory {
    NegationStart,
    Contrast,
    CorrectionRequest,
    InstructionReminder,
    WhyDoing,
    ComprehensionCheck,
    RepetitionFrustration,
    MissingElement,
    ExpectationCheck,
}

impl CorrectionCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NegationStart => "negation_start",
            Self::Contrast => "contrast",
            Self::CorrectionRequest => "correction_request",
            Self::InstructionReminder => "instruction_reminder",
            Self::WhyDoing => "why_doing",
            Self::ComprehensionCheck => "comprehension_check",
            Self::RepetitionFrustration => "repetition_frustration",
            Self::MissingElement => "missing_element",
            Self::ExpectationCheck => "expectation_check",
        }
    }

    #[must_use]
    pub fn tier(self) -> SignalTier {
        match self {
            Self::NegationStart | Self::Contrast | Self::ExpectationCheck => SignalTier::Low,
            Self::CorrectionRequest
            | Self::InstructionReminder
            | Self::WhyDoing
            | Self::ComprehensionCheck
            | Self::RepetitionFrustration
            | Self::MissingElement => SignalTier::High,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SignalTier {
    High,
    Low,
}

impl SignalTier {
    #[must_use]
    pub fn points(self) -> u32 {
        match self {
            Self::High => HIGH_SIGNAL_POINTS,
            Self::Low => LOW_SIGNAL_POINTS,
        }
    }
}

struct MatcherSpec {
    category: CorrectionCategory,
    pattern: &'static str,
    // A hit immediately followed by one of these is not a complaint
    // (question or hedge forms).
    rejected_suffixes: &'static [&'static str],
}

const MATCHER_SPECS: &[MatcherSpec] = &[
    MatcherSpec {
        category: CorrectionCategory::NegationStart,
        pattern: r"(?i)^(いや|違う|違います|そうじゃない|それじゃない|間違|訂正|no[,.]|not |that's not|you misunderstood)",
        rejected_suffixes: &[],
    },
    MatcherSpec {
        category: CorrectionCategory::Contrast,
        pattern: r"(?i)(ではなく|じゃなくて|ではなくて|instead|rather than)",
        rejected_suffixes: &[],
    },
    MatcherSpec {
        category: CorrectionCategory::CorrectionRequest,
        pattern: r"(?i)(直して|修正して|やり直して|〜にして|してください|please fix|please change|redo)",
        rejected_suffixes: &[],
    },
    MatcherSpec {
        category: CorrectionCategory::InstructionReminder,
        pattern: r"(?i)(って言った|と言った|って指示した|って頼んだ|told you|said to|asked you|I said)",
        rejected_suffixes: &[],
    },
    MatcherSpec {
        category: CorrectionCategory::WhyDoing,
        pattern: r"(?i)(なんで|なぜ|どうして|why).{0,20}(してる|やってる|している|するの|させてる|させて|doing|did you)",
        rejected_suffixes: &[],
    },
    MatcherSpec {
        category: CorrectionCategory::ComprehensionCheck,
        pattern: r"(?i)(聞いてた|聞いてる|わかってる|理解してる|読んだ[?？]|見た[?？]|are you listening|did you understand|did you read)",
        rejected_suffixes: &[],
    },
    MatcherSpec {
        category: CorrectionCategory::RepetitionFrustration,
        pattern: r"(もう一回|何度も|さっきも)(言|説明)",
        rejected_suffixes: &[],
    },
    MatcherSpec {
        category: CorrectionCategory::MissingElement,
        pattern: r"(がない|が足りない|が抜けてる|を忘れてる)",
        rejected_suffixes: &["か", "ことを", "ように", "ようです", "かも"],
    },
    MatcherSpec {
        category: CorrectionCategory::ExpectationCheck,
        pattern: r"(じゃないの|でしょ|だよね)[?？]",
        rejected_suffixes: &[],
    },
];

const FILE_EXTENSION_PATTERN: &str = r"\.\w{2,4}\b";
const CAMEL_CASE_PATTERN: &str = r"[A-Z][a-z]+[A-Z]";

#[derive(Debug, Clone)]
pub struct CorrectionMatcher {
    category: CorrectionCategory,
    regex: Regex,
    rejected_suffixes: &'static [&'static str],
}

impl CorrectionMatcher {
    #[must_use]
    pub fn category(&self) -> CorrectionCategory {
        self.category
    }

    #[must_use]
    pub fn points(&self) -> u32 {
        self.category.tier().points()
    }

    #[must_use]
    pub fn matches(&self, text: &str) -> bool {
        if self.rejected_suffixes.is_empty() {
            return self.regex.is_match(text);
        }

        self.regex.find_iter(text).any(|hit| {
            let rest = &text[hit.end()..];
            !self
                .rejected_suffixes
                .iter()
                .any(|suffix| rest.starts_with(suffix))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CorrectionMatch {
    pub score: u32,
    pub categories: Vec<CorrectionCategory>,
    pub excerpt: String,
}

#[derive(Debug, Clone)]
pub struct CorrectionDetector {
    matchers: Vec<CorrectionMatcher>,
    file_extension: Regex,
    camel_case: Regex,
}

impl CorrectionDetector {
    /// Compiles the built-in matcher catalog.
    ///
    /// # Errors
    /// Returns [`FeedbackError::Pattern`] when a matcher fails to compile.
    pub fn new() -> Result<Self, FeedbackError> {
        let matchers = MATCHER_SPECS
            .iter()
            .map(|spec| {
                Ok(CorrectionMatcher {
                    category: spec.category,
                    regex: compile(spec.category.as_str(), spec.pattern)?,
                    rejected_suffixes: spec.rejected_suffixes,
                })
            })
            .collect::<Result<Vec<_>, FeedbackError>>()?;

        Ok(Self {
            matchers,
            file_extension: compile("file_extension", FILE_EXTENSION_PATTERN)?,
            camel_case: compile("camel_case", CAMEL_CASE_PATTERN)?,
        })
    }

    #[must_use]
    pub fn matchers(&self) -> &[CorrectionMatcher] {
        &self.matchers
    }

    /// Scores `text`; returns a match only when the total reaches
    /// [`CORRECTION_THRESHOLD`].
    #[must_use]
    pub fn detect(&self, text: &str) -> Option<CorrectionMatch> {
        let mut score = 0_u32;
        let mut categories = Vec::new();

        for matcher in &self.matchers {
            if matcher.matches(text) {
                score += matcher.points();
                categories.push(matcher.category);
            }
        }

        if self.file_extension.is_match(text) {
            score += FILE_EXTENSION_BONUS;
        }
        if self.camel_case.is_match(text) {
            score += CAMEL_CASE_BONUS;
        }

        (score >= CORRECTION_THRESHOLD).then(|| CorrectionMatch {
            score,
            categories,
            excerpt: truncate_chars(text, EXCERPT_CHARS),
        })
    }
}

fn compile(name: &'static str, pattern: &str) -> Result<Regex, FeedbackError> {
    Regex::new(pattern).map_err(|err| FeedbackError::Pattern {
        name,
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn detector() -> CorrectionDetector {
        match CorrectionDetector::new() {
            Ok(value) => value,
            Err(err) => panic!("matcher catalog must compile: {err}"),
        }
    }

    fn must_some<T>(value: Option<T>) -> T {
        match value {
            Some(inner) => inner,
            None => panic!("expected Some(..), got None"),
        }
    }

    #[test]
    fn why_challenge_with_instruction_reminder_scores_six() {
        let found = must_some(
            detector().detect("why are you doing this, I said to fix the auth module"),
        );

        assert_eq!(found.score, 6);
        assert_eq!(
            found.categories,
            vec![
                CorrectionCategory::InstructionReminder,
                CorrectionCategory::WhyDoing
            ]
        );
    }

    #[test]
    fn bare_file_extension_never_qualifies() {
        assert!(detector().detect("see notes.md").is_none());
        assert!(detector().detect("MyWidget lives in widget.tsx").is_none());
    }

    #[test]
    fn single_low_signal_needs_a_bonus() {
        let detector = detector();
        assert!(detector.detect("use the cache instead").is_none());

        let found = must_some(detector.detect("use cache.rs instead"));
        assert_eq!(found.score, 3);
        assert_eq!(found.categories, vec![CorrectionCategory::Contrast]);
    }

    #[test]
    fn negation_is_anchored_to_utterance_start() {
        let detector = detector();
        let found = must_some(detector.detect("No, keep going with the CacheLayer"));
        assert_eq!(found.categories, vec![CorrectionCategory::NegationStart]);
        assert_eq!(found.score, 3);

        assert!(detector.detect("there is no, really").is_none());
    }

    #[test]
    fn missing_element_rejects_question_forms() {
        let detector = detector();
        assert!(detector.detect("テストがないか確認して").is_none());

        let found = must_some(detector.detect("テストがない"));
        assert_eq!(found.categories, vec![CorrectionCategory::MissingElement]);
    }

    #[test]
    fn japanese_phrasing_is_detected() {
        let found = must_some(detector().detect("なんでそれをやってるの？さっきも説明した"));
        assert!(found.categories.contains(&CorrectionCategory::WhyDoing));
        assert!(found
            .categories
            .contains(&CorrectionCategory::RepetitionFrustration));
        assert_eq!(found.score, 6);
    }

    #[test]
    fn excerpt_is_bounded() {
        let long = format!("please fix {}", "x".repeat(300));
        let found = must_some(detector().detect(&long));
        assert_eq!(found.excerpt.chars().count(), EXCERPT_CHARS);
    }

    #[test]
    fn every_category_has_a_matcher() {
        assert_eq!(detector().matchers().len(), MATCHER_SPECS.len());
        assert_eq!(MATCHER_SPECS.len(), 9);
    }

    proptest! {
        #[test]
        fn prop_bonus_only_text_never_qualifies(noise in "[0-9 ]{0,40}") {
            let text = format!("{noise} notes.md WidgetFactory");
            prop_assert!(detector().detect(&text).is_none());
        }

        #[test]
        fn prop_one_explicit_category_always_qualifies(noise in "[0-9 ]{0,40}") {
            let text = format!("{noise} please fix");
            let found = detector().detect(&text);
            prop_assert!(found.is_some());
            prop_assert!(found.map_or(0, |item| item.score) >= CORRECTION_THRESHOLD);
        }
    }
}
