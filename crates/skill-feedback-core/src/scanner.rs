//! Single forward pass over one transcript.
//!
//! The scanner keeps full counters but stores at most the emitted number of
//! detail entries, so memory stays bounded by the context window and the
//! output caps. Summary counters always reflect true totals. Tool-use ids are
//! held only until their result arrives; ids that never get a result stay
//! until the end of the transcript, which `MAX_TRANSCRIPT_LINES` bounds.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use crate::blame::{BlameAggregator, BlameEntry, SignalKind};
use crate::clustering::is_stop_word;
use crate::correction::{CorrectionCategory, CorrectionDetector, CorrectionMatch};
use crate::linker::{LinkedTarget, TargetLinker};
use crate::transcript::{ContentBlock, EventKind, MessageContent, TranscriptEvent};
use crate::{truncate_chars, FeedbackError, EXTRACTION_CONTRACT_VERSION};

pub const CONTEXT_BUFFER_CAPACITY: usize = 20;
pub const LINK_CONTEXT_SNIPPETS: usize = 10;
pub const MAX_TIMELINE: usize = 100;
pub const MAX_SEARCH_PATHS: usize = 50;
pub const MAX_CHANGED_FILES: usize = 30;
pub const MAX_BACKTRACKS: usize = 10;
pub const MAX_ERRORS: usize = 20;
pub const MAX_CORRECTIONS: usize = 10;
pub const MAX_IMPROVEMENT_TARGETS: usize = 10;
pub const MAX_TRANSCRIPT_LINES: usize = 200_000;
pub const ERROR_MESSAGE_CHARS: usize = 200;
pub const SUMMARY_CHARS: usize = 100;
pub const BASH_SUMMARY_CHARS: usize = 80;
pub const SHORT_SUMMARY_CHARS: usize = 60;
pub const ERROR_CONTEXT_KEYWORDS: usize = 15;
pub const CORRECTION_CONTEXT_KEYWORDS: usize = 10;
pub const MIN_CONTEXT_KEYWORD_CHARS: usize = 2;

pub const SYSTEM_REMINDER_PREFIX: &str = "<system-reminder>";

/// Conversational filler that says nothing about what a signal is about.
pub const CONVERSATIONAL_WORDS: &[&str] = &[
    "please", "fix", "fixed", "fixing", "keep", "keeps", "kept", "again", "still", "just", "now",
    "why", "what", "how", "when", "where", "who", "you", "your", "me", "my", "we", "our", "us",
    "said", "say", "told", "tell", "asked", "ask", "want", "need", "can", "cant", "dont", "not",
    "no", "yes", "ok", "okay", "so", "all", "any", "some", "there", "here", "up", "out", "about",
    "into", "than", "too", "very", "also", "only", "same", "like", "use", "make", "doing", "done",
    "going", "get", "got", "let", "try", "thing", "things", "session", "instead", "rather",
    "before", "after", "wrong", "right", "sure", "thanks", "hey", "actually", "really", "redo",
    "change", "mean", "stop", "way",
];
pub const UNKNOWN_TOOL: &str = "unknown";

const COMMAND_NAME_OPEN: &str = "<command-name>/";
const COMMAND_NAME_CLOSE: &str = "</command-name>";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionVariant {
    /// Scanner output only.
    Trace,
    /// Scanner output plus target links and per-transcript blame.
    Extract,
}

impl ExtractionVariant {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Extract => "extract",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FileOp {
    Write,
    Edit,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractionMetrics {
    pub total_lines: usize,
    pub parsed_events: usize,
    pub malformed_lines: usize,
    pub user_turns: usize,
    pub assistant_turns: usize,
    pub tool_use_count: usize,
    pub unique_tools: Vec<String>,
    pub code_changes_count: usize,
    pub error_count: usize,
    pub correction_count: usize,
    pub backtrack_count: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkillUsage {
    pub name: String,
    pub count: usize,
    pub first_line: usize,
    pub last_line: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolInvocation {
    pub turn: usize,
    pub line: usize,
    pub tool: String,
    pub input_summary: String,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchPath {
    pub turn: usize,
    pub tool: String,
    pub path: String,
    pub pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangedFile {
    pub path: String,
    pub op: FileOp,
    pub via: String,
    pub turn: usize,
    pub line: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Backtrack {
    pub file: String,
    pub edit_count: usize,
    pub turns: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorSignal {
    pub turn: usize,
    pub line: usize,
    pub tool: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_target: Option<LinkedTarget>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorrectionSignal {
    pub turn: usize,
    pub line: usize,
    pub excerpt: String,
    pub categories: Vec<CorrectionCategory>,
    pub score: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_skill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_target: Option<LinkedTarget>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptExtraction {
    pub contract_version: String,
    pub variant: ExtractionVariant,
    pub metrics: ExtractionMetrics,
    pub skills_used: Vec<SkillUsage>,
    pub tool_timeline: Vec<ToolInvocation>,
    pub search_paths: Vec<SearchPath>,
    pub changed_files: Vec<ChangedFile>,
    pub backtracks: Vec<Backtrack>,
    pub errors: Vec<ErrorSignal>,
    pub corrections: Vec<CorrectionSignal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub improvement_targets: Option<Vec<BlameEntry>>,
}

// Where a tool invocation lives: `index` is `None` once the timeline cap
// was reached, but the tool name is still needed for error attribution.
#[derive(Debug, Clone)]
struct InvocationRef {
    index: Option<usize>,
    tool: String,
}

#[derive(Debug)]
struct FileEdits {
    path: String,
    turns: Vec<usize>,
}

pub struct TranscriptScanner<'a> {
    detector: &'a CorrectionDetector,
    linker: Option<&'a TargetLinker>,

    lines_seen: usize,
    non_empty_lines: usize,
    parsed_events: usize,
    truncated: bool,

    turn: usize,
    last_kind: EventKind,
    user_turns: usize,
    assistant_turns: usize,

    tool_use_count: usize,
    unique_tools: BTreeSet<String>,
    timeline: Vec<ToolInvocation>,
    invocations_by_id: HashMap<String, InvocationRef>,
    last_invocation: Option<InvocationRef>,
    search_paths: Vec<SearchPath>,

    changed_files: Vec<ChangedFile>,
    file_edits: Vec<FileEdits>,
    file_index: HashMap<String, usize>,

    active_skill: Option<String>,
    skills: Vec<SkillUsage>,
    context: VecDeque<String>,

    error_count: usize,
    errors: Vec<ErrorSignal>,
    correction_count: usize,
    corrections: Vec<CorrectionSignal>,
    blame: BlameAggregator,
}

impl<'a> TranscriptScanner<'a> {
    /// Without a linker the scanner produces the `trace` variant; with one it
    /// attributes every error and correction and ranks blame.
    #[must_use]
    pub fn new(detector: &'a CorrectionDetector, linker: Option<&'a TargetLinker>) -> Self {
        Self {
            detector,
            linker,
            lines_seen: 0,
            non_empty_lines: 0,
            parsed_events: 0,
            truncated: false,
            turn: 0,
            last_kind: EventKind::Other(None),
            user_turns: 0,
            assistant_turns: 0,
            tool_use_count: 0,
            unique_tools: BTreeSet::new(),
            timeline: Vec::new(),
            invocations_by_id: HashMap::new(),
            last_invocation: None,
            search_paths: Vec::new(),
            changed_files: Vec::new(),
            file_edits: Vec::new(),
            file_index: HashMap::new(),
            active_skill: None,
            skills: Vec::new(),
            context: VecDeque::with_capacity(CONTEXT_BUFFER_CAPACITY + 1),
            error_count: 0,
            errors: Vec::new(),
            correction_count: 0,
            corrections: Vec::new(),
            blame: BlameAggregator::default(),
        }
    }

    #[must_use]
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Feeds one raw transcript line. Blank and malformed lines advance the
    /// line counter and are otherwise ignored.
    pub fn observe(&mut self, raw_line: &str) {
        if self.lines_seen >= MAX_TRANSCRIPT_LINES {
            if !self.truncated {
                warn!(
                    max_lines = MAX_TRANSCRIPT_LINES,
                    "transcript line cap reached; remaining lines ignored"
                );
                self.truncated = true;
            }
            return;
        }

        self.lines_seen += 1;
        if raw_line.trim().is_empty() {
            return;
        }
        self.non_empty_lines += 1;

        let Some(event) = TranscriptEvent::from_line(raw_line) else {
            trace!(line = self.lines_seen, "skipping malformed transcript line");
            return;
        };
        self.parsed_events += 1;
        self.observe_event(&event);
    }

    fn observe_event(&mut self, event: &TranscriptEvent) {
        let line = self.lines_seen;
        self.track_turn(&event.kind);

        let context_text = event.content.text(true);
        if !context_text.trim().is_empty() {
            self.context.push_back(context_text);
            if self.context.len() > CONTEXT_BUFFER_CAPACITY {
                self.context.pop_front();
            }
        }

        if let MessageContent::Text(text) = &event.content {
            if let Some(skill) = command_skill(text) {
                self.active_skill = Some(skill.to_string());
            }
        }

        if event.kind == EventKind::Assistant {
            for block in event.content.blocks() {
                if let ContentBlock::ToolUse { id, name, input } = block {
                    self.record_tool_use(line, id.as_deref(), name, input);
                }
            }
        }

        if event.kind.is_user() {
            for block in event.content.blocks() {
                if let ContentBlock::ToolResult {
                    tool_use_id,
                    is_error,
                    content,
                } = block
                {
                    if *is_error {
                        let message = content.as_deref().unwrap_or_default();
                        self.record_error(line, tool_use_id.as_deref(), message);
                    }
                    // A result settles its invocation; later results without
                    // a known id fall back to the latest invocation.
                    if let Some(id) = tool_use_id {
                        self.invocations_by_id.remove(id);
                    }
                }
            }

            let user_text = event.content.text(false);
            if !user_text.starts_with(SYSTEM_REMINDER_PREFIX) {
                if let Some(found) = self.detector.detect(&user_text) {
                    self.record_correction(line, found);
                }
            }
        }
    }

    fn track_turn(&mut self, kind: &EventKind) {
        if *kind != self.last_kind {
            match kind {
                EventKind::User => {
                    self.user_turns += 1;
                    self.turn += 1;
                }
                EventKind::Assistant => self.assistant_turns += 1,
                EventKind::Other(_) => {}
            }
        }
        self.last_kind = kind.clone();
    }

    fn record_tool_use(
        &mut self,
        line: usize,
        id: Option<&str>,
        name: &str,
        input: &Map<String, Value>,
    ) {
        self.tool_use_count += 1;
        self.unique_tools.insert(name.to_string());

        let index = if self.timeline.len() < MAX_TIMELINE {
            self.timeline.push(ToolInvocation {
                turn: self.turn,
                line,
                tool: name.to_string(),
                input_summary: summarize_tool_input(name, input),
                success: true,
            });
            Some(self.timeline.len() - 1)
        } else {
            None
        };

        let invocation = InvocationRef {
            index,
            tool: name.to_string(),
        };
        if let Some(id) = id {
            self.invocations_by_id
                .insert(id.to_string(), invocation.clone());
        }
        self.last_invocation = Some(invocation);

        match name {
            "Read" | "Grep" | "Glob" => {
                if self.search_paths.len() < MAX_SEARCH_PATHS {
                    self.search_paths.push(SearchPath {
                        turn: self.turn,
                        tool: name.to_string(),
                        path: search_target(input).to_string(),
                        pattern: str_field(input, "pattern").to_string(),
                    });
                }
            }
            "Write" | "Edit" | "MultiEdit" => {
                let path = str_field(input, "file_path");
                if !path.is_empty() {
                    self.record_file_change(line, name, path);
                }
            }
            "Skill" => {
                let skill = str_field(input, "skill");
                if !skill.is_empty() {
                    self.record_skill(line, skill);
                }
            }
            _ => {}
        }
    }

    fn record_file_change(&mut self, line: usize, tool: &str, path: &str) {
        if let Some(index) = self.file_index.get(path).copied() {
            if let Some(edits) = self.file_edits.get_mut(index) {
                edits.turns.push(self.turn);
            }
            return;
        }

        self.file_index
            .insert(path.to_string(), self.file_edits.len());
        self.file_edits.push(FileEdits {
            path: path.to_string(),
            turns: vec![self.turn],
        });

        if self.changed_files.len() < MAX_CHANGED_FILES {
            self.changed_files.push(ChangedFile {
                path: path.to_string(),
                op: if tool == "Write" {
                    FileOp::Write
                } else {
                    FileOp::Edit
                },
                via: tool.to_string(),
                turn: self.turn,
                line,
            });
        }
    }

    fn record_skill(&mut self, line: usize, skill: &str) {
        self.active_skill = Some(skill.to_string());
        match self.skills.iter_mut().find(|usage| usage.name == skill) {
            Some(usage) => {
                usage.count += 1;
                usage.last_line = line;
            }
            None => self.skills.push(SkillUsage {
                name: skill.to_string(),
                count: 1,
                first_line: line,
                last_line: line,
            }),
        }
    }

    fn record_error(&mut self, line: usize, tool_use_id: Option<&str>, message: &str) {
        // Exact correlation first, then the most recent invocation.
        let resolved = tool_use_id
            .and_then(|id| self.invocations_by_id.get(id))
            .or(self.last_invocation.as_ref())
            .cloned();

        let tool = match resolved {
            Some(invocation) => {
                if let Some(entry) = invocation
                    .index
                    .and_then(|index| self.timeline.get_mut(index))
                {
                    entry.success = false;
                }
                invocation.tool
            }
            None => UNKNOWN_TOOL.to_string(),
        };

        self.error_count += 1;
        let (linked_target, context_keywords) = self.link_signal(ERROR_CONTEXT_KEYWORDS);
        if let Some(linked) = &linked_target {
            self.blame.record_link(linked, SignalKind::Error);
        }

        if self.errors.len() < MAX_ERRORS {
            self.errors.push(ErrorSignal {
                turn: self.turn,
                line,
                tool,
                message: truncate_chars(message, ERROR_MESSAGE_CHARS),
                linked_target,
                context_keywords,
            });
        }
    }

    fn record_correction(&mut self, line: usize, found: CorrectionMatch) {
        self.correction_count += 1;
        let (linked_target, context_keywords) = self.link_signal(CORRECTION_CONTEXT_KEYWORDS);
        if let Some(linked) = &linked_target {
            self.blame.record_link(linked, SignalKind::Correction);
        }

        if self.corrections.len() < MAX_CORRECTIONS {
            self.corrections.push(CorrectionSignal {
                turn: self.turn,
                line,
                excerpt: found.excerpt,
                categories: found.categories,
                score: found.score,
                active_skill: self.active_skill.clone(),
                linked_target,
                context_keywords,
            });
        }
    }

    fn link_signal(&self, keyword_cap: usize) -> (Option<LinkedTarget>, Vec<String>) {
        let Some(linker) = self.linker else {
            return (None, Vec::new());
        };

        let context = self.link_context();
        (
            linker.link(&context, self.active_skill.as_deref()),
            context_keywords(&context, keyword_cap),
        )
    }

    fn link_context(&self) -> String {
        let skip = self.context.len().saturating_sub(LINK_CONTEXT_SNIPPETS);
        self.context
            .iter()
            .skip(skip)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Emits the capped extraction.
    ///
    /// # Errors
    /// Returns [`FeedbackError::Unparseable`] when the input had non-empty
    /// lines and none of them decoded as an event.
    pub fn finish(self) -> Result<TranscriptExtraction, FeedbackError> {
        if self.non_empty_lines > 0 && self.parsed_events == 0 {
            return Err(FeedbackError::Unparseable(format!(
                "{} non-empty lines",
                self.non_empty_lines
            )));
        }

        let malformed_lines = self.non_empty_lines - self.parsed_events;
        if malformed_lines > 0 {
            debug!(malformed_lines, "skipped malformed transcript lines");
        }

        let mut backtracks = self
            .file_edits
            .iter()
            .filter(|edits| edits.turns.len() >= 2)
            .map(|edits| Backtrack {
                file: edits.path.clone(),
                edit_count: edits.turns.len(),
                turns: edits.turns.clone(),
            })
            .collect::<Vec<_>>();
        backtracks.sort_by(|left, right| right.edit_count.cmp(&left.edit_count));
        let backtrack_count = backtracks.len();
        backtracks.truncate(MAX_BACKTRACKS);

        let (variant, improvement_targets) = if self.linker.is_some() {
            let mut ranked = self.blame.into_ranked();
            ranked.truncate(MAX_IMPROVEMENT_TARGETS);
            (ExtractionVariant::Extract, Some(ranked))
        } else {
            (ExtractionVariant::Trace, None)
        };

        Ok(TranscriptExtraction {
            contract_version: EXTRACTION_CONTRACT_VERSION.to_string(),
            variant,
            metrics: ExtractionMetrics {
                total_lines: self.lines_seen,
                parsed_events: self.parsed_events,
                malformed_lines,
                user_turns: self.user_turns,
                assistant_turns: self.assistant_turns,
                tool_use_count: self.tool_use_count,
                unique_tools: self.unique_tools.into_iter().collect(),
                code_changes_count: self.file_edits.len(),
                error_count: self.error_count,
                correction_count: self.correction_count,
                backtrack_count,
                truncated: self.truncated,
            },
            skills_used: self.skills,
            tool_timeline: self.timeline,
            search_paths: self.search_paths,
            changed_files: self.changed_files,
            backtracks,
            errors: self.errors,
            corrections: self.corrections,
            improvement_targets,
        })
    }
}

/// Scans an in-memory sequence of transcript lines.
///
/// # Errors
/// See [`TranscriptScanner::finish`].
pub fn scan_lines<'l>(
    lines: impl IntoIterator<Item = &'l str>,
    detector: &CorrectionDetector,
    linker: Option<&TargetLinker>,
) -> Result<TranscriptExtraction, FeedbackError> {
    let mut scanner = TranscriptScanner::new(detector, linker);
    for line in lines {
        scanner.observe(line);
        if scanner.truncated() {
            break;
        }
    }
    scanner.finish()
}

/// Streams a transcript file line by line. Invalid UTF-8 is replaced rather
/// than failing the scan; the affected line then usually fails to decode and
/// is skipped like any other malformed record.
///
/// # Errors
/// Returns [`FeedbackError::Io`] when the file cannot be opened or read and
/// [`FeedbackError::Unparseable`] when no line decodes.
pub fn scan_transcript_file(
    path: &Path,
    detector: &CorrectionDetector,
    linker: Option<&TargetLinker>,
) -> Result<TranscriptExtraction, FeedbackError> {
    let io_error = |source| FeedbackError::Io {
        path: path.to_path_buf(),
        source,
    };
    let reader = BufReader::new(File::open(path).map_err(io_error)?);

    let mut scanner = TranscriptScanner::new(detector, linker);
    for chunk in reader.split(b'\n') {
        let bytes = chunk.map_err(io_error)?;
        scanner.observe(&String::from_utf8_lossy(&bytes));
        if scanner.truncated() {
            break;
        }
    }

    scanner.finish().map_err(|err| match err {
        FeedbackError::Unparseable(_) => FeedbackError::Unparseable(path.display().to_string()),
        other => other,
    })
}

/// One-line human summary of a tool call, capped at [`SUMMARY_CHARS`].
#[must_use]
pub fn summarize_tool_input(tool: &str, input: &Map<String, Value>) -> String {
    let summary = match tool {
        "Read" | "Grep" | "Glob" => {
            let path = search_target(input);
            let pattern = str_field(input, "pattern");
            match (path.is_empty(), pattern.is_empty()) {
                (false, false) => format!("{pattern} in {path}"),
                (false, true) => path.to_string(),
                _ => pattern.to_string(),
            }
        }
        "Write" | "Edit" | "MultiEdit" => str_field(input, "file_path").to_string(),
        "Bash" => {
            let command = str_field(input, "command");
            let head = command.split('|').next().unwrap_or_default();
            let head = head.split("&&").next().unwrap_or_default();
            truncate_chars(head.trim(), BASH_SUMMARY_CHARS)
        }
        "Skill" => str_field(input, "skill").to_string(),
        "Task" => truncate_chars(str_field(input, "description"), SHORT_SUMMARY_CHARS),
        "AskUserQuestion" => {
            let question = input
                .get("questions")
                .and_then(Value::as_array)
                .and_then(|questions| questions.first())
                .and_then(|first| first.get("question"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            truncate_chars(question, SHORT_SUMMARY_CHARS)
        }
        _ => truncate_chars(
            &serde_json::to_string(input).unwrap_or_default(),
            SHORT_SUMMARY_CHARS,
        ),
    };
    truncate_chars(&summary, SUMMARY_CHARS)
}

/// Sorted, deduplicated keyword tokens of a linking context. A token is a run
/// of ASCII word characters and hyphens (so `retry-logic` stays whole) or a
/// run of Japanese script, lowercased. Tokens without a letter, shorter than
/// [`MIN_CONTEXT_KEYWORD_CHARS`], stop words and [`CONVERSATIONAL_WORDS`] are
/// dropped.
#[must_use]
pub fn context_keywords(text: &str, cap: usize) -> Vec<String> {
    let mut tokens = BTreeSet::new();
    let mut current = String::new();
    let mut current_class = None;

    for ch in text.to_lowercase().chars() {
        let class = token_class(ch);
        if class != current_class {
            flush_token(&mut current, &mut tokens);
            current_class = class;
        }
        if class.is_some() {
            current.push(ch);
        }
    }
    flush_token(&mut current, &mut tokens);

    tokens.into_iter().take(cap).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenClass {
    Latin,
    Japanese,
}

fn token_class(ch: char) -> Option<TokenClass> {
    if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
        return Some(TokenClass::Latin);
    }
    match ch {
        '\u{3040}'..='\u{309F}' | '\u{30A0}'..='\u{30FF}' | '\u{4E00}'..='\u{9FFF}' => {
            Some(TokenClass::Japanese)
        }
        _ => None,
    }
}

fn flush_token(current: &mut String, tokens: &mut BTreeSet<String>) {
    let token = current.trim_matches(|ch| ch == '-' || ch == '_');
    let keep = token.chars().count() >= MIN_CONTEXT_KEYWORD_CHARS
        && token.chars().any(char::is_alphabetic)
        && !is_stop_word(token)
        && !CONVERSATIONAL_WORDS.contains(&token);
    if keep {
        tokens.insert(token.to_string());
    }
    current.clear();
}

fn command_skill(text: &str) -> Option<&str> {
    text.match_indices(COMMAND_NAME_OPEN).find_map(|(start, _)| {
        let rest = &text[start + COMMAND_NAME_OPEN.len()..];
        let end = rest.find('<')?;
        if end > 0 && rest[end..].starts_with(COMMAND_NAME_CLOSE) {
            Some(&rest[..end])
        } else {
            None
        }
    })
}

fn str_field<'v>(input: &'v Map<String, Value>, key: &str) -> &'v str {
    input.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn search_target(input: &Map<String, Value>) -> &str {
    if input.contains_key("file_path") {
        str_field(input, "file_path")
    } else {
        str_field(input, "path")
    }
}
