//! Keyword catalog mapping documentation sections to trigger keywords.
//!
//! The catalog is resolved once per run and handed to the linker; nothing
//! mutates it afterwards. Section order is significant: the linker keeps the
//! first section on equal scores.

use std::fmt::{Display, Formatter};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::FeedbackError;

/// Generic keywords that may add score but can never qualify a section alone.
pub const WEAK_KEYWORDS: &[&str] = &[
    "error",
    "debug",
    "test",
    "file",
    "code",
    "data",
    "config",
    "エラー",
    "テスト",
    "ファイル",
];

type SectionTable = &'static [(&'static str, &'static [&'static str])];

const BUILTIN_CLAUDE_MD: &[(&str, SectionTable)] = &[
    (
        "RULES.md",
        &[
            (
                "## Git Workflow",
                &["git", "commit", "push", "branch", "PR", "rebase", "checkout", "merge"],
            ),
            (
                "## Implementation Completeness",
                &["TODO", "実装", "完成", "未完了", "stub", "incomplete"],
            ),
            (
                "## Scope Discipline",
                &["スコープ", "MVP", "機能追加", "YAGNI", "scope"],
            ),
            (
                "## Failure Investigation",
                &["エラー", "デバッグ", "失敗", "調査", "debug", "error"],
            ),
            (
                "## Professional Honesty",
                &["マーケティング", "誇張", "正直", "professional"],
            ),
            (
                "## Workspace Hygiene",
                &["クリーンアップ", "一時ファイル", "cleanup", "temp"],
            ),
            ("## Tool Optimization", &["ツール", "並列", "parallel", "効率"]),
            (
                "## File Organization",
                &["ファイル構成", "ディレクトリ", "directory", "organization"],
            ),
        ],
    ),
    (
        "PRINCIPLES.md",
        &[
            (
                "## Engineering Mindset",
                &["SOLID", "DRY", "KISS", "設計", "design"],
            ),
            (
                "## Decision Framework",
                &["決定", "トレードオフ", "trade-off", "decision"],
            ),
            ("## Quality Philosophy", &["品質", "quality", "テスト", "test"]),
        ],
    ),
    (
        "FLAGS.md",
        &[
            (
                "## Mode Activation Flags",
                &["brainstorm", "introspect", "orchestrate", "flag"],
            ),
            (
                "## MCP Server Flags",
                &["context7", "sequential", "playwright", "MCP"],
            ),
        ],
    ),
];

const BUILTIN_SKILLS: &[(&str, SectionTable)] = &[
    (
        "architecture",
        &[
            (
                "## セキュリティパターン",
                &["JWT", "認証", "OAuth", "セキュリティ", "暗号化", "auth", "security"],
            ),
            (
                "## アーキテクチャ決定",
                &["ADR", "設計", "構造", "レイヤー", "architecture"],
            ),
        ],
    ),
    (
        "api",
        &[(
            "## エンドポイント設計",
            &["REST", "API", "エンドポイント", "HTTP", "endpoint"],
        )],
    ),
    (
        "database",
        &[(
            "## データモデル",
            &["スキーマ", "エンティティ", "schema", "entity", "table", "index"],
        )],
    ),
    (
        "implementation",
        &[(
            "## コーディング規約",
            &["コーディング", "規約", "coding", "standard", "convention"],
        )],
    ),
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    ClaudeMd,
    Skill,
}

impl TargetKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClaudeMd => "claude_md",
            Self::Skill => "skill",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "claude_md" => Some(Self::ClaudeMd),
            "skill" => Some(Self::Skill),
            _ => None,
        }
    }
}

/// Documentation location that signals are attributed to. Identity is the
/// full `(kind, file, section)` triple.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Target {
    #[serde(rename = "type")]
    pub kind: TargetKind,
    pub file: String,
    pub section: String,
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}#{}", self.kind.as_str(), self.file, self.section)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyword {
    pub text: String,
    pub needle: String,
    pub strong: bool,
}

impl Keyword {
    #[must_use]
    pub fn new(text: &str) -> Self {
        let needle = text.to_lowercase();
        let strong = !is_weak_keyword(&needle);
        Self {
            text: text.to_string(),
            needle,
            strong,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSection {
    pub target: Target,
    /// Skill name for skill sections; compared against the active-skill hint.
    pub skill: Option<String>,
    pub keywords: Vec<Keyword>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordCatalog {
    sections: Vec<CatalogSection>,
}

impl KeywordCatalog {
    #[must_use]
    pub fn builtin() -> Self {
        let mut sections = Vec::new();
        for (file, table) in BUILTIN_CLAUDE_MD {
            for (section, keywords) in *table {
                sections.push(claude_md_section(file, section, keywords.iter().copied()));
            }
        }
        for (skill, table) in BUILTIN_SKILLS {
            for (section, keywords) in *table {
                sections.push(skill_section(skill, section, keywords.iter().copied()));
            }
        }
        Self { sections }
    }

    /// Decodes and validates a catalog from its JSON form.
    ///
    /// # Errors
    /// Returns [`FeedbackError::Catalog`] when the document shape is wrong or
    /// the decoded catalog fails [`KeywordCatalog::validate`].
    pub fn from_json(value: &Value) -> Result<Self, FeedbackError> {
        let root = value
            .as_object()
            .ok_or_else(|| FeedbackError::Catalog("catalog root must be an object".to_string()))?;

        let mut sections = Vec::new();
        for (file, table) in group(root, "claude_md")? {
            for (section, keywords) in section_table(table, file)? {
                sections.push(claude_md_section(file, section, keywords));
            }
        }
        for (skill, table) in group(root, "skills")? {
            for (section, keywords) in section_table(table, skill)? {
                sections.push(skill_section(skill, section, keywords));
            }
        }

        let catalog = Self { sections };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Checks that the catalog can link anything at all.
    ///
    /// # Errors
    /// Returns [`FeedbackError::Catalog`] for an empty catalog, blank section
    /// names or sections without keywords.
    pub fn validate(&self) -> Result<(), FeedbackError> {
        if self.sections.is_empty() {
            return Err(FeedbackError::Catalog(
                "catalog MUST define at least one section".to_string(),
            ));
        }

        for section in &self.sections {
            if section.target.section.trim().is_empty() {
                return Err(FeedbackError::Catalog(format!(
                    "blank section name in {}",
                    section.target.file
                )));
            }
            if section.keywords.is_empty() {
                return Err(FeedbackError::Catalog(format!(
                    "section {} has no keywords",
                    section.target
                )));
            }
        }

        Ok(())
    }

    /// Resolves the catalog for a run. A missing, unreadable or invalid file
    /// falls back to [`KeywordCatalog::builtin`] without failing.
    #[must_use]
    pub fn load_or_builtin(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            debug!("no keyword catalog configured; using built-in catalog");
            return Self::builtin();
        };

        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                debug!(path = %path.display(), %err, "keyword catalog unreadable; using built-in catalog");
                return Self::builtin();
            }
        };

        let parsed = serde_json::from_str::<Value>(&raw)
            .map_err(|err| FeedbackError::Catalog(err.to_string()))
            .and_then(|value| Self::from_json(&value));

        match parsed {
            Ok(catalog) => {
                debug!(path = %path.display(), sections = catalog.sections.len(), "loaded keyword catalog");
                catalog
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "invalid keyword catalog; using built-in catalog");
                Self::builtin()
            }
        }
    }

    #[must_use]
    pub fn sections(&self) -> &[CatalogSection] {
        &self.sections
    }

    /// Serializes back to the `{claude_md: .., skills: ..}` document shape.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut claude_md = Map::new();
        let mut skills = Map::new();

        for section in &self.sections {
            let (group, key) = match (&section.target.kind, &section.skill) {
                (TargetKind::Skill, Some(skill)) => (&mut skills, skill.clone()),
                _ => (&mut claude_md, section.target.file.clone()),
            };
            let entry = group
                .entry(key)
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(table) = entry {
                table.insert(
                    section.target.section.clone(),
                    Value::Array(
                        section
                            .keywords
                            .iter()
                            .map(|keyword| Value::String(keyword.text.clone()))
                            .collect(),
                    ),
                );
            }
        }

        let mut root = Map::new();
        root.insert("claude_md".to_string(), Value::Object(claude_md));
        root.insert("skills".to_string(), Value::Object(skills));
        Value::Object(root)
    }
}

#[must_use]
pub fn is_weak_keyword(keyword: &str) -> bool {
    let lowered = keyword.to_lowercase();
    WEAK_KEYWORDS.iter().any(|weak| *weak == lowered)
}

#[must_use]
pub fn skill_file_path(skill: &str) -> String {
    format!("skills/{skill}/SKILL.md")
}

fn claude_md_section<'a>(
    file: &str,
    section: &str,
    keywords: impl Iterator<Item = &'a str>,
) -> CatalogSection {
    CatalogSection {
        target: Target {
            kind: TargetKind::ClaudeMd,
            file: file.to_string(),
            section: section.to_string(),
        },
        skill: None,
        keywords: keywords.map(Keyword::new).collect(),
    }
}

fn skill_section<'a>(
    skill: &str,
    section: &str,
    keywords: impl Iterator<Item = &'a str>,
) -> CatalogSection {
    CatalogSection {
        target: Target {
            kind: TargetKind::Skill,
            file: skill_file_path(skill),
            section: section.to_string(),
        },
        skill: Some(skill.to_string()),
        keywords: keywords.map(Keyword::new).collect(),
    }
}

fn group<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Vec<(&'a str, &'a Value)>, FeedbackError> {
    match root.get(key) {
        None => Ok(Vec::new()),
        Some(Value::Object(entries)) => Ok(entries
            .iter()
            .map(|(name, table)| (name.as_str(), table))
            .collect()),
        Some(_) => Err(FeedbackError::Catalog(format!("{key} must be an object"))),
    }
}

fn section_table<'a>(
    table: &'a Value,
    owner: &str,
) -> Result<Vec<(&'a str, std::vec::IntoIter<&'a str>)>, FeedbackError> {
    let entries = table
        .as_object()
        .ok_or_else(|| FeedbackError::Catalog(format!("{owner} must map sections to keywords")))?;

    let mut sections = Vec::with_capacity(entries.len());
    for (section, keywords) in entries {
        let items = keywords.as_array().ok_or_else(|| {
            FeedbackError::Catalog(format!("{owner} {section} must be a keyword array"))
        })?;
        let keywords = items
            .iter()
            .map(|item| {
                item.as_str().ok_or_else(|| {
                    FeedbackError::Catalog(format!("{owner} {section} keywords must be strings"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        sections.push((section.as_str(), keywords.into_iter()));
    }
    Ok(sections)
}
