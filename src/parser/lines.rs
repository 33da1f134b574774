use std::sync::LazyLock;

use regex::Regex;

pub const CONCERN_SENTINEL: &str = "【关注点】";
pub const EXAMPLE_SENTINEL: &str = "【示例】";

static CHINESE_CLAUSE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([一二三四五六七八九十]+)、").unwrap());
static ARABIC_CLAUSE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)、").unwrap());
static CIRCLED_CLAUSE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([①②③④⑤⑥⑦⑧⑨⑩])").unwrap());
static PAREN_CLAUSE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^（(\d+)）").unwrap());
// One addressable token appended to a parent id.
static SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[一二三四五六七八九十]+|\d+|[①②③④⑤⑥⑦⑧⑨⑩]|\(\d+\))$").unwrap());
// A run of ASCII dots anywhere, or a Chinese ellipsis leader only when a page
// number follows it; "……" on its own is ordinary prose.
static TOC_LEADER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.{6,}|…{2,}\s*\d+$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubClauseKind {
    /// 一、二、…
    Chinese,
    /// 1、2、…
    Arabic,
    /// ①②…
    Circled,
    /// （1）（2）…
    Parenthesized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubClause {
    pub kind: SubClauseKind,
    /// Appended verbatim to the parent id.
    pub suffix: String,
}

/// Recognize a locally scoped enumerator at the start of `line`.
/// Patterns are tried in a fixed order; the first hit wins.
pub fn match_sub_clause(line: &str) -> Option<SubClause> {
    let line = line.trim();
    if let Some(caps) = CHINESE_CLAUSE_RE.captures(line) {
        return Some(SubClause {
            kind: SubClauseKind::Chinese,
            suffix: caps[1].to_string(),
        });
    }
    if let Some(caps) = ARABIC_CLAUSE_RE.captures(line) {
        return Some(SubClause {
            kind: SubClauseKind::Arabic,
            suffix: caps[1].to_string(),
        });
    }
    if let Some(caps) = CIRCLED_CLAUSE_RE.captures(line) {
        return Some(SubClause {
            kind: SubClauseKind::Circled,
            suffix: caps[1].to_string(),
        });
    }
    PAREN_CLAUSE_RE.captures(line).map(|caps| SubClause {
        kind: SubClauseKind::Parenthesized,
        suffix: format!("({})", &caps[1]),
    })
}

/// True when `suffix` is exactly one sub-clause or section-number token.
pub fn is_single_token(suffix: &str) -> bool {
    SUFFIX_RE.is_match(suffix)
}

/// Starts with a pipe and has at least one more pipe after it.
pub fn is_table_line(line: &str) -> bool {
    let line = line.trim();
    line.starts_with('|') && line[1..].contains('|')
}

pub fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// PDF extraction artifacts that must never drive structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Noise {
    PageNumber,
    RunningHeader,
    TableOfContents,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub id: String,
    /// Trailing text after the number (loose matching only).
    pub title: Option<String>,
}

/// Root-section heading grammar anchored at the document prefix.
#[derive(Debug, Clone)]
pub struct HeadingGrammar {
    prefix: String,
    strict: bool,
    exact_re: Regex,
    leading_re: Regex,
}

impl HeadingGrammar {
    pub fn new(prefix: &str, strict: bool) -> Result<Self, regex::Error> {
        let escaped = regex::escape(prefix);
        Ok(HeadingGrammar {
            prefix: prefix.to_string(),
            strict,
            exact_re: Regex::new(&format!(r"^{}(?:\.\d+){{1,5}}$", escaped))?,
            leading_re: Regex::new(&format!(r"^({}(?:\.\d+){{1,5}})([^.\d].*)?$", escaped))?,
        })
    }

    pub fn match_heading(&self, line: &str) -> Option<Heading> {
        let line = line.trim();
        if self.strict {
            return self.exact_re.is_match(line).then(|| Heading {
                id: line.to_string(),
                title: None,
            });
        }
        let caps = self.leading_re.captures(line)?;
        let title = caps
            .get(2)
            .map(|m| m.as_str().trim().to_string())
            .filter(|t| !t.is_empty());
        Some(Heading {
            id: caps[1].to_string(),
            title,
        })
    }

    /// Number of segments after the prefix (`2.3.P.2.1` → 2).
    pub fn depth(&self, id: &str) -> usize {
        id.strip_prefix(self.prefix.as_str())
            .map(|rest| rest.matches('.').count())
            .unwrap_or(0)
    }

    pub fn classify_noise(&self, line: &str) -> Option<Noise> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if line.bytes().all(|b| b.is_ascii_digit()) {
            Some(Noise::PageNumber)
        } else if line == self.prefix {
            Some(Noise::RunningHeader)
        } else if TOC_LEADER_RE.is_match(line) {
            Some(Noise::TableOfContents)
        } else {
            None
        }
    }
}
