use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::parser::lines::{
    is_table_line, match_sub_clause, HeadingGrammar, CONCERN_SENTINEL, EXAMPLE_SENTINEL,
};
use crate::parser::{BlockKind, LineRecord, ParsedDocument};
use crate::tables::AttachedTable;

static ELLIPSIS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.{4,}|…").unwrap());

/// One root section as reported downstream. Repeated headings with the same
/// id are folded into the first occurrence.
#[derive(Debug, Clone, Serialize)]
pub struct SectionSummary {
    pub id: String,
    pub title: Option<String>,
    /// Dot-separated segment count, `2.3.P.1` is level 4.
    pub level: usize,
    pub parent: Option<String>,
    pub line_number: usize,
    pub start_page: Option<u32>,
    pub end_page: Option<u32>,
    pub has_concern: bool,
    pub has_example: bool,
    pub has_table: bool,
    /// Body text before the first concern/example sentinel, title excluded.
    pub content: Option<String>,
    /// Sections cited with `参照 <id>` in the body.
    pub references: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<AttachedTable>,
}

/// Summarize every root section. A section's body runs from its heading to
/// the next heading of any depth.
pub fn build(doc: &ParsedDocument, root_prefix: &str) -> Result<Vec<SectionSummary>, regex::Error> {
    let grammar = HeadingGrammar::new(root_prefix, true)?;
    let reference_re = Regex::new(&format!(r"参照\s*({}(?:\.\d+)+)", regex::escape(root_prefix)))?;
    let records = &doc.records;

    let mut sections: Vec<SectionSummary> = Vec::new();
    let mut by_id: HashMap<String, usize> = HashMap::new();

    for (i, mark) in doc.headings.iter().enumerate() {
        let end = doc.headings.get(i + 1).map_or(usize::MAX, |next| next.line_number);
        let lo = records.partition_point(|r| r.line_number <= mark.line_number);
        let hi = records.partition_point(|r| r.line_number < end);
        let body = &records[lo..hi.max(lo)];

        let inline_title = mark.title.clone();
        let body_title = inline_title.is_none().then(|| title_from_body(body, &grammar)).flatten();
        let content = main_content(body, &grammar, body_title.is_some());
        let title = inline_title.or(body_title);
        let references: BTreeSet<String> = body
            .iter()
            .flat_map(|r| reference_re.captures_iter(&r.text))
            .map(|caps| caps[1].to_string())
            .collect();
        let has = |kind: BlockKind| body.iter().any(|r| r.block_type == Some(kind));

        let summary = SectionSummary {
            id: mark.id.clone(),
            title,
            level: mark.id.split('.').count(),
            parent: parent_id(&mark.id, &grammar),
            line_number: mark.line_number,
            start_page: mark.page,
            end_page: body.iter().rev().find_map(|r| r.page).or(mark.page),
            has_concern: has(BlockKind::Concern),
            has_example: has(BlockKind::Example),
            has_table: has(BlockKind::Table),
            content,
            references: references.into_iter().collect(),
            tables: Vec::new(),
        };

        match by_id.get(&mark.id) {
            Some(&idx) => {
                debug!(id = %mark.id, line_number = mark.line_number, "repeated heading");
                merge(&mut sections[idx], summary);
            }
            None => {
                by_id.insert(mark.id.clone(), sections.len());
                sections.push(summary);
            }
        }
    }

    Ok(sections)
}

/// The first meaningful line after a bare heading, unless it is itself
/// structure (sentinel, table row, sub-clause).
fn title_from_body(body: &[LineRecord], grammar: &HeadingGrammar) -> Option<String> {
    let line = body
        .iter()
        .map(|r| r.text.trim())
        .find(|t| !t.is_empty() && grammar.classify_noise(t).is_none())?;
    let structural = line == CONCERN_SENTINEL
        || line == EXAMPLE_SENTINEL
        || is_table_line(line)
        || match_sub_clause(line).is_some();
    (!structural).then(|| line.to_string())
}

/// Meaningful body lines up to the first sentinel, joined with newlines.
fn main_content(body: &[LineRecord], grammar: &HeadingGrammar, skip_title: bool) -> Option<String> {
    let lines: Vec<&str> = body
        .iter()
        .map(|r| r.text.trim())
        .filter(|t| !t.is_empty() && grammar.classify_noise(t).is_none())
        .skip(usize::from(skip_title))
        .take_while(|t| *t != CONCERN_SENTINEL && *t != EXAMPLE_SENTINEL)
        .collect();
    (!lines.is_empty()).then(|| lines.join("\n"))
}

fn parent_id(id: &str, grammar: &HeadingGrammar) -> Option<String> {
    if grammar.depth(id) < 2 {
        return None;
    }
    id.rsplit_once('.').map(|(parent, _)| parent.to_string())
}

fn is_truncated(title: &Option<String>) -> bool {
    title.as_deref().is_some_and(|t| ELLIPSIS_RE.is_match(t))
}

fn merge(kept: &mut SectionSummary, repeat: SectionSummary) {
    let better = repeat.title.is_some() && !is_truncated(&repeat.title);
    if kept.title.is_none() || (is_truncated(&kept.title) && better) {
        kept.title = repeat.title;
    }
    if kept.content.is_none() {
        kept.content = repeat.content;
    }
    kept.has_concern |= repeat.has_concern;
    kept.has_example |= repeat.has_example;
    kept.has_table |= repeat.has_table;
    kept.end_page = kept.end_page.max(repeat.end_page);
    let refs: BTreeSet<String> = kept.references.drain(..).chain(repeat.references).collect();
    kept.references = refs.into_iter().collect();
}
