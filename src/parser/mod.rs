pub mod blocks;
pub mod lines;
pub mod sections;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::source::Document;
use blocks::BlockClassifier;
pub use blocks::{BlockKind, CalloutClose};
use lines::{match_sub_clause, HeadingGrammar};
use sections::SectionStack;

pub const DEFAULT_ROOT_PREFIX: &str = "2.3.P";

/// What happens to page numbers, running headers and TOC lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoisePolicy {
    /// Emit as plain lines with no structural effect.
    #[default]
    PassThrough,
    /// Leave out of the output entirely.
    Skip,
}

/// Behaviour switches for the variants the classifier has to support.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    pub root_prefix: String,
    /// Exact full-line heading match; otherwise a trailing title is allowed.
    pub strict_heading_match: bool,
    /// Treat a heading equal to an open entry as already open.
    pub equality_counts_as_ancestor: bool,
    /// The sentinel or first table row carries the block it opens.
    pub marker_line_belongs_to_block: bool,
    pub callout_close: CalloutClose,
    pub noise_policy: NoisePolicy,
}

impl Default for ParserConfig {
    fn default() -> Self {
        ParserConfig {
            root_prefix: DEFAULT_ROOT_PREFIX.to_string(),
            strict_heading_match: true,
            equality_counts_as_ancestor: false,
            marker_line_belongs_to_block: true,
            callout_close: CalloutClose::Never,
            noise_policy: NoisePolicy::PassThrough,
        }
    }
}

/// One output line. Field order is the JSON contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRecord {
    pub line_number: usize,
    pub text: String,
    pub section_path: Vec<String>,
    pub parent_section: Option<String>,
    pub block_type: Option<BlockKind>,
    pub block_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

/// A root-section heading as it was seen, duplicates included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadingMark {
    pub line_number: usize,
    pub id: String,
    pub title: Option<String>,
    pub page: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub lines: usize,
    pub records: usize,
    pub headings: usize,
    pub sub_clauses: usize,
    pub noise: usize,
    pub anomalies: usize,
    pub concern_blocks: u32,
    pub example_blocks: u32,
    pub table_blocks: u32,
}

#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub records: Vec<LineRecord>,
    pub headings: Vec<HeadingMark>,
    pub stats: ParseStats,
}

/// Single-pass parser context. Feed lines in document order, then `finish`.
#[derive(Debug)]
pub struct Parser {
    config: ParserConfig,
    grammar: HeadingGrammar,
    stack: SectionStack,
    blocks: BlockClassifier,
    records: Vec<LineRecord>,
    headings: Vec<HeadingMark>,
    stats: ParseStats,
}

impl Parser {
    pub fn new(config: ParserConfig) -> Result<Self, regex::Error> {
        let grammar = HeadingGrammar::new(&config.root_prefix, config.strict_heading_match)?;
        let blocks = BlockClassifier::new(config.marker_line_belongs_to_block, config.callout_close);
        Ok(Parser {
            config,
            grammar,
            stack: SectionStack::new(),
            blocks,
            records: Vec::new(),
            headings: Vec::new(),
            stats: ParseStats::default(),
        })
    }

    /// Consume one raw line and emit its record. Noise lines under
    /// `NoisePolicy::Skip` emit nothing.
    pub fn feed(&mut self, line_number: usize, page: Option<u32>, raw: &str) {
        let text = raw.trim_end_matches(['\r', '\n']);
        let line = text.trim();
        self.stats.lines += 1;

        let noise = self.grammar.classify_noise(line);
        if let Some(kind) = noise {
            self.stats.noise += 1;
            debug!(line_number, ?kind, "extraction noise");
            if self.config.noise_policy == NoisePolicy::Skip {
                return;
            }
        } else {
            self.track_structure(line_number, page, line);
        }

        let block = self.blocks.classify(line, self.stack.top());
        let (block_type, block_id) = match block {
            Some(b) => (Some(b.kind), Some(b.id)),
            None => (None, None),
        };
        self.records.push(LineRecord {
            line_number,
            text: text.to_string(),
            section_path: self.stack.path(),
            parent_section: self.stack.top().map(str::to_string),
            block_type,
            block_id,
            page,
        });
    }

    fn track_structure(&mut self, line_number: usize, page: Option<u32>, line: &str) {
        if let Some(heading) = self.grammar.match_heading(line) {
            let emptied = self
                .stack
                .push_section(&heading.id, self.config.equality_counts_as_ancestor);
            if emptied && self.grammar.depth(&heading.id) > 1 {
                warn!(
                    line_number,
                    id = %heading.id,
                    "heading has no open ancestor, treating it as a new root"
                );
                self.stats.anomalies += 1;
            }
            self.blocks.reset();
            self.stats.headings += 1;
            self.headings.push(HeadingMark {
                line_number,
                id: heading.id,
                title: heading.title,
                page,
            });
        } else if let Some(clause) = match_sub_clause(line) {
            if self.stack.promote(&clause).is_some() {
                self.blocks.reset();
                self.stats.sub_clauses += 1;
            } else {
                debug!(line_number, "sub-clause before any section heading");
                self.stats.anomalies += 1;
            }
        }
    }

    pub fn finish(mut self) -> ParsedDocument {
        self.stats.records = self.records.len();
        self.stats.concern_blocks = self.blocks.opened(BlockKind::Concern);
        self.stats.example_blocks = self.blocks.opened(BlockKind::Example);
        self.stats.table_blocks = self.blocks.opened(BlockKind::Table);

        let s = &self.stats;
        info!(
            "Parsed {} lines into {} records: {} headings, {} sub-clauses, {} concern / {} example / {} table blocks, {} noise, {} anomalies",
            s.lines,
            s.records,
            s.headings,
            s.sub_clauses,
            s.concern_blocks,
            s.example_blocks,
            s.table_blocks,
            s.noise,
            s.anomalies,
        );

        ParsedDocument {
            records: self.records,
            headings: self.headings,
            stats: self.stats,
        }
    }
}

/// Parse a loaded document; line numbers are 1-based source positions.
pub fn parse_document(doc: &Document, config: &ParserConfig) -> Result<ParsedDocument, regex::Error> {
    let mut parser = Parser::new(config.clone())?;
    for (i, line) in doc.lines.iter().enumerate() {
        parser.feed(i + 1, line.page, &line.text);
    }
    Ok(parser.finish())
}

pub fn parse_lines<S: AsRef<str>>(lines: &[S], config: &ParserConfig) -> Result<ParsedDocument, regex::Error> {
    let mut parser = Parser::new(config.clone())?;
    for (i, line) in lines.iter().enumerate() {
        parser.feed(i + 1, None, line.as_ref());
    }
    Ok(parser.finish())
}

pub fn to_json(records: &[LineRecord]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sections::is_ancestor;
    use std::collections::HashMap;

    fn parse(lines: &[&str]) -> Vec<LineRecord> {
        parse_lines(lines, &ParserConfig::default()).unwrap().records
    }

    fn parse_with(lines: &[&str], config: ParserConfig) -> Vec<LineRecord> {
        parse_lines(lines, &config).unwrap().records
    }

    fn fixture() -> Vec<String> {
        std::fs::read_to_string("tests/fixtures/module2_excerpt.txt")
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn plain_text_under_heading() {
        let r = parse(&["2.3.P.1", "普通文本"]);
        assert_eq!(r.len(), 2);
        assert_eq!(r[1].section_path, ["2.3.P.1"]);
        assert_eq!(r[1].parent_section.as_deref(), Some("2.3.P.1"));
        assert_eq!(r[1].block_type, None);
        assert_eq!(r[1].block_id, None);
    }

    #[test]
    fn concern_block_includes_marker() {
        let r = parse(&["2.3.P.1", "【关注点】", "内容A", "内容B"]);
        for rec in &r[1..] {
            assert_eq!(rec.block_id.as_deref(), Some("concern_2_3_P_1_1"));
            assert_eq!(rec.block_type, Some(BlockKind::Concern));
        }
        assert_eq!(r[0].block_id, None);
    }

    #[test]
    fn sub_clause_then_table() {
        let r = parse(&["2.3.P.2", "一、子条款", "|a|b|", "|1|2|", "非表格行"]);
        assert_eq!(r[1].section_path, ["2.3.P.2", "2.3.P.2.一"]);
        assert_eq!(r[2].block_id.as_deref(), Some("table_2_3_P_2_一_1"));
        assert_eq!(r[3].block_id, r[2].block_id);
        assert_eq!(r[4].block_type, None);
        assert_eq!(r[4].section_path, ["2.3.P.2", "2.3.P.2.一"]);
    }

    #[test]
    fn backtracking_heading() {
        let r = parse(&["2.3.P.1.1", "2.3.P.1"]);
        assert_eq!(r[0].section_path, ["2.3.P.1.1"]);
        assert_eq!(r[1].section_path, ["2.3.P.1"]);
    }

    #[test]
    fn sentinels_without_section() {
        let r = parse(&["【关注点】", "【示例】"]);
        assert_eq!(r[0].block_id.as_deref(), Some("concern_global_1"));
        assert_eq!(r[1].block_id.as_deref(), Some("example_global_1"));
        assert!(r.iter().all(|rec| rec.section_path.is_empty() && rec.parent_section.is_none()));
    }

    #[test]
    fn heading_resets_open_block() {
        let r = parse(&["2.3.P.1", "【关注点】", "内容", "2.3.P.2", "正文"]);
        assert_eq!(r[3].block_id, None);
        assert_eq!(r[4].block_id, None);
    }

    #[test]
    fn sub_clause_resets_open_block() {
        let r = parse(&["2.3.P.1", "【示例】", "内容", "1、下一条", "正文"]);
        assert_eq!(r[2].block_type, Some(BlockKind::Example));
        assert_eq!(r[3].block_type, None);
        assert_eq!(r[4].block_type, None);
        assert_eq!(r[4].parent_section.as_deref(), Some("2.3.P.1.1"));
    }

    #[test]
    fn running_header_is_not_structural() {
        let r = parse(&["2.3.P.2", "【关注点】", "2.3.P", "内容"]);
        assert_eq!(r[2].section_path, ["2.3.P.2"]);
        assert_eq!(r[3].block_id.as_deref(), Some("concern_2_3_P_2_1"));
    }

    #[test]
    fn page_number_splits_table() {
        let r = parse(&["2.3.P.5", "|a|b|", "17", "|c|d|"]);
        assert_eq!(r[1].block_id.as_deref(), Some("table_2_3_P_5_1"));
        assert_eq!(r[2].block_id, None);
        assert_eq!(r[3].block_id.as_deref(), Some("table_2_3_P_5_2"));
    }

    #[test]
    fn skip_policy_drops_noise_but_keeps_numbering() {
        let config = ParserConfig {
            noise_policy: NoisePolicy::Skip,
            ..ParserConfig::default()
        };
        let r = parse_with(&["2.3.P.1", "3", "正文", "2.3.P"], config);
        let numbers: Vec<_> = r.iter().map(|rec| rec.line_number).collect();
        assert_eq!(numbers, vec![1, 3]);
    }

    #[test]
    fn ellipsis_sub_clause_is_promoted() {
        let r = parse(&["2.3.P.1", "（1）处方中……的用量", "正文"]);
        assert_eq!(r[1].section_path, ["2.3.P.1", "2.3.P.1.(1)"]);
        assert_eq!(r[2].parent_section.as_deref(), Some("2.3.P.1.(1)"));
    }

    #[test]
    fn ellipsis_table_row_survives_skip_policy() {
        let config = ParserConfig {
            noise_policy: NoisePolicy::Skip,
            ..ParserConfig::default()
        };
        let r = parse_with(&["2.3.P.1", "|成分|用量|", "|原料药1|……|", "|辅料|1mg|"], config);
        let numbers: Vec<_> = r.iter().map(|rec| rec.line_number).collect();
        assert_eq!(numbers, [1, 2, 3, 4]);
        for rec in &r[1..] {
            assert_eq!(rec.block_id.as_deref(), Some("table_2_3_P_1_1"));
        }
    }

    #[test]
    fn toc_lines_never_become_headings() {
        let config = ParserConfig {
            strict_heading_match: false,
            ..ParserConfig::default()
        };
        let parsed = parse_lines(
            &["2.3.P.1 剂型及产品组成............3", "2.3.P.2 产品开发", "正文"],
            &config,
        )
        .unwrap();
        assert_eq!(parsed.records[0].section_path, Vec::<String>::new());
        assert_eq!(parsed.records[2].section_path, ["2.3.P.2"]);
        assert_eq!(parsed.headings.len(), 1);
        assert_eq!(parsed.headings[0].title.as_deref(), Some("产品开发"));
        assert_eq!(parsed.stats.noise, 1);
    }

    #[test]
    fn strict_mode_ignores_titled_headings() {
        let r = parse(&["2.3.P.2 产品开发", "正文"]);
        assert!(r[1].section_path.is_empty());
    }

    #[test]
    fn orphan_sub_clause_is_counted_not_fatal() {
        let parsed = parse_lines(&["一、前言", "正文"], &ParserConfig::default()).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert!(parsed.records[0].section_path.is_empty());
        assert_eq!(parsed.stats.anomalies, 1);
    }

    #[test]
    fn deep_heading_without_parent_recovers() {
        let parsed = parse_lines(&["2.3.P.1", "2.3.P.3.2.1", "正文"], &ParserConfig::default()).unwrap();
        assert_eq!(parsed.records[2].section_path, ["2.3.P.3.2.1"]);
        assert_eq!(parsed.stats.anomalies, 1);
    }

    #[test]
    fn duplicate_headings_are_both_kept() {
        let parsed = parse_lines(&["2.3.P.3", "【关注点】", "2.3.P.3", "【关注点】"], &ParserConfig::default()).unwrap();
        assert_eq!(parsed.headings.len(), 2);
        assert_eq!(parsed.records[3].block_id.as_deref(), Some("concern_2_3_P_3_2"));
    }

    #[test]
    fn marker_line_flag_applies_to_every_kind() {
        let config = ParserConfig {
            marker_line_belongs_to_block: false,
            ..ParserConfig::default()
        };
        let r = parse_with(&["2.3.P.1", "【关注点】", "内容", "|a|b|", "|1|2|"], config);
        assert_eq!(r[1].block_id, None);
        assert_eq!(r[2].block_id.as_deref(), Some("concern_2_3_P_1_1"));
        assert_eq!(r[3].block_id, None);
        assert_eq!(r[4].block_id.as_deref(), Some("table_2_3_P_1_1"));
    }

    #[test]
    fn text_is_untrimmed() {
        let r = parse(&["  2.3.P.1  ", "  缩进正文\r"]);
        assert_eq!(r[0].text, "  2.3.P.1  ");
        assert_eq!(r[1].text, "  缩进正文");
        assert_eq!(r[1].section_path, ["2.3.P.1"]);
    }

    #[test]
    fn json_shape() {
        let r = parse(&["2.3.P.1", "【关注点】"]);
        let value: serde_json::Value = serde_json::from_str(&to_json(&r).unwrap()).unwrap();
        let obj = value[1].as_object().unwrap();
        let keys: Vec<_> = obj.keys().map(String::as_str).collect();
        for key in ["line_number", "text", "section_path", "parent_section", "block_type", "block_id"] {
            assert!(keys.contains(&key), "missing {key}");
        }
        assert!(!keys.contains(&"page"));
        assert_eq!(obj["block_type"], "concern");
        assert_eq!(value[0]["block_type"], serde_json::Value::Null);
        // Chinese text is written as-is
        assert!(to_json(&r).unwrap().contains("【关注点】"));
    }

    #[test]
    fn pages_flow_into_records() {
        let doc = Document::from_text("2.3.P.1\n正文\n\x0c2.3.P.2");
        let parsed = parse_document(&doc, &ParserConfig::default()).unwrap();
        assert_eq!(parsed.records[1].page, Some(1));
        assert_eq!(parsed.records[2].page, Some(2));
        assert_eq!(parsed.headings[1].page, Some(2));
    }

    #[test]
    fn fixture_invariants() {
        let lines = fixture();
        let parsed = parse_lines(&lines, &ParserConfig::default()).unwrap();
        let records = &parsed.records;
        assert_eq!(records.len(), lines.len());

        let mut last_ordinal: HashMap<(String, String), u32> = HashMap::new();
        let mut seen_blocks: HashMap<String, usize> = HashMap::new();
        for (i, rec) in records.iter().enumerate() {
            assert_eq!(rec.line_number, i + 1);

            // stack extension
            for pair in rec.section_path.windows(2) {
                assert!(is_ancestor(&pair[0], &pair[1]), "line {}: {:?}", rec.line_number, pair);
            }
            assert_eq!(rec.parent_section.as_ref(), rec.section_path.last());

            // exclusivity
            assert_eq!(rec.block_id.is_some(), rec.block_type.is_some());

            if let (Some(id), Some(kind)) = (&rec.block_id, rec.block_type) {
                // contiguity: a block id reappears only on the very next line
                if let Some(prev) = seen_blocks.insert(id.clone(), i) {
                    assert_eq!(prev + 1, i, "block {id} is not contiguous");
                } else {
                    // monotonic ordinals per (owner, kind)
                    let (owner, ordinal) = id
                        .strip_prefix(kind.as_str())
                        .and_then(|rest| rest.strip_prefix('_'))
                        .and_then(|rest| rest.rsplit_once('_'))
                        .unwrap();
                    let ordinal: u32 = ordinal.parse().unwrap();
                    let last = last_ordinal.entry((owner.to_string(), kind.as_str().to_string())).or_insert(0);
                    assert_eq!(ordinal, *last + 1, "gap before {id}");
                    *last = ordinal;
                }
                if kind == BlockKind::Table {
                    assert!(lines::is_table_line(&rec.text), "line {} in table", rec.line_number);
                }
            }

            // reset on scope change: the changing line has no block, and the
            // one after it only has one if it opens it
            if i > 0 && records[i - 1].section_path != rec.section_path {
                assert!(rec.block_id.is_none(), "line {} changed scope inside a block", rec.line_number);
                if let Some(next) = records.get(i + 1).filter(|n| n.block_id.is_some()) {
                    let t = next.text.trim();
                    assert!(
                        t == lines::CONCERN_SENTINEL || t == lines::EXAMPLE_SENTINEL || lines::is_table_line(t),
                        "line {} kept a block across a scope change",
                        next.line_number
                    );
                }
            }
        }

        assert!(parsed.stats.headings >= 5);
        assert!(parsed.stats.table_blocks >= 1);
        assert!(parsed.stats.concern_blocks >= 2);
    }

    #[test]
    fn fixture_paths() {
        let lines = fixture();
        let records = parse(&lines.iter().map(String::as_str).collect::<Vec<_>>());
        let find = |needle: &str| records.iter().find(|r| r.text.contains(needle)).unwrap();

        assert_eq!(find("处方组成").section_path, ["2.3.P.1", "2.3.P.1.1"]);
        assert_eq!(
            find("原辅料相容性").section_path,
            ["2.3.P.2", "2.3.P.2.1", "2.3.P.2.1.1", "2.3.P.2.1.1.一"]
        );
        assert_eq!(
            find("pH值").block_id.as_deref(),
            Some("table_2_3_P_2_1_1_一_1")
        );
    }

    #[test]
    fn serialization_is_deterministic() {
        let lines = fixture();
        let a = to_json(&parse_lines(&lines, &ParserConfig::default()).unwrap().records).unwrap();
        let b = to_json(&parse_lines(&lines, &ParserConfig::default()).unwrap().records).unwrap();
        assert_eq!(a, b);
    }
}
