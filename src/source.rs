use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::error::SourceError;

const FORM_FEED: char = '\x0c';

/// One extracted text line in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    pub page: Option<u32>,
    pub text: String,
}

/// Cells may be missing where the extractor saw merged cells.
pub type TableRows = Vec<Vec<Option<String>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTable {
    pub page: u32,
    pub rows: TableRows,
}

/// One page of a JSON page dump.
#[derive(Debug, Clone, Deserialize)]
pub struct PageDump {
    pub page: u32,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub tables: Vec<TableRows>,
}

#[derive(Debug, Clone, Default)]
pub struct Document {
    pub lines: Vec<SourceLine>,
    pub tables: Vec<PageTable>,
}

impl Document {
    /// Text dump. Form feeds at the start of a line mark page breaks; when the
    /// dump has none, lines carry no page numbers.
    pub fn from_text(text: &str) -> Document {
        let text = text.trim_end_matches(|c: char| c == FORM_FEED || c == '\n' || c == '\r');
        let paged = text.contains(FORM_FEED);
        let mut page = 1u32;
        let lines = text
            .lines()
            .map(|raw| {
                let stripped = raw.trim_start_matches(FORM_FEED);
                page += (raw.len() - stripped.len()) as u32;
                SourceLine {
                    page: paged.then_some(page),
                    text: stripped.to_string(),
                }
            })
            .collect();
        Document {
            lines,
            tables: Vec::new(),
        }
    }

    pub fn from_pages(pages: Vec<PageDump>) -> Document {
        let mut doc = Document::default();
        for dump in pages {
            doc.lines.extend(dump.text.lines().map(|l| SourceLine {
                page: Some(dump.page),
                text: l.trim_start_matches(FORM_FEED).to_string(),
            }));
            doc.tables.extend(dump.tables.into_iter().map(|rows| PageTable {
                page: dump.page,
                rows,
            }));
        }
        doc
    }

    pub fn page_count(&self) -> usize {
        let mut pages: Vec<u32> = self.lines.iter().filter_map(|l| l.page).collect();
        pages.dedup();
        pages.len()
    }
}

/// Load an extracted document. `.json` files are page dumps, anything else is
/// read as a text dump.
pub fn load(path: &Path) -> Result<Document, SourceError> {
    if !path.exists() {
        return Err(SourceError::NotFound(path.to_path_buf()));
    }
    let raw = std::fs::read_to_string(path).map_err(|source| SourceError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let doc = if is_json {
        let pages: Vec<PageDump> =
            serde_json::from_str(&raw).map_err(|source| SourceError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        Document::from_pages(pages)
    } else {
        Document::from_text(&raw)
    };

    info!(
        "Loaded {} lines, {} pages, {} tables from {}",
        doc.lines.len(),
        doc.page_count(),
        doc.tables.len(),
        path.display()
    );
    Ok(doc)
}
