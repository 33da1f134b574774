use serde::Serialize;
use tracing::{debug, info};

use crate::outline::SectionSummary;
use crate::source::{PageTable, TableRows};

/// An extracted page table as attached to a section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachedTable {
    pub page: u32,
    pub columns: Vec<String>,
    pub rows: usize,
    pub well_formed: bool,
}

/// Non-empty header cells, trimmed.
pub fn header_columns(rows: &TableRows) -> Vec<String> {
    rows.first()
        .map(|header| {
            header
                .iter()
                .flatten()
                .map(|cell| cell.trim())
                .filter(|cell| !cell.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// At least one data row under a header with two or more named columns.
pub fn is_well_formed(rows: &TableRows) -> bool {
    rows.len() >= 2 && header_columns(rows).len() >= 2
}

/// Attach page tables to every section whose page range covers them. A
/// section spans from its start page up to the page before the next
/// section starts, and always covers its own start page. Returns the number
/// of tables that matched no section.
pub fn attach(sections: &mut [SectionSummary], tables: &[PageTable]) -> usize {
    let ranges: Vec<Option<(u32, u32)>> = sections
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let start = s.start_page?;
            let next = sections[i + 1..].iter().find_map(|n| n.start_page);
            let end = next.map_or(u32::MAX, |n| n.saturating_sub(1).max(start));
            Some((start, end))
        })
        .collect();

    let mut unmatched = 0;
    let mut malformed = 0;
    for table in tables {
        let attached = AttachedTable {
            page: table.page,
            columns: header_columns(&table.rows),
            rows: table.rows.len(),
            well_formed: is_well_formed(&table.rows),
        };
        if !attached.well_formed {
            malformed += 1;
            debug!(page = table.page, rows = attached.rows, "malformed table");
        }

        let mut matched = false;
        for (section, range) in sections.iter_mut().zip(&ranges) {
            if let Some((start, end)) = *range {
                if (start..=end).contains(&table.page) {
                    section.tables.push(attached.clone());
                    matched = true;
                }
            }
        }
        if !matched {
            unmatched += 1;
        }
    }

    if !tables.is_empty() {
        info!(
            "Attached {} page tables ({} malformed, {} outside any section)",
            tables.len() - unmatched,
            malformed,
            unmatched
        );
    }
    unmatched
}
