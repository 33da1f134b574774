use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};

use crate::parser::{BlockKind, LineRecord};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let conn = Connection::open(path).with_context(|| format!("opening {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS lines (
            line_number    INTEGER PRIMARY KEY,
            text           TEXT NOT NULL,
            section_path   TEXT NOT NULL,
            parent_section TEXT,
            block_type     TEXT CHECK(block_type IN ('concern','example','table')),
            block_id       TEXT,
            page           INTEGER,
            CHECK((block_type IS NULL) = (block_id IS NULL))
        );
        CREATE INDEX IF NOT EXISTS idx_lines_block ON lines(block_id);
        CREATE INDEX IF NOT EXISTS idx_lines_parent ON lines(parent_section);

        -- One row per section_path entry
        CREATE TABLE IF NOT EXISTS line_sections (
            line_number INTEGER NOT NULL REFERENCES lines(line_number),
            depth       INTEGER NOT NULL,
            section_id  TEXT NOT NULL,
            PRIMARY KEY (line_number, depth)
        );
        CREATE INDEX IF NOT EXISTS idx_line_sections_section ON line_sections(section_id);
        ",
    )?;
    Ok(())
}

/// Replace the stored document with `records`. Duplicate line numbers are
/// rejected by the primary key and roll the whole load back.
pub fn save_lines(conn: &Connection, records: &[LineRecord]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch("DELETE FROM line_sections; DELETE FROM lines;")?;
    {
        let mut l_stmt = tx.prepare(
            "INSERT INTO lines (line_number, text, section_path, parent_section, block_type, block_id, page)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        let mut s_stmt =
            tx.prepare("INSERT INTO line_sections (line_number, depth, section_id) VALUES (?1, ?2, ?3)")?;
        for r in records {
            let path = serde_json::to_string(&r.section_path)?;
            l_stmt
                .execute(rusqlite::params![
                    r.line_number,
                    r.text,
                    path,
                    r.parent_section,
                    r.block_type.map(|k| k.as_str()),
                    r.block_id,
                    r.page,
                ])
                .with_context(|| format!("inserting line {}", r.line_number))?;
            for (depth, section_id) in r.section_path.iter().enumerate() {
                s_stmt.execute(rusqlite::params![r.line_number, depth, section_id])?;
            }
        }
    }
    tx.commit()?;
    Ok(records.len())
}

const LINE_COLUMNS: &str = "l.line_number, l.text, l.section_path, l.parent_section, l.block_type, l.block_id, l.page";

fn record_from_row(row: &Row) -> rusqlite::Result<LineRecord> {
    let path: String = row.get(2)?;
    let section_path = serde_json::from_str(&path)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    let block_type = row
        .get::<_, Option<String>>(4)?
        .map(|s| {
            BlockKind::parse(&s).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(4, Type::Text, format!("unknown block type {s}").into())
            })
        })
        .transpose()?;
    Ok(LineRecord {
        line_number: row.get(0)?,
        text: row.get(1)?,
        section_path,
        parent_section: row.get(3)?,
        block_type,
        block_id: row.get(5)?,
        page: row.get(6)?,
    })
}

/// All lines of one block in document order.
pub fn fetch_block(conn: &Connection, block_id: &str) -> Result<Vec<LineRecord>> {
    let sql = format!("SELECT {LINE_COLUMNS} FROM lines l WHERE l.block_id = ?1 ORDER BY l.line_number");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([block_id], record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Every line of one section, sub-sections and sub-clauses included: lines
/// whose path contains `section_id`.
pub fn fetch_section(conn: &Connection, section_id: &str) -> Result<Vec<LineRecord>> {
    fetch_where_section(conn, "s.section_id = ?1", section_id)
}

/// Lines whose path has an entry starting with `prefix`. The match is
/// textual, so `2.3.P.1` also selects `2.3.P.12`.
pub fn fetch_section_prefix(conn: &Connection, prefix: &str) -> Result<Vec<LineRecord>> {
    fetch_where_section(conn, "substr(s.section_id, 1, length(?1)) = ?1", prefix)
}

fn fetch_where_section(conn: &Connection, condition: &str, arg: &str) -> Result<Vec<LineRecord>> {
    let sql = format!(
        "SELECT {LINE_COLUMNS} FROM lines l
         WHERE EXISTS (
             SELECT 1 FROM line_sections s
             WHERE s.line_number = l.line_number AND {condition}
         )
         ORDER BY l.line_number"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([arg], record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRow {
    pub block_id: String,
    pub kind: BlockKind,
    /// `None` for blocks opened before the first heading.
    pub section: Option<String>,
    pub first_line: usize,
    pub lines: usize,
}

pub fn fetch_blocks(conn: &Connection, kind: Option<BlockKind>) -> Result<Vec<BlockRow>> {
    // bare columns take their values from the MIN(line_number) row
    let mut stmt = conn.prepare(
        "SELECT block_id, block_type, parent_section, MIN(line_number), COUNT(*)
         FROM lines
         WHERE block_id IS NOT NULL AND (?1 IS NULL OR block_type = ?1)
         GROUP BY block_id
         ORDER BY MIN(line_number)",
    )?;
    let rows = stmt
        .query_map([kind.map(|k| k.as_str())], |row| {
            let kind: String = row.get(1)?;
            Ok(BlockRow {
                block_id: row.get(0)?,
                kind: BlockKind::parse(&kind).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(1, Type::Text, format!("unknown block type {kind}").into())
                })?,
                section: row.get(2)?,
                first_line: row.get(3)?,
                lines: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub struct Stats {
    pub lines: usize,
    pub sections: usize,
    pub blocks: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let lines: usize = conn.query_row("SELECT COUNT(*) FROM lines", [], |r| r.get(0))?;
    let sections: usize =
        conn.query_row("SELECT COUNT(DISTINCT section_id) FROM line_sections", [], |r| r.get(0))?;
    let blocks: usize = conn.query_row("SELECT COUNT(DISTINCT block_id) FROM lines", [], |r| r.get(0))?;
    Ok(Stats {
        lines,
        sections,
        blocks,
    })
}
