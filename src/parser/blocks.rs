use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::lines::{is_blank, is_table_line, CONCERN_SENTINEL, EXAMPLE_SENTINEL};

/// Owner used for blocks opened before any section heading.
pub const GLOBAL_OWNER: &str = "global";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    /// Callout opened by `【关注点】`.
    Concern,
    /// Opened by `【示例】`.
    Example,
    /// A run of consecutive pipe-table lines.
    Table,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Concern => "concern",
            BlockKind::Example => "example",
            BlockKind::Table => "table",
        }
    }

    pub fn parse(s: &str) -> Option<BlockKind> {
        match s {
            "concern" => Some(BlockKind::Concern),
            "example" => Some(BlockKind::Example),
            "table" => Some(BlockKind::Table),
            _ => None,
        }
    }
}

/// When a concern/example block ends without a sentinel, table or scope change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalloutClose {
    #[default]
    Never,
    BlankLine,
}

/// `{kind}_{owner with dots as underscores}_{ordinal}`
pub fn block_id(kind: BlockKind, owner: &str, ordinal: u32) -> String {
    format!("{}_{}_{}", kind.as_str(), owner.replace('.', "_"), ordinal)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRef {
    pub kind: BlockKind,
    pub id: String,
}

/// Special-block state machine. At most one block is open at a time.
#[derive(Debug)]
pub struct BlockClassifier {
    open: Option<BlockRef>,
    ordinals: HashMap<(String, BlockKind), u32>,
    marker_in_block: bool,
    callout_close: CalloutClose,
}

impl BlockClassifier {
    pub fn new(marker_in_block: bool, callout_close: CalloutClose) -> Self {
        BlockClassifier {
            open: None,
            ordinals: HashMap::new(),
            marker_in_block,
            callout_close,
        }
    }

    /// Drop the open block. Called whenever the section stack changes.
    pub fn reset(&mut self) {
        self.open = None;
    }

    /// Number of blocks of `kind` opened so far.
    pub fn opened(&self, kind: BlockKind) -> u32 {
        self.ordinals
            .iter()
            .filter(|((_, k), _)| *k == kind)
            .map(|(_, n)| *n)
            .sum()
    }

    /// Feed one line and return the block it belongs to, if any. `owner` is
    /// the current stack top.
    pub fn classify(&mut self, line: &str, owner: Option<&str>) -> Option<BlockRef> {
        let line = line.trim();
        let trigger = if line == CONCERN_SENTINEL {
            Some(BlockKind::Concern)
        } else if line == EXAMPLE_SENTINEL {
            Some(BlockKind::Example)
        } else if is_table_line(line) {
            Some(BlockKind::Table)
        } else {
            None
        };

        match trigger {
            Some(BlockKind::Table) if self.open_kind() == Some(BlockKind::Table) => self.open.clone(),
            Some(kind) => {
                self.open_block(kind, owner.unwrap_or(GLOBAL_OWNER));
                if self.marker_in_block {
                    self.open.clone()
                } else {
                    None
                }
            }
            None => {
                match self.open_kind() {
                    Some(BlockKind::Table) => self.open = None,
                    Some(BlockKind::Concern | BlockKind::Example)
                        if self.callout_close == CalloutClose::BlankLine && is_blank(line) =>
                    {
                        self.open = None
                    }
                    _ => {}
                }
                self.open.clone()
            }
        }
    }

    fn open_kind(&self) -> Option<BlockKind> {
        self.open.as_ref().map(|b| b.kind)
    }

    fn open_block(&mut self, kind: BlockKind, owner: &str) {
        let ordinal = self.ordinals.entry((owner.to_string(), kind)).or_insert(0);
        *ordinal += 1;
        self.open = Some(BlockRef {
            kind,
            id: block_id(kind, owner, *ordinal),
        });
    }
}
