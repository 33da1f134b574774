use super::lines::{is_single_token, SubClause, SubClauseKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Section,
    SubClause(SubClauseKind),
}

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    kind: EntryKind,
}

/// `parent` is an ancestor of `child` when `child` extends it by exactly one
/// token. Equal ids are not ancestors.
pub fn is_ancestor(parent: &str, child: &str) -> bool {
    child
        .strip_prefix(parent)
        .and_then(|rest| rest.strip_prefix('.'))
        .is_some_and(is_single_token)
}

/// Current hierarchical location, outermost first.
#[derive(Debug, Default)]
pub struct SectionStack {
    entries: Vec<Entry>,
}

impl SectionStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn top(&self) -> Option<&str> {
        self.entries.last().map(|e| e.id.as_str())
    }

    pub fn path(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.id.clone()).collect()
    }

    /// Apply a root-section heading: pop everything that is not an ancestor
    /// of `id`, then push it. Returns true when popping emptied a stack that
    /// had entries.
    ///
    /// With `equality_is_ancestor`, an entry equal to `id` stops the popping
    /// and `id` is not pushed a second time.
    pub fn push_section(&mut self, id: &str, equality_is_ancestor: bool) -> bool {
        let had_entries = !self.entries.is_empty();
        while let Some(top) = self.entries.last() {
            if equality_is_ancestor && top.id == id {
                return false;
            }
            if is_ancestor(&top.id, id) {
                break;
            }
            self.entries.pop();
        }
        let emptied = had_entries && self.entries.is_empty();
        self.entries.push(Entry {
            id: id.to_string(),
            kind: EntryKind::Section,
        });
        emptied
    }

    /// Promote a sub-clause under the current section. A clause of a kind
    /// already open below the nearest root section closes that clause (and
    /// anything nested in it) and becomes its sibling; otherwise it nests
    /// under the current top. Returns the new id, or `None` when no section
    /// is open.
    pub fn promote(&mut self, clause: &SubClause) -> Option<&str> {
        let floor = self
            .entries
            .iter()
            .rposition(|e| e.kind == EntryKind::Section)?;
        let kind = EntryKind::SubClause(clause.kind);
        if let Some(offset) = self.entries[floor..].iter().rposition(|e| e.kind == kind) {
            self.entries.truncate(floor + offset);
        }

        let parent = self.top()?;
        let id = format!("{}.{}", parent, clause.suffix);
        self.entries.push(Entry { id, kind });
        self.top()
    }
}
