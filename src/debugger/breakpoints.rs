use std::collections::HashSet;

/// The active breakpoint lines, replaced wholesale whenever the editor's
/// gutter changes. Membership test only; no ordering.
#[derive(Debug, Clone, Default)]
pub struct BreakpointSet {
    lines: HashSet<u32>,
}

impl BreakpointSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_lines<I: IntoIterator<Item = u32>>(lines: I) -> Self {
        Self {
            lines: lines.into_iter().collect(),
        }
    }

    pub fn replace(&mut self, lines: HashSet<u32>) {
        tracing::debug!(count = lines.len(), "breakpoint set replaced");
        self.lines = lines;
    }

    pub fn contains(&self, line: u32) -> bool {
        self.lines.contains(&line)
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }
}
