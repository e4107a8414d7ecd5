//! Source positions of model elements.
//!
//! The [`LocationMap`] is filled by parsers and read by diagnostics: an element-based diagnostic
//! looks its position up here each time it is queried, so replacing the map (e.g. on reload)
//! moves every such diagnostic with it.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::NodeId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub char_start: Option<usize>,
    pub char_end: Option<usize>,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl Location {
    pub fn new(char_start: usize, char_end: usize, line: usize, column: usize) -> Self {
        Location {
            char_start: Some(char_start),
            char_end: Some(char_end),
            line: Some(line),
            column: Some(column),
        }
    }

    fn span(&self) -> Option<(usize, usize)> {
        Some((self.char_start?, self.char_end?))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationMap {
    entries: HashMap<NodeId, Location>,
}

impl LocationMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set_location(&mut self, element: NodeId, location: Location) {
        self.entries.insert(element, location);
    }

    pub fn location(&self, element: NodeId) -> Option<&Location> {
        self.entries.get(&element)
    }

    pub fn set_char_start(&mut self, element: NodeId, char_start: usize) {
        self.entries.entry(element).or_default().char_start = Some(char_start);
    }

    pub fn set_char_end(&mut self, element: NodeId, char_end: usize) {
        self.entries.entry(element).or_default().char_end = Some(char_end);
    }

    pub fn set_line(&mut self, element: NodeId, line: usize) {
        self.entries.entry(element).or_default().line = Some(line);
    }

    pub fn set_column(&mut self, element: NodeId, column: usize) {
        self.entries.entry(element).or_default().column = Some(column);
    }

    pub fn char_start(&self, element: NodeId) -> Option<usize> {
        self.entries.get(&element).and_then(|l| l.char_start)
    }

    pub fn char_end(&self, element: NodeId) -> Option<usize> {
        self.entries.get(&element).and_then(|l| l.char_end)
    }

    pub fn line(&self, element: NodeId) -> Option<usize> {
        self.entries.get(&element).and_then(|l| l.line)
    }

    pub fn column(&self, element: NodeId) -> Option<usize> {
        self.entries.get(&element).and_then(|l| l.column)
    }

    /// Elements whose span contains `offset`, innermost (shortest span) first.
    pub fn elements_at(&self, offset: usize) -> Vec<NodeId> {
        let mut hits: Vec<(usize, NodeId)> = self
            .entries
            .iter()
            .filter_map(|(id, location)| {
                let (start, end) = location.span()?;
                (start <= offset && offset <= end).then_some((end - start, *id))
            })
            .collect();
        hits.sort();
        hits.into_iter().map(|(_, id)| id).collect()
    }

    /// Elements whose span lies entirely inside `[start, end]`, ordered by start offset.
    pub fn elements_between(&self, start: usize, end: usize) -> Vec<NodeId> {
        let mut hits: Vec<(usize, NodeId)> = self
            .entries
            .iter()
            .filter_map(|(id, location)| {
                let (s, e) = location.span()?;
                (start <= s && e <= end).then_some((s, *id))
            })
            .collect();
        hits.sort();
        hits.into_iter().map(|(_, id)| id).collect()
    }

    pub fn copy_location(&mut self, from: NodeId, to: NodeId) {
        if let Some(location) = self.entries.get(&from).copied() {
            self.entries.insert(to, location);
        }
    }

    pub fn remove(&mut self, element: NodeId) -> Option<Location> {
        self.entries.remove(&element)
    }
}

/// Maps character offsets of a text to 1-based lines and 0-based columns.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        let mut len = 0;
        for (offset, c) in text.chars().enumerate() {
            if c == '\n' {
                line_starts.push(offset + 1);
            }
            len = offset + 1;
        }
        LineIndex { line_starts, len }
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Character offset of the first character of `line` (1-based).
    pub fn line_start(&self, line: usize) -> Option<usize> {
        self.line_starts.get(line.checked_sub(1)?).copied()
    }

    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.len);
        let line = match self.line_starts.binary_search(&offset) {
            Ok(index) => index,
            Err(index) => index - 1,
        };
        (line + 1, offset - self.line_starts[line])
    }

    pub fn location(&self, char_start: usize, char_end: usize) -> Location {
        let (line, column) = self.line_col(char_start);
        Location::new(char_start, char_end, line, column)
    }
}
