//! Minimal view of a parsed syntax tree, so chunk extraction does not depend
//! on a concrete parser.

use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Zero-based row/column location as reported by the parser.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub row: usize,
    pub column: usize,
}

impl Position {
    #[must_use]
    pub fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }
}

/// Start-inclusive, end-exclusive source range. Presentation only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    /// Span covering all of `source`.
    #[must_use]
    pub fn whole(source: &str) -> Self {
        let mut row = 0;
        let mut column = 0;
        for ch in source.chars() {
            if ch == '\n' {
                row += 1;
                column = 0;
            } else {
                column += ch.len_utf8();
            }
        }
        Self {
            start: Position::default(),
            end: Position::new(row, column),
        }
    }
}

pub trait SyntaxNode: Sized {
    fn kind(&self) -> &str;

    /// Byte offsets of the node in the source it was parsed from.
    fn byte_range(&self) -> Range<usize>;

    fn start_position(&self) -> Position;

    fn end_position(&self) -> Position;

    /// Named children in source order.
    fn children(&self) -> Vec<Self>;
}

impl SyntaxNode for tree_sitter::Node<'_> {
    fn kind(&self) -> &str {
        tree_sitter::Node::kind(self)
    }

    fn byte_range(&self) -> Range<usize> {
        tree_sitter::Node::byte_range(self)
    }

    fn start_position(&self) -> Position {
        let p = tree_sitter::Node::start_position(self);
        Position::new(p.row, p.column)
    }

    fn end_position(&self) -> Position {
        let p = tree_sitter::Node::end_position(self);
        Position::new(p.row, p.column)
    }

    fn children(&self) -> Vec<Self> {
        let count = u32::try_from(self.named_child_count()).unwrap_or(u32::MAX);
        (0..count).filter_map(|i| self.named_child(i)).collect()
    }
}
