//! Declaration-level chunk extraction over a syntax tree.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::fingerprint::{chunk_id, fingerprint};
use crate::languages::{Lang, ParserRegistry};
use crate::syntax::{Position, Span, SyntaxNode};

/// Kind given to the whole-file chunk emitted when no declaration matched.
pub const FILE_CHUNK_KIND: &str = "file";
/// Kind given to the line windows a large fallback file is split into.
pub const FILE_SEGMENT_KIND: &str = "file_segment";
/// Fallback sources of at least this many bytes are split into segments.
pub const MAX_FILE_CHUNK_BYTES: usize = 5000;
pub const SEGMENT_LINES: usize = 10;

/// One indexed fragment of a source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeChunk {
    pub id: String,
    pub file_path: String,
    pub kind: String,
    pub text: String,
    pub fingerprint: String,
    pub span: Span,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

impl CodeChunk {
    /// Build a chunk with its fingerprint and id already derived.
    #[must_use]
    pub fn new(
        file_path: impl Into<String>,
        kind: impl Into<String>,
        text: impl Into<String>,
        span: Span,
    ) -> Self {
        let mut chunk = Self {
            id: String::new(),
            file_path: file_path.into(),
            kind: kind.into(),
            text: text.into(),
            fingerprint: String::new(),
            span,
            vector: None,
        };
        chunk.ensure_identity();
        chunk
    }

    /// Fill in `fingerprint` and `id` when they are empty.
    pub fn ensure_identity(&mut self) {
        if self.fingerprint.is_empty() {
            self.fingerprint = fingerprint(&self.file_path, &self.kind, &self.text);
        }
        if self.id.is_empty() {
            self.id = chunk_id(&self.file_path, &self.fingerprint);
        }
    }

    #[must_use]
    pub fn has_vector(&self) -> bool {
        self.vector.is_some()
    }
}

/// Canonicalize line endings: `\r\n` and lone `\r` become `\n`.
#[must_use]
pub fn normalize_source(source: &str) -> Cow<'_, str> {
    if !source.contains('\r') {
        return Cow::Borrowed(source);
    }
    Cow::Owned(source.replace("\r\n", "\n").replace('\r', "\n"))
}

/// Single chunk spanning the entire source.
#[must_use]
pub fn whole_file_chunk(file_path: &str, source: &str) -> CodeChunk {
    CodeChunk::new(file_path, FILE_CHUNK_KIND, source, Span::whole(source))
}

/// Chunks for a source that yielded no declarations: a single whole-file
/// chunk, or consecutive [`SEGMENT_LINES`]-line segments once the source
/// reaches [`MAX_FILE_CHUNK_BYTES`]. Whitespace-only segments are dropped.
#[must_use]
pub fn fallback_chunks(file_path: &str, source: &str) -> Vec<CodeChunk> {
    if source.len() < MAX_FILE_CHUNK_BYTES {
        return vec![whole_file_chunk(file_path, source)];
    }

    let lines: Vec<&str> = source.split('\n').collect();
    let mut chunks = Vec::with_capacity(lines.len().div_ceil(SEGMENT_LINES));
    for (i, window) in lines.chunks(SEGMENT_LINES).enumerate() {
        let text = window.join("\n");
        if text.trim().is_empty() {
            continue;
        }
        let start_row = i * SEGMENT_LINES;
        let span = Span {
            start: Position::new(start_row, 0),
            end: Position::new(
                start_row + window.len() - 1,
                window.last().map_or(0, |line| line.len()),
            ),
        };
        chunks.push(CodeChunk::new(file_path, FILE_SEGMENT_KIND, text, span));
    }
    tracing::debug!(file = file_path, segments = chunks.len(), "large file split into segments");
    chunks
}

/// Walk `root` depth-first (pre-order) and emit a chunk for every node whose
/// kind is in `kinds`, descending into emitted nodes as well.
///
/// Nodes whose byte range does not slice `source` cleanly are skipped. When
/// nothing matches, [`fallback_chunks`] applies. Whitespace-only sources
/// produce no chunks.
pub fn extract_chunks<N: SyntaxNode>(
    root: &N,
    source: &str,
    file_path: &str,
    kinds: &[&str],
) -> Vec<CodeChunk> {
    if source.trim().is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    if kinds.contains(&root.kind()) {
        push_node(root, source, file_path, &mut chunks);
    }

    // each level is stored reversed so the next sibling is popped from the end
    let mut stack = vec![reversed(root.children())];
    while let Some(level) = stack.last_mut() {
        let Some(node) = level.pop() else {
            stack.pop();
            continue;
        };
        if kinds.contains(&node.kind()) {
            push_node(&node, source, file_path, &mut chunks);
        }
        let children = node.children();
        if !children.is_empty() {
            stack.push(reversed(children));
        }
    }

    if chunks.is_empty() {
        return fallback_chunks(file_path, source);
    }
    chunks
}

fn reversed<T>(mut items: Vec<T>) -> Vec<T> {
    items.reverse();
    items
}

fn push_node<N: SyntaxNode>(node: &N, source: &str, file_path: &str, out: &mut Vec<CodeChunk>) {
    let range = node.byte_range();
    let Some(text) = source.get(range.clone()) else {
        tracing::debug!(
            file = file_path,
            kind = node.kind(),
            ?range,
            "node range outside source, skipping"
        );
        return;
    };
    let span = Span {
        start: node.start_position(),
        end: node.end_position(),
    };
    out.push(CodeChunk::new(file_path, node.kind(), text, span));
}

/// Parse `source` with the registry and extract its chunks.
///
/// Unknown languages and parse failures degrade to [`fallback_chunks`].
#[must_use]
pub fn chunk_file(
    registry: &ParserRegistry,
    lang: Option<Lang>,
    file_path: &str,
    source: &str,
) -> Vec<CodeChunk> {
    if source.trim().is_empty() {
        return Vec::new();
    }
    let Some(lang) = lang else {
        return fallback_chunks(file_path, source);
    };
    match registry.parse(lang, source) {
        Ok(tree) => extract_chunks(&tree.root_node(), source, file_path, lang.chunk_node_kinds()),
        Err(e) => {
            tracing::warn!(file = file_path, %lang, "parse failed, indexing whole file: {e}");
            fallback_chunks(file_path, source)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::ops::Range;

    use super::*;

    #[derive(Clone)]
    struct FakeNode {
        kind: &'static str,
        range: Range<usize>,
        children: Vec<FakeNode>,
    }

    impl FakeNode {
        fn leaf(kind: &'static str, range: Range<usize>) -> Self {
            Self {
                kind,
                range,
                children: Vec::new(),
            }
        }
    }

    impl SyntaxNode for FakeNode {
        fn kind(&self) -> &str {
            self.kind
        }
        fn byte_range(&self) -> Range<usize> {
            self.range.clone()
        }
        fn start_position(&self) -> Position {
            Position::new(0, self.range.start)
        }
        fn end_position(&self) -> Position {
            Position::new(0, self.range.end)
        }
        fn children(&self) -> Vec<Self> {
            self.children.clone()
        }
    }

    #[test]
    fn normalize_line_endings() {
        assert_eq!(normalize_source("a\r\nb\rc\n"), "a\nb\nc\n");
        assert!(matches!(normalize_source("plain\n"), Cow::Borrowed(_)));
    }

    #[test]
    fn whitespace_only_source_has_no_chunks() {
        let root = FakeNode::leaf("program", 0..3);
        assert!(extract_chunks(&root, " \n\t", "a.js", &["class"]).is_empty());
        assert!(chunk_file(&ParserRegistry::empty(), None, "a.js", "  ").is_empty());
    }

    #[test]
    fn no_match_yields_single_file_chunk() {
        let source = "let x = 1;";
        let root = FakeNode::leaf("program", 0..source.len());
        let chunks = extract_chunks(&root, source, "a.js", &["class_declaration"]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, FILE_CHUNK_KIND);
        assert_eq!(chunks[0].text, source);
        assert_eq!(chunks[0].span.end, Position::new(0, source.len()));
    }

    #[test]
    fn nested_matches_emitted_in_preorder() {
        let source = "class A { m() {} n() {} }";
        let root = FakeNode {
            kind: "program",
            range: 0..source.len(),
            children: vec![FakeNode {
                kind: "class",
                range: 0..source.len(),
                children: vec![FakeNode::leaf("method", 10..16), FakeNode::leaf("method", 17..23)],
            }],
        };
        let chunks = extract_chunks(&root, source, "a.js", &["class", "method"]);
        let kinds: Vec<&str> = chunks.iter().map(|c| c.kind.as_str()).collect();
        assert_eq!(kinds, vec!["class", "method", "method"]);
        assert_eq!(chunks[1].text, "m() {}");
        assert_eq!(chunks[2].text, "n() {}");
    }

    #[test]
    fn invalid_byte_range_is_skipped() {
        let source = "é x";
        let root = FakeNode {
            kind: "program",
            range: 0..source.len(),
            children: vec![FakeNode::leaf("decl", 1..3), FakeNode::leaf("decl", 3..4), FakeNode::leaf("decl", 2..99)],
        };
        let chunks = extract_chunks(&root, source, "a", &["decl"]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "x");
    }

    #[test]
    fn wide_level_keeps_source_order() {
        let source = "abcdefghij".repeat(100);
        let children: Vec<FakeNode> = (0..1000).map(|i| FakeNode::leaf("decl", i..i + 1)).collect();
        let root = FakeNode {
            kind: "program",
            range: 0..source.len(),
            children,
        };
        let chunks = extract_chunks(&root, &source, "wide.json", &["decl"]);
        assert_eq!(chunks.len(), 1000);
        assert_eq!(chunks[0].span.start, Position::new(0, 0));
        assert_eq!(chunks[999].span.start, Position::new(0, 999));
    }

    #[test]
    fn large_fallback_is_split_into_line_segments() {
        let source: String = (0..25)
            .map(|i| format!("line {i:02} {}\n", "x".repeat(240)))
            .collect();
        assert!(source.len() >= MAX_FILE_CHUNK_BYTES);

        let chunks = chunk_file(&ParserRegistry::empty(), None, "dump.txt", &source);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.kind == FILE_SEGMENT_KIND));
        assert!(chunks[0].text.starts_with("line 00"));
        assert!(chunks[1].text.starts_with("line 10"));
        assert_eq!(chunks[1].span.start, Position::new(10, 0));
        assert_eq!(chunks[1].span.end.row, 19);
        assert_eq!(chunks[2].span.start.row, 20);

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts.join("\n"), source);
    }

    #[test]
    fn blank_segments_are_dropped() {
        let busy: String = (0..10).map(|_| format!("{}\n", "y".repeat(300))).collect();
        let source = format!("{busy}{}{busy}", "\n".repeat(10));
        let chunks = fallback_chunks("gap.txt", &source);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].span.start.row, 20);
    }

    #[test]
    fn small_fallback_stays_whole() {
        let source = "z".repeat(MAX_FILE_CHUNK_BYTES - 1);
        let chunks = fallback_chunks("small.txt", &source);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, FILE_CHUNK_KIND);
    }

    #[test]
    fn chunk_identity_is_derived() {
        let chunk = whole_file_chunk("src/a.rs", "fn a() {}");
        assert_eq!(chunk.fingerprint, fingerprint("src/a.rs", "file", "fn a() {}"));
        assert_eq!(chunk.id, chunk_id("src/a.rs", &chunk.fingerprint));
        assert!(!chunk.has_vector());
    }

    #[test]
    fn unknown_language_falls_back_to_file() {
        let chunks = chunk_file(&ParserRegistry::empty(), None, "notes.txt", "hello");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, FILE_CHUNK_KIND);
    }

    #[test]
    fn missing_grammar_falls_back_to_file() {
        let chunks = chunk_file(&ParserRegistry::empty(), Some(Lang::Rust), "a.rs", "fn a() {}");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, FILE_CHUNK_KIND);
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn rust_impl_and_methods() {
        let source = "struct Foo;\n\nimpl Foo {\n    fn bar(&self) -> i32 {\n        1\n    }\n\n    fn baz(&self) {}\n}\n";
        let registry = ParserRegistry::with_builtin_grammars();
        let chunks = chunk_file(&registry, Some(Lang::Rust), "src/foo.rs", source);
        let kinds: Vec<&str> = chunks.iter().map(|c| c.kind.as_str()).collect();
        assert_eq!(kinds, vec!["struct_item", "impl_item", "function_item", "function_item"]);
        assert!(chunks[2].text.starts_with("fn bar"));
        assert_eq!(chunks[2].span.start, Position::new(3, 4));
        assert_eq!(chunks[3].text, "fn baz(&self) {}");
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn python_class_and_methods() {
        let source = "class A:\n    def f(self):\n        return 1\n\n    def g(self):\n        return 2\n";
        let registry = ParserRegistry::with_builtin_grammars();
        let chunks = chunk_file(&registry, Some(Lang::Python), "a.py", source);
        let kinds: Vec<&str> = chunks.iter().map(|c| c.kind.as_str()).collect();
        assert_eq!(kinds, vec!["class_definition", "function_definition", "function_definition"]);
    }

    #[cfg(feature = "lang-config")]
    #[test]
    fn toml_is_whole_file() {
        let source = "[package]\nname = \"x\"\n";
        let registry = ParserRegistry::with_builtin_grammars();
        let chunks = chunk_file(&registry, Some(Lang::Toml), "Cargo.toml", source);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, FILE_CHUNK_KIND);
        assert_eq!(chunks[0].text, source);
    }

    #[cfg(feature = "lang-js")]
    #[test]
    fn javascript_function_declarations() {
        let source = "function add(a,b){return a+b;}\nfunction subtract(a,b){return a-b;}\n";
        let registry = ParserRegistry::with_builtin_grammars();
        let chunks = chunk_file(&registry, Some(Lang::JavaScript), "math.js", source);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "function add(a,b){return a+b;}");
        assert_eq!(chunks[1].span.start, Position::new(1, 0));
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn extraction_is_deterministic() {
        let source = "fn a() {}\nfn b() {}\n";
        let registry = ParserRegistry::with_builtin_grammars();
        let first = chunk_file(&registry, Some(Lang::Rust), "x.rs", source);
        let second = chunk_file(&registry, Some(Lang::Rust), "x.rs", source);
        assert_eq!(first, second);
    }
}
