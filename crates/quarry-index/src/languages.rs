//! Language detection and tree-sitter grammar registry.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tree_sitter::{Parser, Tree};

use crate::error::{IndexError, Result};

/// Supported language with its tree-sitter grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
    Bash,
    Toml,
    Json,
    Markdown,
}

impl Lang {
    pub const ALL: [Lang; 9] = [
        Lang::Rust,
        Lang::Python,
        Lang::JavaScript,
        Lang::TypeScript,
        Lang::Go,
        Lang::Bash,
        Lang::Toml,
        Lang::Json,
        Lang::Markdown,
    ];

    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Go => "go",
            Self::Bash => "bash",
            Self::Toml => "toml",
            Self::Json => "json",
            Self::Markdown => "markdown",
        }
    }

    /// Get the tree-sitter grammar. Returns `None` if the
    /// corresponding feature is not enabled.
    #[must_use]
    pub fn grammar(self) -> Option<tree_sitter::Language> {
        match self {
            #[cfg(feature = "lang-rust")]
            Self::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            #[cfg(feature = "lang-python")]
            Self::Python => Some(tree_sitter_python::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            #[cfg(feature = "lang-go")]
            Self::Go => Some(tree_sitter_go::LANGUAGE.into()),
            #[cfg(feature = "lang-config")]
            Self::Bash => Some(tree_sitter_bash::LANGUAGE.into()),
            #[cfg(feature = "lang-config")]
            Self::Toml => Some(tree_sitter_toml_ng::LANGUAGE.into()),
            #[cfg(feature = "lang-config")]
            Self::Json => Some(tree_sitter_json::LANGUAGE.into()),
            #[cfg(feature = "lang-config")]
            Self::Markdown => Some(tree_sitter_md::LANGUAGE.into()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Declaration node kinds that become chunks. Nested matches are emitted
    /// too, so a class yields one chunk for itself and one per method.
    #[must_use]
    pub fn chunk_node_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &[
                "function_item",
                "struct_item",
                "enum_item",
                "union_item",
                "trait_item",
                "impl_item",
                "type_item",
                "const_item",
                "static_item",
                "macro_definition",
                "mod_item",
            ],
            Self::Python => &["class_definition", "function_definition"],
            Self::JavaScript => &[
                "class_declaration",
                "method_definition",
                "function_declaration",
                "generator_function_declaration",
                "field_definition",
            ],
            Self::TypeScript => &[
                "class_declaration",
                "abstract_class_declaration",
                "method_definition",
                "function_declaration",
                "interface_declaration",
                "enum_declaration",
                "type_alias_declaration",
                "public_field_definition",
            ],
            Self::Go => &[
                "function_declaration",
                "method_declaration",
                "type_declaration",
                "const_declaration",
                "var_declaration",
            ],
            Self::Bash | Self::Toml | Self::Json | Self::Markdown => &[],
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Detect language from file extension.
#[must_use]
pub fn detect_language(path: &Path) -> Option<Lang> {
    let ext = path.extension()?.to_str()?;
    match ext {
        "rs" => Some(Lang::Rust),
        "py" | "pyi" => Some(Lang::Python),
        "js" | "jsx" | "mjs" | "cjs" => Some(Lang::JavaScript),
        "ts" | "tsx" | "mts" | "cts" => Some(Lang::TypeScript),
        "go" => Some(Lang::Go),
        "sh" | "bash" | "zsh" => Some(Lang::Bash),
        "toml" => Some(Lang::Toml),
        "json" | "jsonc" => Some(Lang::Json),
        "md" | "markdown" => Some(Lang::Markdown),
        _ => None,
    }
}

/// Grammars available to the host, keyed by language.
///
/// Owned by the caller and passed explicitly; a fresh `Parser` is created per
/// parse so the registry can be shared across tasks.
#[derive(Clone, Default)]
pub struct ParserRegistry {
    grammars: HashMap<Lang, tree_sitter::Language>,
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut langs: Vec<&str> = self.grammars.keys().map(|l| l.id()).collect();
        langs.sort_unstable();
        f.debug_struct("ParserRegistry")
            .field("languages", &langs)
            .finish()
    }
}

impl ParserRegistry {
    /// Registry without any grammar; every parse fails.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry holding every grammar compiled into this build.
    #[must_use]
    pub fn with_builtin_grammars() -> Self {
        let mut registry = Self::default();
        for lang in Lang::ALL {
            if let Some(grammar) = lang.grammar() {
                registry.register(lang, grammar);
            }
        }
        registry
    }

    pub fn register(&mut self, lang: Lang, grammar: tree_sitter::Language) {
        self.grammars.insert(lang, grammar);
    }

    #[must_use]
    pub fn supports(&self, lang: Lang) -> bool {
        self.grammars.contains_key(&lang)
    }

    /// # Errors
    ///
    /// Returns [`IndexError::UnsupportedLanguage`] when no grammar is registered
    /// for `lang`, or [`IndexError::Parse`] when tree-sitter yields no tree.
    pub fn parse(&self, lang: Lang, source: &str) -> Result<Tree> {
        let grammar = self
            .grammars
            .get(&lang)
            .ok_or(IndexError::UnsupportedLanguage)?;
        let mut parser = Parser::new();
        parser
            .set_language(grammar)
            .map_err(|e| IndexError::Parse(format!("set_language failed: {e}")))?;
        parser
            .parse(source, None)
            .ok_or_else(|| IndexError::Parse(format!("no tree produced for {lang}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_language_rs() {
        assert_eq!(detect_language(Path::new("src/main.rs")), Some(Lang::Rust));
    }

    #[test]
    fn detect_language_ts_variants() {
        for ext in &["ts", "tsx", "mts", "cts"] {
            let path = format!("file.{ext}");
            assert_eq!(
                detect_language(Path::new(&path)),
                Some(Lang::TypeScript),
                "failed for .{ext}"
            );
        }
    }

    #[test]
    fn detect_language_unknown_ext_returns_none() {
        assert_eq!(detect_language(Path::new("file.xyz")), None);
        assert_eq!(detect_language(Path::new("Makefile")), None);
    }

    #[test]
    fn config_formats_have_no_chunk_kinds() {
        assert!(Lang::Toml.chunk_node_kinds().is_empty());
        assert!(Lang::Markdown.chunk_node_kinds().is_empty());
    }

    #[test]
    fn ts_kinds_cover_interfaces_and_enums() {
        let kinds = Lang::TypeScript.chunk_node_kinds();
        assert!(kinds.contains(&"interface_declaration"));
        assert!(kinds.contains(&"enum_declaration"));
        assert!(kinds.contains(&"method_definition"));
    }

    #[test]
    fn empty_registry_rejects_parse() {
        let registry = ParserRegistry::empty();
        assert!(!registry.supports(Lang::Rust));
        assert!(matches!(
            registry.parse(Lang::Rust, "fn a() {}"),
            Err(IndexError::UnsupportedLanguage)
        ));
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn builtin_registry_parses_rust() {
        let registry = ParserRegistry::with_builtin_grammars();
        assert!(registry.supports(Lang::Rust));
        let tree = registry.parse(Lang::Rust, "fn a() {}").unwrap();
        assert_eq!(tree.root_node().kind(), "source_file");
        assert!(format!("{registry:?}").contains("rust"));
    }

    #[test]
    fn lang_display_matches_id() {
        for lang in Lang::ALL {
            assert_eq!(lang.to_string(), lang.id());
        }
    }
}
