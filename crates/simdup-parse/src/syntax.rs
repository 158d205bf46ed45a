use std::collections::HashMap;
use std::path::Path;

use simdup_core::{AstSymbol, Symbol, normalize_path};
use tree_sitter::{Node, Parser};

use crate::error::ParseError;
use crate::registry::{LanguageConfig, LanguageHooks, LanguageRegistry, Scope, default_registry};

/// Tree-sitter backed extraction for the languages with a registered grammar.
pub struct SyntaxExtractor {
    registry: LanguageRegistry,
    parsers: HashMap<&'static str, Parser>,
}

impl SyntaxExtractor {
    pub fn new() -> Result<Self, ParseError> {
        let registry = default_registry();
        let mut parsers = HashMap::new();

        for config in registry.configs() {
            let mut parser = Parser::new();
            parser
                .set_language(&config.ts_language)
                .map_err(|err| ParseError::Grammar {
                    language: config.id,
                    message: err.to_string(),
                })?;
            parsers.insert(config.id, parser);
        }

        Ok(Self { registry, parsers })
    }

    pub fn supports(&self, path: &Path) -> bool {
        self.registry.get_by_path(path).is_some()
    }

    pub fn extract_from_source(
        &mut self,
        file_path: &str,
        source: &str,
    ) -> Result<Vec<Symbol>, ParseError> {
        let normalized = normalize_path(file_path);
        let config_id = self
            .registry
            .get_by_path(Path::new(&normalized))
            .map(|config| config.id)
            .ok_or_else(|| ParseError::UnsupportedLanguage(normalized.clone()))?;

        extract_with_config(
            &self.registry,
            &mut self.parsers,
            &normalized,
            source,
            config_id,
        )
    }
}

fn extract_with_config(
    registry: &LanguageRegistry,
    parsers: &mut HashMap<&'static str, Parser>,
    file_path: &str,
    source: &str,
    config_id: &'static str,
) -> Result<Vec<Symbol>, ParseError> {
    let config: &LanguageConfig = registry
        .get_by_id(config_id)
        .ok_or_else(|| ParseError::UnsupportedLanguage(file_path.to_owned()))?;
    let parser = parsers
        .get_mut(config.id)
        .ok_or_else(|| ParseError::UnsupportedLanguage(file_path.to_owned()))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| ParseError::NoSyntaxTree(file_path.to_owned()))?;

    let root = tree.root_node();
    if root.has_error() {
        tracing::warn!(path = file_path, "syntax errors, extracting no symbols");
        return Ok(Vec::new());
    }

    let mut collected = Vec::new();
    walk(
        root,
        source.as_bytes(),
        config.hooks.as_ref(),
        Scope::Module,
        &mut collected,
    );

    let mut symbols = collected
        .into_iter()
        .map(|ast| Symbol::from_ast(ast, file_path))
        .collect::<Vec<_>>();
    symbols.sort_by(|a, b| {
        a.line_number
            .cmp(&b.line_number)
            .then_with(|| a.id.cmp(&b.id))
    });
    symbols.dedup_by(|a, b| a.id == b.id);
    Ok(symbols)
}

fn walk(
    node: Node<'_>,
    source: &[u8],
    hooks: &dyn LanguageHooks,
    scope: Scope,
    out: &mut Vec<AstSymbol>,
) {
    if let Some(symbol) = hooks.map_node(node, source, scope) {
        out.push(symbol);
    }

    let child_scope = hooks.scope_for(node).unwrap_or(scope);
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        walk(child, source, hooks, child_scope, out);
    }
}

pub(crate) fn node_text(node: Node<'_>, source: &[u8]) -> String {
    let start = node.start_byte();
    let end = node.end_byte();
    if start >= end || end > source.len() {
        return String::new();
    }
    String::from_utf8_lossy(&source[start..end]).into_owned()
}

pub(crate) fn named_child_text(node: Node<'_>, field: &str, source: &[u8]) -> Option<String> {
    node.child_by_field_name(field)
        .map(|child| node_text(child, source))
        .map(|text| text.trim().to_owned())
        .filter(|text| !text.is_empty())
}

/// Whole source lines covered by `node`, so the payload keeps leading indentation context.
pub(crate) fn node_lines(node: Node<'_>, source: &[u8]) -> String {
    let text = String::from_utf8_lossy(source);
    let start = node.start_position().row;
    let end = node.end_position().row;
    text.lines()
        .skip(start)
        .take(end - start + 1)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parameter names of a parameter-list node, stripped of annotations and defaults.
pub(crate) fn parameter_names(node: Node<'_>, source: &[u8]) -> Vec<String> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|child| child.kind() != "comment")
        .filter_map(|child| {
            let text = node_text(child, source);
            let name = text.split([':', '=']).next().unwrap_or_default().trim();
            (!name.is_empty() && name != "*" && name != "/").then(|| name.to_owned())
        })
        .collect()
}

pub(crate) fn build_ast_symbol(
    node: Node<'_>,
    source: &[u8],
    name: String,
    kind: simdup_core::SymbolKind,
    scope: Scope,
) -> AstSymbol {
    AstSymbol {
        name,
        kind,
        start_line: node.start_position().row + 1,
        end_line: node.end_position().row + 1,
        content: node_lines(node, source),
        scope: scope.as_str().to_owned(),
        parameters: None,
        return_type: None,
    }
}

#[cfg(test)]
mod tests {
    use simdup_core::SymbolKind;

    use super::*;

    #[test]
    fn python_functions_classes_and_methods_are_extracted() {
        let source = "\
import os
from pkg.util import helper

LIMIT = 10
counter = 0

def add(x, y: int = 2) -> int:
    return x + y

class Shape:
    def area(self, scale):
        return scale
";
        let mut extractor = SyntaxExtractor::new().expect("extractor");
        let symbols = extractor
            .extract_from_source("src/shapes.py", source)
            .expect("python extraction");

        let find = |name: &str| {
            symbols
                .iter()
                .find(|symbol| symbol.name == name)
                .unwrap_or_else(|| panic!("missing symbol {name}"))
        };

        assert_eq!(find("os").kind, SymbolKind::Import);
        assert!(find("os").is_import);
        assert_eq!(find("pkg.util").kind, SymbolKind::Import);
        assert_eq!(find("LIMIT").kind, SymbolKind::Constant);
        assert_eq!(find("counter").kind, SymbolKind::Variable);

        let add = find("add");
        assert_eq!(add.kind, SymbolKind::Function);
        assert_eq!(add.line_number, 7);
        assert_eq!(add.line_count, 2);
        assert_eq!(add.scope, "module");
        assert_eq!(
            add.parameters,
            Some(vec!["x".to_owned(), "y".to_owned()])
        );
        assert_eq!(add.return_type.as_deref(), Some("int"));

        assert_eq!(find("Shape").kind, SymbolKind::Class);
        let area = find("area");
        assert_eq!(area.kind, SymbolKind::Method);
        assert_eq!(area.scope, "class");
    }

    #[test]
    fn rust_items_are_extracted_with_impl_methods() {
        let source = "\
use std::fmt;

pub const MAX: usize = 4;

pub struct Point { x: i32 }

impl Point {
    pub fn shifted(&self, by: i32) -> i32 {
        self.x + by
    }
}

pub trait Render {
    fn render(&self) -> String;
}

fn free(a: i32) -> i32 { a }
";
        let mut extractor = SyntaxExtractor::new().expect("extractor");
        let symbols = extractor
            .extract_from_source("src/point.rs", source)
            .expect("rust extraction");

        let kind_of = |name: &str| {
            symbols
                .iter()
                .find(|symbol| symbol.name == name)
                .map(|symbol| symbol.kind)
        };

        assert_eq!(kind_of("std::fmt"), Some(SymbolKind::Import));
        assert_eq!(kind_of("MAX"), Some(SymbolKind::Constant));
        assert_eq!(kind_of("Point"), Some(SymbolKind::Class));
        assert_eq!(kind_of("shifted"), Some(SymbolKind::Method));
        assert_eq!(kind_of("Render"), Some(SymbolKind::Interface));
        assert_eq!(kind_of("render"), Some(SymbolKind::Method));
        assert_eq!(kind_of("free"), Some(SymbolKind::Function));
    }

    #[test]
    fn typescript_declarations_are_extracted() {
        let source = "\
import { x } from './x';

export function total(items: number[]): number {
  return items.length;
}

export const double = (n: number) => n * 2;

interface Shape { area(): number }

type Id = string;

class Box {
  open(force: boolean): void {}
}
";
        let mut extractor = SyntaxExtractor::new().expect("extractor");
        let symbols = extractor
            .extract_from_source("web/app.ts", source)
            .expect("typescript extraction");

        let kind_of = |name: &str| {
            symbols
                .iter()
                .find(|symbol| symbol.name == name)
                .map(|symbol| symbol.kind)
        };

        assert_eq!(kind_of("./x"), Some(SymbolKind::Import));
        assert_eq!(kind_of("total"), Some(SymbolKind::Function));
        assert_eq!(kind_of("double"), Some(SymbolKind::Function));
        assert_eq!(kind_of("Shape"), Some(SymbolKind::Interface));
        assert_eq!(kind_of("Id"), Some(SymbolKind::Type));
        assert_eq!(kind_of("Box"), Some(SymbolKind::Class));
        assert_eq!(kind_of("open"), Some(SymbolKind::Method));
    }

    #[test]
    fn malformed_source_yields_no_symbols() {
        let mut extractor = SyntaxExtractor::new().expect("extractor");
        let source = "def ok():\n    return 1\n\ndef broken(:\n    return\n";
        let symbols = extractor
            .extract_from_source("broken.py", source)
            .expect("malformed file degrades");
        assert!(symbols.is_empty());

        let symbols = extractor
            .extract_from_source("half.py", "def f(x:")
            .expect("half-edited file degrades");
        assert!(symbols.is_empty());
    }
}
