use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub type SymbolId = String;

pub const DEFAULT_SCOPE: &str = "module";
pub const CLASS_SCOPE: &str = "class";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Go,
    Rust,
    Java,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Go => "go",
            Self::Rust => "rust",
            Self::Java => "java",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "py" | "pyi" => Some(Self::Python),
            "js" | "jsx" | "mjs" | "cjs" => Some(Self::JavaScript),
            "ts" | "tsx" | "mts" | "cts" => Some(Self::TypeScript),
            "go" => Some(Self::Go),
            "rs" => Some(Self::Rust),
            "java" => Some(Self::Java),
            _ => None,
        }
    }

    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Python => &["py", "pyi"],
            Self::JavaScript => &["js", "jsx", "mjs", "cjs"],
            Self::TypeScript => &["ts", "tsx", "mts", "cts"],
            Self::Go => &["go"],
            Self::Rust => &["rs"],
            Self::Java => &["java"],
        }
    }

    pub fn all() -> &'static [Language] {
        &[
            Self::Python,
            Self::JavaScript,
            Self::TypeScript,
            Self::Go,
            Self::Rust,
            Self::Java,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Class,
    Method,
    Variable,
    Constant,
    Import,
    Interface,
    Type,
}

impl SymbolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Method => "method",
            Self::Variable => "variable",
            Self::Constant => "constant",
            Self::Import => "import",
            Self::Interface => "interface",
            Self::Type => "type",
        }
    }

    /// Maps an LSP `SymbolKind` code onto the pipeline's coarser kinds.
    pub fn from_lsp_code(code: u32) -> Option<Self> {
        match code {
            5 => Some(Self::Class),
            6 | 9 => Some(Self::Method),
            12 | 25 => Some(Self::Function),
            11 => Some(Self::Interface),
            14 | 22 => Some(Self::Constant),
            2 => Some(Self::Import),
            7 | 8 | 13 | 15..=21 => Some(Self::Variable),
            1 | 3 | 4 | 10 | 23 | 24 | 26 => Some(Self::Type),
            _ => None,
        }
    }
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SymbolKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "function" => Ok(Self::Function),
            "class" => Ok(Self::Class),
            "method" => Ok(Self::Method),
            "variable" => Ok(Self::Variable),
            "constant" => Ok(Self::Constant),
            "import" => Ok(Self::Import),
            "interface" => Ok(Self::Interface),
            "type" => Ok(Self::Type),
            other => Err(format!(
                "invalid symbol kind '{other}', expected one of: function, class, method, \
                 variable, constant, import, interface, type"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

/// Zero-based range, as reported by language servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRange {
    pub start: Position,
    pub end: Position,
}

/// One entry of a `textDocument/documentSymbol` style response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSymbol {
    pub name: String,
    pub kind_code: u32,
    pub range: SourceRange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// A symbol as produced by a syntax-tree walk, before it is tied to a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstSymbol {
    pub name: String,
    pub kind: SymbolKind,
    /// 1-based, inclusive.
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub scope: String,
    pub parameters: Option<Vec<String>>,
    pub return_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: SymbolId,
    pub name: String,
    pub kind: SymbolKind,
    pub file_path: String,
    pub line_number: usize,
    pub line_count: usize,
    pub content: String,
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    pub is_import: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("stored metadata is missing field '{0}'")]
    MissingField(&'static str),
    #[error("stored metadata field '{field}' is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl Symbol {
    pub fn new(
        name: impl Into<String>,
        kind: SymbolKind,
        file_path: &str,
        line_number: usize,
        content: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let file_path = normalize_path(file_path);
        let line_number = line_number.max(1);
        let content = content.into();
        let line_count = content.lines().count().max(1);

        Self {
            id: stable_symbol_id(&file_path, &name, line_number, kind),
            name,
            kind,
            file_path,
            line_number,
            line_count,
            content,
            scope: DEFAULT_SCOPE.to_owned(),
            parameters: None,
            return_type: None,
            is_import: kind == SymbolKind::Import,
        }
    }

    pub fn from_ast(ast: AstSymbol, file_path: &str) -> Self {
        let mut symbol = Self::new(ast.name, ast.kind, file_path, ast.start_line, ast.content);
        symbol.line_count = ast.end_line.saturating_sub(ast.start_line) + 1;
        symbol.scope = ast.scope;
        symbol.parameters = ast.parameters;
        symbol.return_type = ast.return_type;
        symbol
    }

    /// Builds a symbol from a language-server response. Unknown kind codes yield `None`.
    pub fn from_semantic_response(
        response: &DocumentSymbol,
        file_path: &str,
        source: &str,
    ) -> Option<Self> {
        let kind = SymbolKind::from_lsp_code(response.kind_code)?;
        let start = response.range.start.line;
        let end = response.range.end.line.max(start);

        let content = source
            .lines()
            .skip(start)
            .take(end - start + 1)
            .collect::<Vec<_>>()
            .join("\n");

        let mut symbol = Self::new(response.name.clone(), kind, file_path, start + 1, content);
        symbol.line_count = end - start + 1;
        if kind == SymbolKind::Method {
            symbol.scope = CLASS_SCOPE.to_owned();
        }
        if let Some(detail) = response.detail.as_deref() {
            symbol.parameters = parameters_from_signature(detail);
            symbol.return_type = return_type_from_signature(detail);
        }
        Some(symbol)
    }

    /// Rebuilds a symbol from the metadata map written by [`Symbol::to_metadata`].
    pub fn from_stored_metadata(metadata: &Map<String, Value>) -> Result<Self, MetadataError> {
        let name = required_str(metadata, "name")?;
        let file_path = required_str(metadata, "file_path")?;
        let kind = required_str(metadata, "kind")?
            .parse::<SymbolKind>()
            .map_err(|reason| MetadataError::InvalidField {
                field: "kind",
                reason,
            })?;
        let line_number = required_usize(metadata, "line_number")?;
        let content = required_str(metadata, "content")?;

        let mut symbol = Self::new(name, kind, file_path, line_number, content);
        if let Some(line_count) = metadata.get("line_count").and_then(Value::as_u64) {
            symbol.line_count = (line_count as usize).max(1);
        }
        if let Some(scope) = metadata.get("scope").and_then(Value::as_str) {
            symbol.scope = scope.to_owned();
        }
        symbol.parameters = match metadata.get("parameters") {
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect(),
            ),
            _ => None,
        };
        symbol.return_type = metadata
            .get("return_type")
            .and_then(Value::as_str)
            .map(str::to_owned);
        symbol.is_import = metadata
            .get("is_import")
            .and_then(Value::as_bool)
            .unwrap_or(kind == SymbolKind::Import);

        match metadata.get("id").and_then(Value::as_str) {
            Some(stored_id) if stored_id != symbol.id => {
                return Err(MetadataError::InvalidField {
                    field: "id",
                    reason: format!("expected {}, found {stored_id}", symbol.id),
                });
            }
            _ => {}
        }

        Ok(symbol)
    }

    pub fn to_metadata(&self) -> Map<String, Value> {
        let mut metadata = Map::new();
        metadata.insert("id".to_owned(), Value::from(self.id.clone()));
        metadata.insert("name".to_owned(), Value::from(self.name.clone()));
        metadata.insert("kind".to_owned(), Value::from(self.kind.as_str()));
        metadata.insert("file_path".to_owned(), Value::from(self.file_path.clone()));
        metadata.insert("line_number".to_owned(), Value::from(self.line_number));
        metadata.insert("line_count".to_owned(), Value::from(self.line_count));
        metadata.insert("content".to_owned(), Value::from(self.content.clone()));
        metadata.insert("content_hash".to_owned(), Value::from(self.content_hash()));
        metadata.insert("scope".to_owned(), Value::from(self.scope.clone()));
        metadata.insert("is_import".to_owned(), Value::from(self.is_import));
        if let Some(parameters) = &self.parameters {
            metadata.insert("parameters".to_owned(), Value::from(parameters.clone()));
        }
        if let Some(return_type) = &self.return_type {
            metadata.insert("return_type".to_owned(), Value::from(return_type.clone()));
        }
        metadata
    }

    pub fn content_hash(&self) -> String {
        content_hash(&self.content)
    }
}

pub fn content_hash(content: &str) -> String {
    blake3_hex(content.as_bytes())
}

pub fn stable_symbol_id(
    file_path: &str,
    name: &str,
    line_number: usize,
    kind: SymbolKind,
) -> SymbolId {
    let material = format!(
        "{}\n{}\n{}\n{}",
        normalize_path(file_path),
        name,
        line_number,
        kind.as_str(),
    );
    blake3_hex(material.as_bytes())
}

pub fn normalize_path(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    normalized
        .strip_prefix("./")
        .map(str::to_owned)
        .unwrap_or(normalized)
}

/// Pulls the comma separated parameter names out of `name(a, b: int, *rest)`.
pub fn parameters_from_signature(signature: &str) -> Option<Vec<String>> {
    let open = signature.find('(')?;
    let close = signature[open..].find(')')? + open;
    let inner = signature[open + 1..close].trim();
    if inner.is_empty() {
        return Some(Vec::new());
    }

    Some(
        inner
            .split(',')
            .map(|part| {
                part.split([':', '='])
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_owned()
            })
            .filter(|part| !part.is_empty())
            .collect(),
    )
}

fn return_type_from_signature(signature: &str) -> Option<String> {
    let (_, tail) = signature.rsplit_once("->")?;
    let tail = tail.trim().trim_end_matches(':').trim();
    (!tail.is_empty()).then(|| tail.to_owned())
}

fn required_str<'a>(
    metadata: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, MetadataError> {
    metadata
        .get(field)
        .ok_or(MetadataError::MissingField(field))?
        .as_str()
        .ok_or_else(|| MetadataError::InvalidField {
            field,
            reason: "expected a string".to_owned(),
        })
}

fn required_usize(
    metadata: &Map<String, Value>,
    field: &'static str,
) -> Result<usize, MetadataError> {
    metadata
        .get(field)
        .ok_or(MetadataError::MissingField(field))?
        .as_u64()
        .map(|value| value as usize)
        .ok_or_else(|| MetadataError::InvalidField {
            field,
            reason: "expected a non-negative integer".to_owned(),
        })
}

fn blake3_hex(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_symbol(name: &str, line: usize, content: &str) -> Symbol {
        Symbol::new(name, SymbolKind::Function, "src/app.py", line, content)
    }

    #[test]
    fn stable_symbol_id_normalizes_path_separators() {
        let unix = stable_symbol_id("src/app.py", "f", 3, SymbolKind::Function);
        let windows = stable_symbol_id("src\\app.py", "f", 3, SymbolKind::Function);
        let dotted = stable_symbol_id("./src/app.py", "f", 3, SymbolKind::Function);
        assert_eq!(unix, windows);
        assert_eq!(unix, dotted);

        let other_line = stable_symbol_id("src/app.py", "f", 4, SymbolKind::Function);
        let other_kind = stable_symbol_id("src/app.py", "f", 3, SymbolKind::Method);
        assert_ne!(unix, other_line);
        assert_ne!(unix, other_kind);
    }

    #[test]
    fn lsp_kind_codes_map_to_pipeline_kinds() {
        assert_eq!(SymbolKind::from_lsp_code(5), Some(SymbolKind::Class));
        assert_eq!(SymbolKind::from_lsp_code(6), Some(SymbolKind::Method));
        assert_eq!(SymbolKind::from_lsp_code(12), Some(SymbolKind::Function));
        assert_eq!(SymbolKind::from_lsp_code(11), Some(SymbolKind::Interface));
        assert_eq!(SymbolKind::from_lsp_code(14), Some(SymbolKind::Constant));
        assert_eq!(SymbolKind::from_lsp_code(13), Some(SymbolKind::Variable));
        assert_eq!(SymbolKind::from_lsp_code(2), Some(SymbolKind::Import));
        assert_eq!(SymbolKind::from_lsp_code(26), Some(SymbolKind::Type));
        assert_eq!(SymbolKind::from_lsp_code(99), None);
    }

    #[test]
    fn from_ast_keeps_location_and_signature() {
        let ast = AstSymbol {
            name: "area".to_owned(),
            kind: SymbolKind::Method,
            start_line: 4,
            end_line: 6,
            content: "def area(self, scale):\n    x = 1\n    return x".to_owned(),
            scope: CLASS_SCOPE.to_owned(),
            parameters: Some(vec!["self".to_owned(), "scale".to_owned()]),
            return_type: None,
        };

        let symbol = Symbol::from_ast(ast, "pkg\\shapes.py");
        assert_eq!(symbol.file_path, "pkg/shapes.py");
        assert_eq!(symbol.line_number, 4);
        assert_eq!(symbol.line_count, 3);
        assert_eq!(symbol.scope, "class");
        assert!(!symbol.is_import);
        assert_eq!(
            symbol.id,
            stable_symbol_id("pkg/shapes.py", "area", 4, SymbolKind::Method)
        );
    }

    #[test]
    fn from_semantic_response_slices_source_lines() {
        let source = "import os\n\ndef f(x, y=2) -> int:\n    return x + y\n";
        let response = DocumentSymbol {
            name: "f".to_owned(),
            kind_code: 12,
            range: SourceRange {
                start: Position { line: 2, column: 0 },
                end: Position {
                    line: 3,
                    column: 16,
                },
            },
            detail: Some("f(x, y=2) -> int".to_owned()),
        };

        let symbol =
            Symbol::from_semantic_response(&response, "mod.py", source).expect("known kind");
        assert_eq!(symbol.kind, SymbolKind::Function);
        assert_eq!(symbol.line_number, 3);
        assert_eq!(symbol.line_count, 2);
        assert_eq!(symbol.content, "def f(x, y=2) -> int:\n    return x + y");
        assert_eq!(
            symbol.parameters,
            Some(vec!["x".to_owned(), "y".to_owned()])
        );
        assert_eq!(symbol.return_type.as_deref(), Some("int"));

        let unknown = DocumentSymbol {
            kind_code: 0,
            ..response
        };
        assert!(Symbol::from_semantic_response(&unknown, "mod.py", source).is_none());
    }

    #[test]
    fn stored_metadata_round_trips_through_adapter() {
        let mut symbol = sample_symbol("f", 1, "def f(x): return x+1");
        symbol.parameters = Some(vec!["x".to_owned()]);

        let restored =
            Symbol::from_stored_metadata(&symbol.to_metadata()).expect("restore symbol");
        assert_eq!(restored, symbol);
    }

    #[test]
    fn stored_metadata_without_name_is_rejected() {
        let mut metadata = sample_symbol("f", 1, "def f(): pass").to_metadata();
        metadata.remove("name");
        assert_eq!(
            Symbol::from_stored_metadata(&metadata),
            Err(MetadataError::MissingField("name"))
        );
    }

    #[test]
    fn language_detection_uses_extension() {
        assert_eq!(Language::from_path(Path::new("a/b.py")), Some(Language::Python));
        assert_eq!(Language::from_path(Path::new("a/b.TSX")), Some(Language::TypeScript));
        assert_eq!(Language::from_path(Path::new("main.go")), Some(Language::Go));
        assert_eq!(Language::from_path(Path::new("README.md")), None);
    }
}
