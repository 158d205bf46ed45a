use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported file extension: {0}")]
    UnsupportedLanguage(String),
    #[error("failed to load {language} tree-sitter grammar: {message}")]
    Grammar {
        language: &'static str,
        message: String,
    },
    #[error("tree-sitter parser produced no syntax tree for {0}")]
    NoSyntaxTree(String),
    #[error("invalid exclusion pattern: {0}")]
    InvalidPattern(#[from] globset::Error),
    #[error("invalid fallback pattern: {0}")]
    InvalidRegex(#[from] regex::Error),
}
