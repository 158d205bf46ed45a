use serde::Serialize;
use simdup_core::{DocumentSymbol, Language};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SemanticSourceInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub languages: Vec<Language>,
}

#[derive(Debug, Error)]
pub enum SemanticError {
    #[error("semantic source is not loaded")]
    NotLoaded,
    #[error("document symbol request for {path} failed: {message}")]
    Request { path: String, message: String },
}

/// A language-server-like capability that answers `documentSymbol` requests.
pub trait DocumentSymbolSource: Send + Sync {
    fn is_loaded(&self) -> bool;

    fn get_info(&self) -> SemanticSourceInfo;

    fn request_document_symbols(
        &self,
        relative_path: &str,
    ) -> Result<Vec<DocumentSymbol>, SemanticError>;
}
