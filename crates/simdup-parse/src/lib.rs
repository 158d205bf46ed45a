mod error;
mod extractor;
mod fallback;
mod filter;
mod languages;
mod registry;
mod semantic;
mod syntax;

pub use error::ParseError;
pub use extractor::{
    ExtractionBatch, ExtractionStats, ExtractionStrategy, FileSymbols, SymbolExtractor,
};
pub use fallback::RegexFallback;
pub use filter::SymbolFilter;
pub use registry::{LanguageConfig, LanguageHooks, LanguageRegistry, Scope};
pub use semantic::{DocumentSymbolSource, SemanticError, SemanticSourceInfo};
pub use syntax::SyntaxExtractor;
