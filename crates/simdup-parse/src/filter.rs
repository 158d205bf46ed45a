use std::collections::BTreeSet;

use globset::{Glob, GlobSet, GlobSetBuilder};
use simdup_core::{Symbol, SymbolKind, normalize_path};

use crate::error::ParseError;

/// Drops symbols that are not worth embedding.
///
/// Checks run in a fixed order: kind include-set, imports, minimum content
/// length, then path exclusions.
#[derive(Debug, Clone)]
pub struct SymbolFilter {
    include_kinds: BTreeSet<SymbolKind>,
    min_content_length: usize,
    exclusions: GlobSet,
}

impl SymbolFilter {
    pub fn new(
        include_kinds: impl IntoIterator<Item = SymbolKind>,
        min_content_length: usize,
        exclude_patterns: &[String],
    ) -> Result<Self, ParseError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in exclude_patterns {
            let pattern = pattern.trim();
            if pattern.is_empty() {
                continue;
            }
            builder.add(Glob::new(pattern)?);
            if !pattern.starts_with('/') && !pattern.starts_with("**") {
                builder.add(Glob::new(&format!("**/{pattern}"))?);
            }
        }

        Ok(Self {
            include_kinds: include_kinds.into_iter().collect(),
            min_content_length,
            exclusions: builder.build()?,
        })
    }

    pub fn is_excluded_path(&self, path: &str) -> bool {
        self.exclusions.is_match(normalize_path(path))
    }

    pub fn accepts(&self, symbol: &Symbol) -> bool {
        self.include_kinds.contains(&symbol.kind)
            && !symbol.is_import
            && symbol.content.trim().chars().count() >= self.min_content_length
            && !self.is_excluded_path(&symbol.file_path)
    }

    pub fn apply(&self, symbols: Vec<Symbol>) -> Vec<Symbol> {
        let before = symbols.len();
        let kept = symbols
            .into_iter()
            .filter(|symbol| self.accepts(symbol))
            .collect::<Vec<_>>();
        tracing::debug!(before, after = kept.len(), "filtered symbols");
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> SymbolFilter {
        SymbolFilter::new(
            [SymbolKind::Function, SymbolKind::Class, SymbolKind::Import],
            10,
            &["node_modules/*".to_owned(), "*.min.js".to_owned()],
        )
        .expect("filter")
    }

    #[test]
    fn filter_drops_kinds_imports_short_content_and_excluded_paths() {
        let keep = Symbol::new("f", SymbolKind::Function, "src/a.py", 1, "def f(x): return x+1");
        let wrong_kind = Symbol::new(
            "LIMIT",
            SymbolKind::Constant,
            "src/a.py",
            2,
            "LIMIT = 100000000",
        );
        let import = Symbol::new("os", SymbolKind::Import, "src/a.py", 3, "import os.path.join");
        let short = Symbol::new("g", SymbolKind::Function, "src/a.py", 4, "g()");
        let vendored = Symbol::new(
            "h",
            SymbolKind::Function,
            "web/node_modules/lib/index.js",
            1,
            "function h() { return 1; }",
        );
        let minified = Symbol::new(
            "k",
            SymbolKind::Function,
            "dist/app.min.js",
            1,
            "function k() { return 1; }",
        );

        let kept = filter().apply(vec![keep.clone(), wrong_kind, import, short, vendored, minified]);
        assert_eq!(kept, vec![keep]);
    }

    #[test]
    fn exclusions_match_nested_and_rooted_paths() {
        let filter = filter();
        assert!(filter.is_excluded_path("node_modules/x/y.js"));
        assert!(filter.is_excluded_path("pkg\\node_modules\\x.js"));
        assert!(!filter.is_excluded_path("src/modules/x.js"));
    }

    #[test]
    fn invalid_glob_is_rejected() {
        let err = SymbolFilter::new([SymbolKind::Function], 0, &["src/[".to_owned()])
            .expect_err("invalid glob");
        assert!(matches!(err, ParseError::InvalidPattern(_)));
    }
}
