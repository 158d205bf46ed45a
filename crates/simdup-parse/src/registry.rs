use std::collections::HashMap;
use std::path::Path;

use simdup_core::{AstSymbol, Language};
use tree_sitter::Node;

use crate::languages;

/// Lexical container a node sits in while the syntax tree is walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Module,
    Class,
    Function,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::Class => "class",
            Self::Function => "function",
        }
    }
}

pub struct LanguageConfig {
    pub id: &'static str,
    pub language: Language,
    pub extensions: &'static [&'static str],
    pub ts_language: tree_sitter::Language,
    pub hooks: Box<dyn LanguageHooks>,
}

pub trait LanguageHooks: Send + Sync {
    /// Turns a node into a symbol when it declares one.
    fn map_node(&self, node: Node<'_>, source: &[u8], scope: Scope) -> Option<AstSymbol>;

    /// Scope that children of `node` are walked in, when `node` opens one.
    fn scope_for(&self, _node: Node<'_>) -> Option<Scope> {
        None
    }
}

pub struct LanguageRegistry {
    configs: Vec<LanguageConfig>,
    extension_index: HashMap<String, usize>,
}

impl LanguageRegistry {
    pub fn new() -> Self {
        Self {
            configs: Vec::new(),
            extension_index: HashMap::new(),
        }
    }

    pub fn register(&mut self, config: LanguageConfig) {
        let index = self.configs.len();
        for ext in config.extensions {
            let normalized = normalize_extension(ext);
            self.extension_index.entry(normalized).or_insert(index);
        }
        self.configs.push(config);
    }

    pub fn get_by_extension(&self, extension: &str) -> Option<&LanguageConfig> {
        let normalized = normalize_extension(extension);
        let index = *self.extension_index.get(&normalized)?;
        self.configs.get(index)
    }

    pub fn get_by_path(&self, path: &Path) -> Option<&LanguageConfig> {
        let ext = path.extension()?.to_string_lossy();
        self.get_by_extension(&ext)
    }

    pub fn get_by_id(&self, id: &str) -> Option<&LanguageConfig> {
        self.configs.iter().find(|config| config.id == id)
    }

    pub fn configs(&self) -> &[LanguageConfig] {
        &self.configs
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        default_registry()
    }
}

pub fn default_registry() -> LanguageRegistry {
    let mut registry = LanguageRegistry::new();
    registry.register(languages::python::config());
    registry.register(languages::rust::config());
    registry.register(languages::typescript::config());
    registry.register(languages::typescript::tsx_config());
    registry
}

fn normalize_extension(extension: &str) -> String {
    extension
        .trim_start_matches('.')
        .trim()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_resolves_extensions_case_insensitively() {
        let registry = default_registry();
        assert_eq!(
            registry.get_by_extension(".PY").map(|config| config.id),
            Some("python")
        );
        assert_eq!(
            registry
                .get_by_path(Path::new("web/app.tsx"))
                .map(|config| config.id),
            Some("tsx")
        );
        assert!(registry.get_by_path(Path::new("main.go")).is_none());
        assert!(registry.get_by_id("rust").is_some());
    }
}
