use simdup_core::{AstSymbol, Language, SymbolKind};
use tree_sitter::Node;

use crate::registry::{LanguageConfig, LanguageHooks, Scope};
use crate::syntax::{build_ast_symbol, named_child_text, parameter_names};

pub fn config() -> LanguageConfig {
    LanguageConfig {
        id: "rust",
        language: Language::Rust,
        extensions: &["rs"],
        ts_language: tree_sitter_rust::LANGUAGE.into(),
        hooks: Box::new(RustHooks),
    }
}

struct RustHooks;

impl LanguageHooks for RustHooks {
    fn map_node(&self, node: Node<'_>, source: &[u8], scope: Scope) -> Option<AstSymbol> {
        let kind = match node.kind() {
            "function_item" | "function_signature_item" => {
                if scope == Scope::Class {
                    SymbolKind::Method
                } else {
                    SymbolKind::Function
                }
            }
            "struct_item" | "enum_item" | "union_item" => SymbolKind::Class,
            "trait_item" => SymbolKind::Interface,
            "type_item" => SymbolKind::Type,
            "const_item" | "static_item" => SymbolKind::Constant,
            "use_declaration" => {
                let name = named_child_text(node, "argument", source)?;
                return Some(build_ast_symbol(node, source, name, SymbolKind::Import, scope));
            }
            _ => return None,
        };

        let name = named_child_text(node, "name", source)?;
        let mut symbol = build_ast_symbol(node, source, name, kind, scope);
        if matches!(kind, SymbolKind::Function | SymbolKind::Method) {
            symbol.parameters = node
                .child_by_field_name("parameters")
                .map(|params| parameter_names(params, source));
            symbol.return_type = named_child_text(node, "return_type", source);
        }
        Some(symbol)
    }

    fn scope_for(&self, node: Node<'_>) -> Option<Scope> {
        match node.kind() {
            "impl_item" | "trait_item" => Some(Scope::Class),
            "function_item" | "closure_expression" => Some(Scope::Function),
            _ => None,
        }
    }
}
