use simdup_core::{AstSymbol, Language, SymbolKind};
use tree_sitter::Node;

use crate::registry::{LanguageConfig, LanguageHooks, Scope};
use crate::syntax::{build_ast_symbol, named_child_text, parameter_names};

pub fn config() -> LanguageConfig {
    LanguageConfig {
        id: "python",
        language: Language::Python,
        extensions: &["py", "pyi"],
        ts_language: tree_sitter_python::LANGUAGE.into(),
        hooks: Box::new(PythonHooks),
    }
}

struct PythonHooks;

impl LanguageHooks for PythonHooks {
    fn map_node(&self, node: Node<'_>, source: &[u8], scope: Scope) -> Option<AstSymbol> {
        match node.kind() {
            "function_definition" => {
                let name = named_child_text(node, "name", source)?;
                let kind = if scope == Scope::Class {
                    SymbolKind::Method
                } else {
                    SymbolKind::Function
                };
                let mut symbol = build_ast_symbol(node, source, name, kind, scope);
                symbol.parameters = node
                    .child_by_field_name("parameters")
                    .map(|params| parameter_names(params, source));
                symbol.return_type = named_child_text(node, "return_type", source);
                Some(symbol)
            }
            "class_definition" => {
                let name = named_child_text(node, "name", source)?;
                Some(build_ast_symbol(node, source, name, SymbolKind::Class, scope))
            }
            "import_statement" => {
                let name = named_child_text(node, "name", source)?;
                Some(build_ast_symbol(node, source, name, SymbolKind::Import, scope))
            }
            "import_from_statement" => {
                let name = named_child_text(node, "module_name", source)?;
                Some(build_ast_symbol(node, source, name, SymbolKind::Import, scope))
            }
            "expression_statement" if scope == Scope::Module => {
                map_module_assignment(node, source, scope)
            }
            _ => None,
        }
    }

    fn scope_for(&self, node: Node<'_>) -> Option<Scope> {
        match node.kind() {
            "class_definition" => Some(Scope::Class),
            "function_definition" | "lambda" => Some(Scope::Function),
            _ => None,
        }
    }
}

fn map_module_assignment(node: Node<'_>, source: &[u8], scope: Scope) -> Option<AstSymbol> {
    let assignment = node.named_child(0)?;
    if assignment.kind() != "assignment" {
        return None;
    }
    let left = assignment.child_by_field_name("left")?;
    if left.kind() != "identifier" {
        return None;
    }

    let name = named_child_text(assignment, "left", source)?;
    let kind = if is_constant_name(&name) {
        SymbolKind::Constant
    } else {
        SymbolKind::Variable
    };
    Some(build_ast_symbol(node, source, name, kind, scope))
}

fn is_constant_name(name: &str) -> bool {
    name.chars().any(|ch| ch.is_ascii_alphabetic())
        && name
            .chars()
            .all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit() || ch == '_')
}

#[cfg(test)]
mod tests {
    use super::is_constant_name;

    #[test]
    fn constant_names_are_upper_snake_case() {
        assert!(is_constant_name("MAX_RETRIES"));
        assert!(is_constant_name("V2"));
        assert!(!is_constant_name("max_retries"));
        assert!(!is_constant_name("__"));
    }
}
