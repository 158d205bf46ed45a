use simdup_core::{AstSymbol, Language, SymbolKind};
use tree_sitter::Node;

use crate::registry::{LanguageConfig, LanguageHooks, Scope};
use crate::syntax::{build_ast_symbol, named_child_text, node_text, parameter_names};

pub fn config() -> LanguageConfig {
    LanguageConfig {
        id: "typescript",
        language: Language::TypeScript,
        extensions: &["ts", "mts", "cts"],
        ts_language: tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        hooks: Box::new(TypeScriptHooks),
    }
}

pub fn tsx_config() -> LanguageConfig {
    LanguageConfig {
        id: "tsx",
        language: Language::TypeScript,
        extensions: &["tsx"],
        ts_language: tree_sitter_typescript::LANGUAGE_TSX.into(),
        hooks: Box::new(TypeScriptHooks),
    }
}

struct TypeScriptHooks;

impl LanguageHooks for TypeScriptHooks {
    fn map_node(&self, node: Node<'_>, source: &[u8], scope: Scope) -> Option<AstSymbol> {
        match node.kind() {
            "function_declaration" | "generator_function_declaration" => {
                map_callable(node, node, source, SymbolKind::Function, scope)
            }
            "method_definition" => map_callable(node, node, source, SymbolKind::Method, scope),
            "class_declaration" | "abstract_class_declaration" => {
                map_named(node, source, SymbolKind::Class, scope)
            }
            "interface_declaration" => map_named(node, source, SymbolKind::Interface, scope),
            "type_alias_declaration" | "enum_declaration" => {
                map_named(node, source, SymbolKind::Type, scope)
            }
            "variable_declarator" => map_declarator(node, source, scope),
            "import_statement" => {
                let raw = named_child_text(node, "source", source)?;
                let name = raw.trim_matches(['"', '\'', '`']).to_owned();
                Some(build_ast_symbol(node, source, name, SymbolKind::Import, scope))
            }
            _ => None,
        }
    }

    fn scope_for(&self, node: Node<'_>) -> Option<Scope> {
        match node.kind() {
            "class_declaration" | "abstract_class_declaration" | "class" => Some(Scope::Class),
            "function_declaration"
            | "generator_function_declaration"
            | "method_definition"
            | "arrow_function"
            | "function_expression" => Some(Scope::Function),
            _ => None,
        }
    }
}

fn map_named(node: Node<'_>, source: &[u8], kind: SymbolKind, scope: Scope) -> Option<AstSymbol> {
    let name = named_child_text(node, "name", source)?;
    Some(build_ast_symbol(node, source, name, kind, scope))
}

fn map_callable(
    node: Node<'_>,
    callable: Node<'_>,
    source: &[u8],
    kind: SymbolKind,
    scope: Scope,
) -> Option<AstSymbol> {
    let name = named_child_text(node, "name", source)?;
    let mut symbol = build_ast_symbol(node, source, name, kind, scope);
    symbol.parameters = callable
        .child_by_field_name("parameters")
        .map(|params| parameter_names(params, source));
    symbol.return_type = callable
        .child_by_field_name("return_type")
        .map(|annotation| {
            node_text(annotation, source)
                .trim_start_matches(':')
                .trim()
                .to_owned()
        })
        .filter(|text| !text.is_empty());
    Some(symbol)
}

fn map_declarator(node: Node<'_>, source: &[u8], scope: Scope) -> Option<AstSymbol> {
    let value = node.child_by_field_name("value");
    if let Some(value) = value
        && matches!(value.kind(), "arrow_function" | "function_expression")
    {
        return map_callable(node, value, source, SymbolKind::Function, scope);
    }

    if scope != Scope::Module {
        return None;
    }
    let name_node = node.child_by_field_name("name")?;
    if name_node.kind() != "identifier" {
        return None;
    }

    let is_const = node
        .parent()
        .and_then(|declaration| declaration.child(0))
        .map(|keyword| keyword.kind() == "const")
        .unwrap_or(false);
    let kind = if is_const {
        SymbolKind::Constant
    } else {
        SymbolKind::Variable
    };
    map_named(node, source, kind, scope)
}
