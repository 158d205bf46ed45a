use std::collections::HashMap;

use regex::Regex;
use simdup_core::{
    AstSymbol, CLASS_SCOPE, DEFAULT_SCOPE, Language, Symbol, SymbolKind, parameters_from_signature,
};

use crate::error::ParseError;

const MAX_BLOCK_LINES: usize = 400;

const CONTROL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "new", "else", "do", "try",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamStyle {
    /// `name: type` or `name = default`
    NameFirst,
    /// `Type name`
    NameLast,
}

struct LanguagePatterns {
    definitions: Vec<(Regex, SymbolKind)>,
    class_line: Regex,
    imports: Regex,
    param_style: ParamStyle,
}

/// Line-oriented regex extraction for languages without a registered grammar.
pub struct RegexFallback {
    languages: HashMap<Language, LanguagePatterns>,
}

impl RegexFallback {
    pub fn new() -> Result<Self, ParseError> {
        let mut languages = HashMap::new();

        languages.insert(
            Language::JavaScript,
            LanguagePatterns {
                definitions: vec![
                    (
                        Regex::new(r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s+(\w+)\s*\(")?,
                        SymbolKind::Function,
                    ),
                    (
                        Regex::new(r"^\s*(?:export\s+)?(?:const|let|var)\s+(\w+)\s*=\s*(?:async\s+)?(?:\([^)]*\)|\w+)\s*=>")?,
                        SymbolKind::Function,
                    ),
                    (
                        Regex::new(r"^\s*(?:export\s+)?(?:default\s+)?class\s+(\w+)")?,
                        SymbolKind::Class,
                    ),
                ],
                class_line: Regex::new(r"^\s*(?:export\s+)?(?:default\s+)?class\s+\w+")?,
                imports: Regex::new(
                    r#"(?:import\s+.*?from\s+['"]([^'"]+)['"]|require\(['"]([^'"]+)['"]\))"#,
                )?,
                param_style: ParamStyle::NameFirst,
            },
        );

        languages.insert(
            Language::Go,
            LanguagePatterns {
                definitions: vec![
                    (
                        Regex::new(r"^\s*func\s+(?:\(\w+\s+\*?\w+\)\s+)?(\w+)\s*\(")?,
                        SymbolKind::Function,
                    ),
                    (
                        Regex::new(r"^\s*type\s+(\w+)\s+struct")?,
                        SymbolKind::Type,
                    ),
                    (
                        Regex::new(r"^\s*type\s+(\w+)\s+interface")?,
                        SymbolKind::Interface,
                    ),
                ],
                class_line: Regex::new(r"^\s*type\s+\w+\s+struct")?,
                imports: Regex::new(r#"^\s*(?:import\s+)?(?:\w+\s+)?"([^"]+)"\s*$"#)?,
                param_style: ParamStyle::NameFirst,
            },
        );

        languages.insert(
            Language::Java,
            LanguagePatterns {
                definitions: vec![
                    (
                        Regex::new(r"^\s*(?:public|private|protected)?\s*(?:static\s+)?(?:final\s+)?(?:abstract\s+)?class\s+(\w+)")?,
                        SymbolKind::Class,
                    ),
                    (
                        Regex::new(r"^\s*(?:public|private|protected)?\s*interface\s+(\w+)")?,
                        SymbolKind::Interface,
                    ),
                    (
                        Regex::new(r"^\s*(?:public|private|protected)?\s*(?:static\s+)?(?:final\s+)?(?:synchronized\s+)?(?:[\w<>\[\],]+\s+)+(\w+)\s*\([^)]*\)\s*(?:throws\s+[\w,\s]+)?\s*\{")?,
                        SymbolKind::Function,
                    ),
                ],
                class_line: Regex::new(r"^\s*(?:public|private|protected)?\s*(?:static\s+)?(?:final\s+)?(?:abstract\s+)?class\s+\w+")?,
                imports: Regex::new(r"^\s*import\s+(?:static\s+)?([^;]+);")?,
                param_style: ParamStyle::NameLast,
            },
        );

        Ok(Self { languages })
    }

    pub fn supports(&self, language: Language) -> bool {
        self.languages.contains_key(&language)
    }

    pub fn extract(&self, language: Language, file_path: &str, source: &str) -> Vec<Symbol> {
        let Some(patterns) = self.languages.get(&language) else {
            return Vec::new();
        };

        let lines = source.lines().collect::<Vec<_>>();
        let mut symbols = Vec::new();

        for (index, line) in lines.iter().enumerate() {
            if let Some(captures) = patterns.imports.captures(line)
                && let Some(target) = captures.iter().skip(1).flatten().next()
            {
                symbols.push(Symbol::from_ast(
                    AstSymbol {
                        name: target.as_str().trim().to_owned(),
                        kind: SymbolKind::Import,
                        start_line: index + 1,
                        end_line: index + 1,
                        content: line.trim().to_owned(),
                        scope: DEFAULT_SCOPE.to_owned(),
                        parameters: None,
                        return_type: None,
                    },
                    file_path,
                ));
                continue;
            }

            for (pattern, kind) in &patterns.definitions {
                let Some(capture) = pattern.captures(line).and_then(|captures| captures.get(1))
                else {
                    continue;
                };
                let name = capture.as_str().to_owned();
                if CONTROL_KEYWORDS.contains(&name.as_str()) {
                    continue;
                }

                let scope = infer_scope(&lines, index, &patterns.class_line);
                let kind = if *kind == SymbolKind::Function && scope == CLASS_SCOPE {
                    SymbolKind::Method
                } else {
                    *kind
                };
                let end = block_end(&lines, index);
                let parameters = matches!(kind, SymbolKind::Function | SymbolKind::Method)
                    .then(|| parameters_from_signature(&line[capture.end()..]))
                    .flatten()
                    .map(|params| {
                        params
                            .iter()
                            .filter_map(|param| param_name(param, patterns.param_style))
                            .collect()
                    });

                symbols.push(Symbol::from_ast(
                    AstSymbol {
                        name,
                        kind,
                        start_line: index + 1,
                        end_line: end + 1,
                        content: lines[index..=end].join("\n"),
                        scope: scope.to_owned(),
                        parameters,
                        return_type: None,
                    },
                    file_path,
                ));
                break;
            }
        }

        symbols
    }
}

/// `class` when a less indented class header encloses `index`, otherwise `module`.
fn infer_scope(lines: &[&str], index: usize, class_line: &Regex) -> &'static str {
    let indent = indentation(lines[index]);
    if indent == 0 {
        return DEFAULT_SCOPE;
    }

    for line in lines[..index].iter().rev() {
        if line.trim().is_empty() {
            continue;
        }
        let candidate = indentation(line);
        if candidate < indent {
            if class_line.is_match(line) {
                return CLASS_SCOPE;
            }
            if candidate == 0 {
                break;
            }
        }
    }
    DEFAULT_SCOPE
}

fn indentation(line: &str) -> usize {
    line.chars().take_while(|ch| ch.is_whitespace()).count()
}

/// Last line of the brace-delimited block opened on `start`, or `start` itself.
fn block_end(lines: &[&str], start: usize) -> usize {
    let mut depth: i64 = 0;
    let mut opened = false;

    for (offset, line) in lines[start..].iter().enumerate().take(MAX_BLOCK_LINES) {
        let opens = line.matches('{').count() as i64;
        let closes = line.matches('}').count() as i64;
        depth += opens - closes;
        if opens > 0 {
            opened = true;
        }
        if opened && depth <= 0 {
            return start + offset;
        }
        if !opened && (offset >= 1 || line.trim_end().ends_with(';')) {
            return start;
        }
    }

    if opened {
        (start + MAX_BLOCK_LINES - 1).min(lines.len() - 1)
    } else {
        start
    }
}

fn param_name(raw: &str, style: ParamStyle) -> Option<String> {
    let mut tokens = raw.split_whitespace();
    let name = match style {
        ParamStyle::NameFirst => tokens.next(),
        ParamStyle::NameLast => tokens.last(),
    }?;
    let name = name.trim_start_matches("...").trim();
    (!name.is_empty()).then(|| name.to_owned())
}
