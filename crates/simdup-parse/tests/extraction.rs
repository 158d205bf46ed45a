use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use simdup_core::{DocumentSymbol, Language, Position, SourceRange, SymbolKind};
use simdup_parse::{
    DocumentSymbolSource, ExtractionStrategy, SemanticError, SemanticSourceInfo, SymbolExtractor,
};
use tempfile::tempdir;

struct FakeLanguageServer {
    loaded: bool,
    requests: AtomicUsize,
}

impl FakeLanguageServer {
    fn new(loaded: bool) -> Self {
        Self {
            loaded,
            requests: AtomicUsize::new(0),
        }
    }
}

impl DocumentSymbolSource for FakeLanguageServer {
    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn get_info(&self) -> SemanticSourceInfo {
        SemanticSourceInfo {
            name: "fake-ls".to_owned(),
            version: Some("1.0".to_owned()),
            languages: vec![Language::Python],
        }
    }

    fn request_document_symbols(
        &self,
        relative_path: &str,
    ) -> Result<Vec<DocumentSymbol>, SemanticError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if relative_path != "pkg/semantic.py" {
            return Err(SemanticError::Request {
                path: relative_path.to_owned(),
                message: "unknown document".to_owned(),
            });
        }

        Ok(vec![DocumentSymbol {
            name: "served".to_owned(),
            kind_code: 12,
            range: SourceRange {
                start: Position { line: 0, column: 0 },
                end: Position {
                    line: 1,
                    column: 12,
                },
            },
            detail: Some("served(a, b)".to_owned()),
        }])
    }
}

fn write(root: &std::path::Path, relative: &str, content: &str) -> PathBuf {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().expect("parent")).expect("create dirs");
    fs::write(&path, content).expect("write file");
    path
}

#[test]
fn malformed_and_unsupported_files_do_not_abort_the_batch() {
    let temp = tempdir().expect("tempdir");
    let root = temp.path();

    let good = write(root, "pkg/good.py", "def f(x):\n    return x + 1\n");
    let broken = write(root, "pkg/broken.py", "def broken(:\n    pass\n");
    let notes = write(root, "docs/notes.md", "# not code\n");
    let missing = root.join("pkg/missing.py");
    let script = write(
        root,
        "web/util.js",
        "function twice(v) {\n  return v * 2;\n}\n",
    );

    let mut extractor = SymbolExtractor::new(root).expect("extractor");
    let batch = extractor.extract(&[
        good.clone(),
        broken.clone(),
        notes.clone(),
        missing.clone(),
        script.clone(),
    ]);

    let read = batch
        .files
        .iter()
        .map(|file| (file.path.clone(), file.symbols.len()))
        .collect::<Vec<_>>();
    assert_eq!(read, vec![(good, 1), (broken, 0), (script, 1)]);
    let skipped = batch
        .skipped
        .iter()
        .map(|(path, _)| path.clone())
        .collect::<Vec<_>>();
    assert_eq!(skipped, vec![notes, missing]);

    let symbols = batch.into_symbols();
    let names = symbols
        .iter()
        .map(|symbol| (symbol.file_path.as_str(), symbol.name.as_str()))
        .collect::<Vec<_>>();
    assert_eq!(names, vec![("pkg/good.py", "f"), ("web/util.js", "twice")]);

    let stats = extractor.stats();
    assert_eq!(stats.files_processed, 5);
    assert_eq!(stats.files_failed, 2);
    assert_eq!(stats.syntax_tree_files, 2);
    assert_eq!(stats.regex_files, 1);
}

#[test]
fn semantic_source_is_preferred_and_falls_back_per_file() {
    let temp = tempdir().expect("tempdir");
    let root = temp.path();
    write(root, "pkg/semantic.py", "def served(a, b):\n    return a * b\n");
    write(root, "pkg/plain.py", "def plain(a):\n    return a\n");

    let server = Arc::new(FakeLanguageServer::new(true));
    let mut extractor = SymbolExtractor::new(root)
        .expect("extractor")
        .with_semantic_source(server.clone());

    let served = extractor
        .extract_file(&root.join("pkg/semantic.py"))
        .expect("semantic file");
    assert_eq!(served.len(), 1);
    assert_eq!(served[0].kind, SymbolKind::Function);
    assert_eq!(served[0].line_count, 2);
    assert_eq!(
        served[0].parameters,
        Some(vec!["a".to_owned(), "b".to_owned()])
    );

    let plain = extractor
        .extract_file(PathBuf::from("pkg/plain.py").as_path())
        .expect("fallback file");
    assert_eq!(plain.len(), 1);
    assert_eq!(plain[0].name, "plain");

    assert_eq!(server.requests.load(Ordering::SeqCst), 2);
    assert_eq!(extractor.stats().semantic_files, 1);
    assert_eq!(extractor.stats().syntax_tree_files, 1);
    assert_eq!(
        extractor.semantic_info().map(|info| info.name),
        Some("fake-ls".to_owned())
    );
}

#[test]
fn unloaded_semantic_source_is_never_queried() {
    let server = Arc::new(FakeLanguageServer::new(false));
    let mut extractor = SymbolExtractor::new("/workspace")
        .expect("extractor")
        .with_semantic_source(server.clone());

    let (symbols, strategy) = extractor
        .extract_from_source("pkg/semantic.py", "def served(a, b):\n    return a * b\n")
        .expect("syntax fallback");

    assert_eq!(strategy, ExtractionStrategy::SyntaxTree);
    assert_eq!(symbols.len(), 1);
    assert_eq!(server.requests.load(Ordering::SeqCst), 0);
}
