use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use simdup_config::SIMDUP_DIR_NAME;
use simdup_core::{Language, normalize_path};
use simdup_parse::SymbolFilter;
use walkdir::WalkDir;

const SKIPPED_DIRS: [&str; 4] = [".git", SIMDUP_DIR_NAME, "target", "node_modules"];

/// Source files under `root` that a run should extract.
///
/// Without include patterns every file with a known language extension is
/// taken. Paths matching the filter's exclusions are dropped either way.
pub fn discover_files(
    workspace_root: &Path,
    root: &Path,
    include_patterns: Option<&[String]>,
    filter: &SymbolFilter,
) -> Result<Vec<PathBuf>, globset::Error> {
    let includes = include_patterns
        .filter(|patterns| !patterns.is_empty())
        .map(build_globset)
        .transpose()?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_skipped_dir(entry.path(), entry.file_type().is_dir()))
        .filter_map(std::result::Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = relative_path(workspace_root, path);
        let included = match &includes {
            Some(globs) => globs.is_match(&relative),
            None => Language::from_path(path).is_some(),
        };
        if included && !filter.is_excluded_path(&relative) {
            files.push(path.to_path_buf());
        }
    }

    files.sort();
    tracing::debug!(root = %root.display(), files = files.len(), "discovered source files");
    Ok(files)
}

/// Workspace-relative, forward-slash form of `path`.
pub fn relative_path(workspace_root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(workspace_root).unwrap_or(path);
    normalize_path(&relative.to_string_lossy())
}

fn is_skipped_dir(path: &Path, is_dir: bool) -> bool {
    is_dir
        && path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| SKIPPED_DIRS.contains(&name))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
        if !pattern.contains('/') {
            builder.add(Glob::new(&format!("**/{pattern}"))?);
        }
    }
    builder.build()
}
