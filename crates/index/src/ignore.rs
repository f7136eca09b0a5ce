//! Ignore rules for indexing and path search.
//!
//! Combines built-in defaults with the workspace `.gitignore`. Lines are
//! converted to globs and compiled into a `GlobSet` where `*` never crosses
//! a `/`. Negated (`!`) lines are reported by [`IgnoreRules::globs`] but
//! never compiled: re-including a path is not supported.

use aide_core::AppResult;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Component, Path};
use walkdir::WalkDir;

/// Patterns excluded in every workspace, in `.gitignore` syntax.
pub const DEFAULT_IGNORES: &[&str] = &["*.lock", "*-lock.json", "node_modules/**/*", ".git/**/*"];

/// Compiled ignore rules for one workspace.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    globs: Vec<String>,
    matcher: GlobSet,
}

impl IgnoreRules {
    /// Defaults, the storage directory and `<workspace>/.gitignore`.
    ///
    /// A missing `.gitignore` adds nothing. An unreadable one is logged and
    /// skipped.
    pub fn load(workspace: &Path, storage_dir: &str) -> AppResult<Self> {
        let mut lines: Vec<String> = DEFAULT_IGNORES.iter().map(|s| s.to_string()).collect();
        lines.push(format!("{}/**/*", storage_dir.trim_end_matches('/')));

        let gitignore = workspace.join(".gitignore");
        match std::fs::read_to_string(&gitignore) {
            Ok(contents) => lines.extend(contents.lines().map(str::to_string)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to read {:?}: {}", gitignore, e),
        }

        Ok(Self::from_lines(lines.iter().map(String::as_str)))
    }

    /// Build rules from `.gitignore`-style lines.
    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let mut globs: Vec<String> = Vec::new();
        for line in lines {
            for glob in gitignore_line_to_globs(line) {
                if !globs.contains(&glob) {
                    globs.push(glob);
                }
            }
        }

        let mut builder = GlobSetBuilder::new();
        for glob in globs.iter().filter(|g| !g.starts_with('!')) {
            match GlobBuilder::new(glob).literal_separator(true).build() {
                Ok(compiled) => {
                    builder.add(compiled);
                }
                Err(e) => tracing::warn!("Skipping invalid ignore glob {:?}: {}", glob, e),
            }
        }

        let matcher = builder.build().unwrap_or_else(|e| {
            tracing::warn!("Failed to compile ignore globs: {}", e);
            GlobSet::empty()
        });

        Self { globs, matcher }
    }

    /// Every glob, including negated ones that are not enforced.
    pub fn globs(&self) -> &[String] {
        &self.globs
    }

    /// Whether a workspace-relative, `/`-separated path is excluded.
    pub fn is_ignored(&self, relative: &str) -> bool {
        self.matcher.is_match(relative)
    }

    /// All non-ignored files under `root` as sorted relative paths.
    ///
    /// Ignored directories are pruned rather than descended into.
    pub fn walk(&self, root: &Path) -> Vec<String> {
        let mut files: Vec<String> = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || relative_path(root, entry.path())
                        .map(|rel| !self.is_ignored(&rel))
                        .unwrap_or(false)
            })
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::debug!("Skipping unreadable path during walk: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| relative_path(root, entry.path()))
            .collect();
        files.sort();
        files
    }
}

/// Convert one `.gitignore` line into the globs it stands for.
///
/// `build` matches at any depth (`**/build`) and so do its contents
/// (`**/build/**`); `/build` and `src/build` are anchored at the root;
/// `dir/**/*` also matches `dir` itself so walks can prune it.
pub fn gitignore_line_to_globs(line: &str) -> Vec<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Vec::new();
    }

    if line.starts_with('!') {
        return vec![line.to_string()];
    }

    let pattern = line.trim_end_matches('/');
    if pattern.is_empty() {
        return Vec::new();
    }

    let anchored = pattern.starts_with('/') || pattern.contains('/');
    let pattern = pattern.trim_start_matches('/');
    let base = if anchored {
        pattern.to_string()
    } else {
        format!("**/{}", pattern)
    };

    for suffix in ["/**/*", "/**"] {
        if let Some(dir) = base.strip_suffix(suffix) {
            if dir.is_empty() || dir == "**" {
                return vec![base];
            }
            return vec![dir.to_string(), base];
        }
    }

    let contents = format!("{}/**", base);
    vec![base, contents]
}

/// `path` relative to `root`, joined with `/`. `None` when `path` is not
/// strictly inside `root`.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
