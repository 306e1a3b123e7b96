//! Filesystem and text helpers for indexing passes: repository discovery,
//! module naming, and content hashing.

use std::path::Path;

use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};

use crate::errors::GraphResult;

/// Hex characters kept from a SHA-256 digest.
pub const HASH_LEN: usize = 16;

const IMPLICIT_IGNORED_DIRS: &[&str] = &[".git", ".codegraph"];

/// Walk `root` and return every `.py` file as a sorted, `/`-separated
/// relative path. Honours `.gitignore` plus `exclude_patterns` globs.
pub fn discover_python_files(root: &Path, exclude_patterns: &[String]) -> GraphResult<Vec<String>> {
    let mut overrides = OverrideBuilder::new(root);
    for dir in IMPLICIT_IGNORED_DIRS {
        overrides.add(&format!("!**/{dir}/**"))?;
    }
    for pattern in exclude_patterns {
        overrides.add(&format!("!{pattern}"))?;
    }

    let walker = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .require_git(false)
        .overrides(overrides.build()?)
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("py") {
            continue;
        }
        if let Ok(rel) = path.strip_prefix(root) {
            files.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    files.sort();
    Ok(files)
}

/// Dotted module path for a repository-relative file path.
///
/// `pkg/sub/mod.py` -> `pkg.sub.mod`; `pkg/__init__.py` -> `pkg`.
pub fn path_to_module(rel_path: &str) -> String {
    let normalized = rel_path.replace('\\', "/");
    let stem = normalized.strip_suffix(".py").unwrap_or(&normalized);
    let stem = stem.strip_suffix("/__init__").unwrap_or(stem);
    stem.replace('/', ".").trim_matches('.').to_string()
}

/// Whether the file is a package initializer.
pub fn is_package_init(rel_path: &str) -> bool {
    rel_path.replace('\\', "/").rsplit('/').next() == Some("__init__.py")
}

/// Remove the common leading whitespace from every non-blank line.
/// Whitespace-only lines are emptied.
pub fn dedent(text: &str) -> String {
    let margin = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    text.lines()
        .map(|l| {
            if l.trim().is_empty() {
                ""
            } else {
                l.get(margin..).unwrap_or(l.trim_start())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fingerprint of a source span: dedented, trailing whitespace dropped per
/// line, outer blank lines trimmed, SHA-256, first [`HASH_LEN`] hex chars.
pub fn content_hash(text: &str) -> String {
    let dedented = dedent(text);
    let normalized = dedented
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    short_sha256(normalized.trim())
}

/// First [`HASH_LEN`] hex chars of SHA-256 over `text`.
pub fn short_sha256(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..HASH_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_to_module() {
        assert_eq!(path_to_module("pkg/sub/mod.py"), "pkg.sub.mod");
        assert_eq!(path_to_module("pkg/__init__.py"), "pkg");
        assert_eq!(path_to_module("top.py"), "top");
        assert_eq!(path_to_module("pkg\\win.py"), "pkg.win");
    }

    #[test]
    fn test_is_package_init() {
        assert!(is_package_init("pkg/__init__.py"));
        assert!(is_package_init("__init__.py"));
        assert!(!is_package_init("pkg/not__init__.py"));
    }

    #[test]
    fn test_dedent() {
        let text = "    def f():\n        return 1\n\n    # end";
        assert_eq!(dedent(text), "def f():\n    return 1\n\n# end");
    }

    #[test]
    fn test_content_hash_ignores_indentation_and_trailing_whitespace() {
        let top = "def f(x):\n    return x + 1\n";
        let nested = "    def f(x):   \n        return x + 1\n\n";
        assert_eq!(content_hash(top), content_hash(nested));
        assert_eq!(content_hash(top).len(), HASH_LEN);
    }

    #[test]
    fn test_content_hash_sees_real_edits() {
        let a = "@retry(3)\ndef f():\n    pass";
        let b = "@retry(4)\ndef f():\n    pass";
        assert_ne!(content_hash(a), content_hash(b));
    }

    #[test]
    fn test_discover_python_files_respects_ignores() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("pkg")).unwrap();
        std::fs::create_dir_all(root.join("build")).unwrap();
        std::fs::create_dir_all(root.join("venv/lib")).unwrap();
        std::fs::write(root.join("pkg/__init__.py"), "").unwrap();
        std::fs::write(root.join("pkg/a.py"), "x = 1\n").unwrap();
        std::fs::write(root.join("pkg/notes.txt"), "hi").unwrap();
        std::fs::write(root.join("build/gen.py"), "y = 2\n").unwrap();
        std::fs::write(root.join("venv/lib/site.py"), "z = 3\n").unwrap();
        std::fs::write(root.join(".gitignore"), "build/\n").unwrap();

        let files = discover_python_files(root, &["**/venv/**".to_string()]).unwrap();
        assert_eq!(files, vec!["pkg/__init__.py", "pkg/a.py"]);
    }
}
