//! Architectural Enforcement
//!
//! Source scanners shared by the enforcement tests in `tests/`:
//! - No sleep() calls in production code
//! - No blocking socket or file I/O inside async functions
//!
//! The scanners are line based. Everything from the first `#[cfg(test)]` in a
//! file onwards is treated as test code and skipped.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source trees, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["localpipe/core/src", "localpipe/cli/src"];

/// A rule violation at a specific line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the violation
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// What rule was broken
    pub rule: &'static str,
    /// The offending source line, trimmed
    pub code: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.rule,
            self.code
        )
    }
}

/// Workspace root, found from this crate's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// Every `.rs` file under the production trees, with its contents
///
/// # Panics
///
/// Panics if a production tree is missing, so a moved directory cannot make
/// the scan silently pass.
#[must_use]
pub fn production_sources() -> Vec<(PathBuf, String)> {
    let root = workspace_root();
    let mut sources = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        assert!(path.exists(), "production tree {} not found", path.display());

        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
                if let Ok(content) = fs::read_to_string(entry.path()) {
                    sources.push((entry.path().to_path_buf(), content));
                }
            }
        }
    }
    sources
}

/// Lines before the file's test module
#[must_use]
pub fn production_lines(content: &str) -> Vec<&str> {
    content
        .lines()
        .take_while(|line| !line.trim_start().starts_with("#[cfg(test)]"))
        .collect()
}

/// Code part of a line, without trailing `//` comments
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Whether the nearest enclosing function header above `idx` is `async`
#[must_use]
pub fn is_in_async_function(lines: &[&str], idx: usize) -> bool {
    for line in lines[..idx].iter().rev() {
        let line = code_part(line).trim();
        if line.contains("async fn ") || line.contains("async move") {
            return true;
        }
        if line.starts_with("fn ") || line.contains(" fn ") {
            return false;
        }
        if line.starts_with("mod ") || (line.starts_with("impl") && line.contains('{')) {
            return false;
        }
    }
    false
}

/// Whether a sleep at `idx` sits next to an interval-driven loop
#[must_use]
pub fn is_interval_pattern(lines: &[&str], idx: usize) -> bool {
    let before = idx.saturating_sub(20)..idx;
    let after = idx..std::cmp::min(idx + 5, lines.len());

    lines[before]
        .iter()
        .any(|line| line.contains(".tick()") || line.contains("tokio::time::interval"))
        || lines[after].iter().any(|line| line.contains(".tick()"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_tests() {
        let content = "fn a() {}\n#[cfg(test)]\nmod tests {\n    fn b() {}\n}\n";
        assert_eq!(production_lines(content), vec!["fn a() {}"]);
    }

    #[test]
    fn test_async_detection() {
        let code = vec![
            "    pub async fn start(self) -> Result<(), Error> {",
            "        let stream = std::net::TcpStream::connect(addr)?;",
            "    }",
        ];
        assert!(is_in_async_function(&code, 1));

        let sync = vec!["fn read_config_file(path: &Path) {", "    std::fs::read_to_string(path)"];
        assert!(!is_in_async_function(&sync, 1));
    }

    #[test]
    fn test_spawned_block_counts_as_async() {
        let code = vec![
            "    fn on_accept(&mut self) {",
            "        self.tasks.spawn(async move {",
            "            std::fs::read(path)",
        ];
        assert!(is_in_async_function(&code, 2));
    }

    #[test]
    fn test_interval_detection() {
        let code = vec![
            "let mut tick = tokio::time::interval(cycle);",
            "loop {",
            "    tokio::time::sleep(d).await;",
        ];
        assert!(is_interval_pattern(&code, 2));
        assert!(!is_interval_pattern(&["tokio::time::sleep(d).await;"], 0));
    }

    #[test]
    fn test_production_trees_exist() {
        assert!(!production_sources().is_empty());
    }
}
