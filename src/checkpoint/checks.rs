//! Built-in quality checks.
//!
//! These are deliberately simple pattern scans. Each one walks the project
//! with `ignore`, so anything excluded by `.gitignore` or hidden is skipped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use ignore::WalkBuilder;
use regex::Regex;
use tracing::warn;

use super::orchestrator::{CheckContext, CheckError, QualityCheck};
use super::Issue;
use crate::config::CheckpointConfig;

const SOURCE_EXTENSIONS: [&str; 14] = [
    "rs", "ts", "tsx", "js", "jsx", "mjs", "py", "go", "java", "kt", "rb", "php", "swift", "cs",
];

/// Instantiate the checks named in the configuration, in order.
pub fn build_checks(config: &CheckpointConfig) -> Vec<Arc<dyn QualityCheck>> {
    let mut checks: Vec<Arc<dyn QualityCheck>> = Vec::new();
    for name in &config.enabled_checks {
        match name.as_str() {
            CodeSmellCheck::NAME => checks.push(Arc::new(CodeSmellCheck::new(config.max_file_lines))),
            SecretPatternCheck::NAME => checks.push(Arc::new(SecretPatternCheck::new())),
            BundleSizeCheck::NAME => checks.push(Arc::new(BundleSizeCheck::new(
                config.bundle_dirs.clone(),
                config.bundle_warn_kib,
            ))),
            unknown => warn!(check = unknown, "unknown check in configuration, ignored"),
        }
    }
    checks
}

fn source_files(root: &Path) -> Result<Vec<PathBuf>, CheckError> {
    let mut files = Vec::new();
    for entry in WalkBuilder::new(root).require_git(false).build() {
        let entry = entry?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let is_source = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext));
        if is_source {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Source text, or `None` for files that are not UTF-8.
fn read_source(path: &Path) -> Result<Option<String>, CheckError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == io::ErrorKind::InvalidData => Ok(None),
        Err(err) => Err(CheckError::Io(err)),
    }
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}

async fn blocking<F>(scan: F) -> Result<Vec<Issue>, CheckError>
where
    F: FnOnce() -> Result<Vec<Issue>, CheckError> + Send + 'static,
{
    tokio::task::spawn_blocking(scan)
        .await
        .map_err(|err| CheckError::Failed(format!("scan task failed: {}", err)))?
}

// ============================================================================
// Code smells
// ============================================================================

/// Oversized files, leftover debug output and unresolved markers.
#[derive(Clone)]
pub struct CodeSmellCheck {
    max_file_lines: usize,
    debug_output: Regex,
    marker: Regex,
}

impl CodeSmellCheck {
    pub const NAME: &'static str = "code_smells";

    pub fn new(max_file_lines: usize) -> Self {
        Self {
            max_file_lines,
            debug_output: Regex::new(r"\bconsole\.log\(|\bdbg!\(|^\s*debugger;|\bprint_r\(|\bvar_dump\(")
                .expect("valid debug output regex"),
            marker: Regex::new(r"\b(TODO|FIXME|HACK|XXX)\b").expect("valid marker regex"),
        }
    }

    fn scan_file(&self, file: &str, content: &str) -> Vec<Issue> {
        let mut issues = Vec::new();
        let line_count = content.lines().count();
        if self.max_file_lines > 0 && line_count > self.max_file_lines {
            issues.push(
                Issue::warning(format!(
                    "file has {} lines (limit {})",
                    line_count, self.max_file_lines
                ))
                .with_file(file)
                .with_suggestion("Split the file into smaller modules"),
            );
        }

        let mut markers = 0usize;
        for (number, line) in content.lines().enumerate() {
            if self.debug_output.is_match(line) {
                issues.push(
                    Issue::warning("leftover debug output")
                        .with_file(file)
                        .with_line(number as u32 + 1)
                        .with_suggestion("Remove debug statements or use the project logger"),
                );
            }
            if self.marker.is_match(line) {
                markers += 1;
            }
        }
        if markers > 0 {
            issues.push(Issue::info(format!("{} unresolved marker comment(s)", markers)).with_file(file));
        }
        issues
    }

    fn scan(&self, root: &Path) -> Result<Vec<Issue>, CheckError> {
        let mut issues = Vec::new();
        for path in source_files(root)? {
            if let Some(content) = read_source(&path)? {
                issues.extend(self.scan_file(&relative(root, &path), &content));
            }
        }
        Ok(issues)
    }
}

#[async_trait]
impl QualityCheck for CodeSmellCheck {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, ctx: &CheckContext) -> Result<Vec<Issue>, CheckError> {
        let check = self.clone();
        let root = ctx.project_root.clone();
        blocking(move || check.scan(&root)).await
    }
}

// ============================================================================
// Secrets
// ============================================================================

/// Credentials committed to source.
#[derive(Clone)]
pub struct SecretPatternCheck {
    patterns: Vec<(&'static str, Regex)>,
}

impl SecretPatternCheck {
    pub const NAME: &'static str = "secrets";

    pub fn new() -> Self {
        let table: [(&'static str, &str); 5] = [
            ("AWS access key id", r"\bAKIA[0-9A-Z]{16}\b"),
            (
                "private key",
                r"-----BEGIN (?:RSA |EC |DSA |OPENSSH )?PRIVATE KEY-----",
            ),
            ("Stripe live key", r"\b[sr]k_live_[0-9A-Za-z]{16,}\b"),
            ("GitHub token", r"\bgh[pousr]_[0-9A-Za-z]{36,}\b"),
            (
                "hard-coded credential",
                r#"(?i)\b(?:api[_-]?key|secret|password|passwd|token)\b\s*[:=]\s*["'][^"'\s]{8,}["']"#,
            ),
        ];
        Self {
            patterns: table
                .into_iter()
                .filter_map(|(label, pattern)| Regex::new(pattern).ok().map(|re| (label, re)))
                .collect(),
        }
    }

    fn scan_file(&self, file: &str, content: &str) -> Vec<Issue> {
        let mut issues = Vec::new();
        for (number, line) in content.lines().enumerate() {
            if let Some((label, _)) = self.patterns.iter().find(|(_, re)| re.is_match(line)) {
                issues.push(
                    Issue::critical(format!("possible {} in source", label))
                        .with_file(file)
                        .with_line(number as u32 + 1)
                        .with_suggestion("Move the value to the environment and rotate it"),
                );
            }
        }
        issues
    }

    fn scan(&self, root: &Path) -> Result<Vec<Issue>, CheckError> {
        let mut issues = Vec::new();
        for path in source_files(root)? {
            if let Some(content) = read_source(&path)? {
                issues.extend(self.scan_file(&relative(root, &path), &content));
            }
        }
        Ok(issues)
    }
}

impl Default for SecretPatternCheck {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QualityCheck for SecretPatternCheck {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, ctx: &CheckContext) -> Result<Vec<Issue>, CheckError> {
        let check = self.clone();
        let root = ctx.project_root.clone();
        blocking(move || check.scan(&root)).await
    }
}

// ============================================================================
// Bundle size
// ============================================================================

/// Estimated size of build output directories.
pub struct BundleSizeCheck {
    dirs: Vec<String>,
    warn_kib: u64,
}

impl BundleSizeCheck {
    pub const NAME: &'static str = "bundle_size";

    pub fn new(dirs: Vec<String>, warn_kib: u64) -> Self {
        Self { dirs, warn_kib }
    }

    fn dir_size(dir: &Path) -> Result<u64, CheckError> {
        let mut total = 0;
        // Build output is usually gitignored, so walk it without filters.
        for entry in WalkBuilder::new(dir).standard_filters(false).build() {
            let entry = entry?;
            if entry.file_type().is_some_and(|t| t.is_file()) {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }

    fn scan(dirs: &[String], warn_kib: u64, root: &Path) -> Result<Vec<Issue>, CheckError> {
        let mut issues = Vec::new();
        let mut found = false;
        for name in dirs {
            let dir = root.join(name);
            if !dir.is_dir() {
                continue;
            }
            found = true;
            let kib = Self::dir_size(&dir)? / 1024;
            if warn_kib > 0 && kib > warn_kib.saturating_mul(2) {
                issues.push(
                    Issue::critical(format!("bundle is {} KiB, more than twice the {} KiB budget", kib, warn_kib))
                        .with_file(name.clone())
                        .with_suggestion("Split the bundle or drop unused dependencies"),
                );
            } else if warn_kib > 0 && kib > warn_kib {
                issues.push(
                    Issue::warning(format!("bundle is {} KiB (budget {} KiB)", kib, warn_kib))
                        .with_file(name.clone()),
                );
            } else {
                issues.push(Issue::info(format!("bundle is {} KiB", kib)).with_file(name.clone()));
            }
        }
        if !found {
            issues.push(Issue::info("no build output found"));
        }
        Ok(issues)
    }
}

#[async_trait]
impl QualityCheck for BundleSizeCheck {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, ctx: &CheckContext) -> Result<Vec<Issue>, CheckError> {
        let dirs = self.dirs.clone();
        let warn_kib = self.warn_kib;
        let root = ctx.project_root.clone();
        blocking(move || Self::scan(&dirs, warn_kib, &root)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Severity;
    use tempfile::TempDir;

    fn ctx(root: &Path) -> CheckContext {
        CheckContext {
            project_root: root.to_path_buf(),
            sequence: 1,
            features_completed: 1,
        }
    }

    #[test]
    fn test_build_checks_ignores_unknown_names() {
        let config = CheckpointConfig {
            enabled_checks: vec![
                "secrets".to_string(),
                "design_review".to_string(),
                "code_smells".to_string(),
            ],
            ..CheckpointConfig::default()
        };
        let names: Vec<String> = build_checks(&config)
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(names, vec!["secrets", "code_smells"]);
    }

    #[test]
    fn test_code_smells_in_file() {
        let check = CodeSmellCheck::new(3);
        let issues = check.scan_file(
            "app.js",
            "// TODO tidy\nconsole.log(user);\nconst a = 1;\nconst b = 2;\n",
        );
        assert!(issues
            .iter()
            .any(|i| i.severity == Severity::Warning && i.message.contains("4 lines")));
        assert!(issues
            .iter()
            .any(|i| i.message == "leftover debug output" && i.line == Some(2)));
        assert!(issues.iter().any(|i| i.severity == Severity::Info));
    }

    #[test]
    fn test_secret_patterns() {
        let check = SecretPatternCheck::new();
        let issues = check.scan_file(
            "src/config.ts",
            "const key = process.env.KEY;\nconst password = \"hunter2hunter2\";\n",
        );
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Critical);
        assert_eq!(issues[0].line, Some(2));
        assert_eq!(issues[0].file.as_deref(), Some("src/config.ts"));
    }

    #[tokio::test]
    async fn test_secret_check_walks_project() {
        let temp_dir = TempDir::new().expect("temp dir");
        let src = temp_dir.path().join("src");
        fs::create_dir_all(&src).expect("mkdir");
        fs::write(src.join("billing.py"), "STRIPE = 'sk_live_abcdefghijklmnop1234'\n").expect("write");
        fs::write(src.join("notes.txt"), "sk_live_abcdefghijklmnop1234\n").expect("write");

        let issues = SecretPatternCheck::new()
            .run(&ctx(temp_dir.path()))
            .await
            .expect("run");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].file.as_deref(), Some("src/billing.py"));
    }

    #[tokio::test]
    async fn test_bundle_size_thresholds() {
        let temp_dir = TempDir::new().expect("temp dir");
        let dist = temp_dir.path().join("dist");
        fs::create_dir_all(&dist).expect("mkdir");
        fs::write(dist.join("app.js"), vec![b'x'; 3 * 1024]).expect("write");

        let warn = BundleSizeCheck::new(vec!["dist".to_string()], 2)
            .run(&ctx(temp_dir.path()))
            .await
            .expect("run");
        assert_eq!(warn[0].severity, Severity::Warning);

        let critical = BundleSizeCheck::new(vec!["dist".to_string()], 1)
            .run(&ctx(temp_dir.path()))
            .await
            .expect("run");
        assert_eq!(critical[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_bundle_size_without_output() {
        let temp_dir = TempDir::new().expect("temp dir");
        let issues = BundleSizeCheck::new(vec!["dist".to_string()], 512)
            .run(&ctx(temp_dir.path()))
            .await
            .expect("run");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Info);
    }
}
