//! Append-only `.env` writer for values provided during intervention.

use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Which keys a write added and which were already present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvWriteReport {
    pub written: Vec<String>,
    pub kept_existing: Vec<String>,
}

/// A dotenv-style file. Existing keys are never overwritten.
#[derive(Debug, Clone)]
pub struct EnvFile {
    path: PathBuf,
}

impl EnvFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keys currently defined in the file.
    pub fn keys(&self) -> io::Result<HashSet<String>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(err) => return Err(err),
        };
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let line = line.strip_prefix("export ").unwrap_or(line);
                line.split_once('=').map(|(key, _)| key.trim().to_string())
            })
            .collect())
    }

    /// Append values whose keys are not yet defined.
    pub fn append_missing(&self, values: &[(String, String)]) -> io::Result<EnvWriteReport> {
        let existing = self.keys()?;
        let mut report = EnvWriteReport::default();
        let mut lines = String::new();

        for (key, value) in values {
            if existing.contains(key) || report.written.contains(key) {
                report.kept_existing.push(key.clone());
                continue;
            }
            lines.push_str(&format!("{}={}\n", key, quote_value(value)));
            report.written.push(key.clone());
        }

        if lines.is_empty() {
            return Ok(report);
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let needs_newline = fs::read_to_string(&self.path)
            .map(|content| !content.is_empty() && !content.ends_with('\n'))
            .unwrap_or(false);

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        if needs_newline {
            writeln!(file)?;
        }
        file.write_all(lines.as_bytes())?;
        file.sync_all()?;

        Ok(report)
    }
}

fn quote_value(value: &str) -> String {
    if value.chars().any(|c| c.is_whitespace() || c == '#' || c == '"') {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pair(key: &str, value: &str) -> (String, String) {
        (key.to_string(), value.to_string())
    }

    #[test]
    fn test_append_creates_file() {
        let temp_dir = TempDir::new().expect("temp dir");
        let env = EnvFile::new(temp_dir.path().join(".env"));

        let report = env
            .append_missing(&[pair("OAUTH_CLIENT_ID", "abc")])
            .expect("append");
        assert_eq!(report.written, vec!["OAUTH_CLIENT_ID".to_string()]);
        let content = fs::read_to_string(env.path()).expect("read");
        assert_eq!(content, "OAUTH_CLIENT_ID=abc\n");
    }

    #[test]
    fn test_existing_keys_never_overwritten() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join(".env");
        fs::write(&path, "# comment\nexport STRIPE_KEY=old").expect("write");
        let env = EnvFile::new(&path);

        let report = env
            .append_missing(&[pair("STRIPE_KEY", "new"), pair("STRIPE_SECRET", "s3cret")])
            .expect("append");
        assert_eq!(report.kept_existing, vec!["STRIPE_KEY".to_string()]);
        assert_eq!(report.written, vec!["STRIPE_SECRET".to_string()]);

        let content = fs::read_to_string(&path).expect("read");
        assert_eq!(content, "# comment\nexport STRIPE_KEY=old\nSTRIPE_SECRET=s3cret\n");
    }

    #[test]
    fn test_values_with_spaces_are_quoted() {
        assert_eq!(quote_value("two words"), "\"two words\"");
        assert_eq!(quote_value("plain"), "plain");
    }
}
