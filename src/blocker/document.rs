//! The standing human-readable blockers document (`BLOCKERS.md`).
//!
//! Regenerated from project state on every blocker change, grouped by
//! blocker type.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;

use super::{Blocker, BlockerType};
use crate::feature::Feature;
use crate::state::ProjectState;

/// Command name shown in unblock instructions.
pub const CLI_NAME: &str = "autopilot";

/// Best-effort hint on where a required value can be obtained.
pub fn value_hint(key: &str) -> &'static str {
    let upper = key.to_uppercase();
    let rules: &[(&[&str], &str)] = &[
        (&["STRIPE"], "Stripe dashboard > Developers > API keys"),
        (&["PAYPAL"], "PayPal developer dashboard > Apps & Credentials"),
        (
            &["OAUTH", "GOOGLE", "GITHUB_CLIENT"],
            "OAuth provider console > Credentials (client id/secret)",
        ),
        (&["AWS", "S3_"], "AWS IAM console > Security credentials"),
        (&["TWILIO"], "Twilio console > Account info"),
        (&["SENDGRID", "SMTP", "MAIL"], "Email provider settings > API keys / SMTP"),
        (
            &["DATABASE_URL", "POSTGRES", "MYSQL", "DB_"],
            "Database provider connection settings",
        ),
        (&["REDIS"], "Redis provider connection settings"),
        (&["JWT", "SESSION_SECRET"], "Generate locally, e.g. `openssl rand -hex 32`"),
    ];
    rules
        .iter()
        .find(|(needles, _)| needles.iter().any(|needle| upper.contains(needle)))
        .map(|(_, hint)| *hint)
        .unwrap_or("Service dashboard or the team secrets manager")
}

/// Renders and writes `BLOCKERS.md`.
#[derive(Debug, Clone)]
pub struct BlockersDocument {
    path: PathBuf,
}

impl BlockersDocument {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Regenerate the document from state.
    pub fn write(&self, state: &ProjectState) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = render(state);
        let temp_path = self.path.with_extension("md.tmp");
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, &self.path)
    }
}

/// Blocked features and the blockers keeping them blocked, grouped by type.
pub fn grouped_blockers(state: &ProjectState) -> BTreeMap<BlockerType, Vec<(&Feature, Vec<&Blocker>)>> {
    let mut groups: BTreeMap<BlockerType, Vec<(&Feature, Vec<&Blocker>)>> = BTreeMap::new();
    for feature in state.blocked_features() {
        let blockers: Vec<&Blocker> = state
            .blockers_for(feature.id)
            .into_iter()
            .filter(|b| {
                b.is_active() || b.resolution_action == Some(super::ResolutionAction::Deferred)
            })
            .collect();
        let blocker_type = feature
            .blocker_type
            .or_else(|| blockers.first().map(|b| b.blocker_type))
            .unwrap_or(BlockerType::UnclearRequirements);
        groups
            .entry(blocker_type)
            .or_default()
            .push((feature, blockers));
    }
    groups
}

pub fn render(state: &ProjectState) -> String {
    let groups = grouped_blockers(state);
    let blocked: usize = groups.values().map(Vec::len).sum();

    let mut out = String::new();
    out.push_str("# Blockers\n\n");
    out.push_str(&format!(
        "_Generated {}. {} blocked feature(s)._\n\n",
        Utc::now().format("%Y-%m-%d %H:%M UTC"),
        blocked
    ));

    if groups.is_empty() {
        out.push_str("No features are currently blocked.\n");
        return out;
    }

    for (blocker_type, entries) in &groups {
        out.push_str(&format!("## {} ({})\n\n", blocker_type.title(), blocker_type));
        for (feature, blockers) in entries {
            out.push_str(&format!("### #{} {}\n\n", feature.id, feature.name));
            if let Some(description) = &feature.blocker_description {
                out.push_str(&format!("{}\n\n", description));
            }
            for blocker in blockers {
                let status = match blocker.resolution_action {
                    Some(action) => action.as_label(),
                    None => "ACTIVE",
                };
                out.push_str(&format!(
                    "- Blocker {} [{}]: {}\n",
                    blocker.id, status, blocker.description
                ));
                for key in &blocker.required_values {
                    out.push_str(&format!("  - `{}`: {}\n", key, value_hint(key)));
                }
            }
            out.push_str(&format!(
                "\nUnblock with: `{} unblock {}`\n\n",
                CLI_NAME, feature.id
            ));
        }
    }
    out
}
