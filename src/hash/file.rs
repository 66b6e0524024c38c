// ABOUTME: Content hashes for binary attachments that travel alongside entity rows
// ABOUTME: Uses the same digest as entity hashing, over raw bytes

use std::path::{Component, Path, PathBuf};

use anyhow::Context;

use super::canonical::digest_hex;
use crate::error::Result;

pub fn hash_bytes(data: &[u8]) -> String {
    digest_hex(data)
}

pub fn hash_file(path: &Path) -> Result<String> {
    let data = std::fs::read(path)
        .with_context(|| format!("failed to read attachment {}", path.display()))?;
    Ok(digest_hex(&data))
}

/// Resolves an attachment by name inside `dir`, returning it only when it is
/// an existing regular file. Names that would leave `dir` are rejected.
pub fn locate_attachment(dir: &Path, name: &str) -> Option<PathBuf> {
    let relative = Path::new(name);
    let confined = !name.is_empty()
        && relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if !confined {
        tracing::debug!(name, "rejecting attachment name outside the attachment directory");
        return None;
    }
    let candidate = dir.join(relative);
    if candidate.is_file() {
        tracing::debug!(file = %candidate.display(), "found attachment file");
        Some(candidate)
    } else {
        tracing::debug!(file = %candidate.display(), "no attachment file found");
        None
    }
}
