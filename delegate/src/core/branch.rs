//! Deterministic working-branch names derived from task identifiers.
//!
//! Task ids come from callers and may contain anything. The branch name keeps
//! the safe `[A-Za-z0-9._-]` part of the id and, when the id had to be
//! rewritten, appends a short content hash so distinct ids never share a
//! branch.

use sha2::{Digest, Sha256};

/// Default prefix for working branches.
pub const DEFAULT_BRANCH_PREFIX: &str = "delegate/";

/// Derive the working branch for `task_id` under `prefix`.
pub fn working_branch_name(prefix: &str, task_id: &str) -> String {
    let slug = sanitize_id(task_id);
    let suffix = if slug.is_empty() {
        format!("task-{}", id_hash(task_id))
    } else if slug != task_id {
        format!("{slug}-{}", id_hash(task_id))
    } else {
        slug
    };
    format!("{prefix}{suffix}")
}

/// True when `id` can be used verbatim in a branch name.
pub fn is_safe_id(id: &str) -> bool {
    !id.is_empty() && sanitize_id(id) == id
}

fn sanitize_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for c in id.chars() {
        let mapped = if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
            c
        } else {
            '-'
        };
        let prev = out.chars().last();
        if (mapped == '-' && prev == Some('-')) || (mapped == '.' && prev == Some('.')) {
            continue;
        }
        out.push(mapped);
    }
    let mut trimmed = out.trim_matches(|c| c == '-' || c == '.').to_string();
    while let Some(stripped) = trimmed.strip_suffix(".lock") {
        trimmed = stripped.trim_end_matches(['-', '.']).to_string();
    }
    trimmed
}

fn id_hash(id: &str) -> String {
    let digest = Sha256::digest(id.as_bytes());
    hex::encode(&digest[..4])
}
