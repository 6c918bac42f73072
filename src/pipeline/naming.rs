//! Output filenames: human-readable slug plus a random suffix.
//!
//! Every generated name is `{slug}[-{tag}]-{rand8}.{ext}`. The 8-character
//! alphanumeric suffix makes blob paths unique per artifact, so concurrent
//! requests never write to the same path.

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::path::Path;

const SUFFIX_LEN: usize = 8;

/// Lowercase ASCII alphanumerics with every other run collapsed to `-`.
/// Falls back to `file` when nothing is left.
pub fn slug(original_name: &str) -> String {
    let stem = Path::new(original_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(original_name);

    let mut out = String::with_capacity(stem.len());
    let mut pending_dash = false;
    for c in stem.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if out.is_empty() {
        "file".to_string()
    } else {
        out
    }
}

pub fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect()
}

/// `{slug}-{rand}.{ext}`
pub fn plain(original_name: &str, ext: &str) -> String {
    format!("{}-{}.{ext}", slug(original_name), random_suffix())
}

/// `{slug}-{tag}-{rand}.{ext}`
pub fn tagged(original_name: &str, tag: &str, ext: &str) -> String {
    format!("{}-{tag}-{}.{ext}", slug(original_name), random_suffix())
}
