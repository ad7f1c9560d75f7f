//! Short, stable content digests used for drift and conflict detection.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Digest length in hex characters.
pub const DIGEST_LEN: usize = 16;

fn truncated_hex(hasher: Sha256) -> String {
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(DIGEST_LEN);
    hex
}

/// SHA-256 of `content`, truncated to 16 lowercase hex characters.
pub fn hash_content(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    truncated_hex(hasher)
}

pub fn hash_str(content: &str) -> String {
    hash_content(content.as_bytes())
}

/// Digest of a file's content, following symlinks.
///
/// Returns an empty string when the file is missing or unreadable.
pub fn hash_file(path: &Path) -> String {
    let Ok(mut file) = File::open(path) else {
        return String::new();
    };
    if file.metadata().map(|m| m.is_dir()).unwrap_or(true) {
        return String::new();
    }
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buf[..n]),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "hash read failed");
                return String::new();
            }
        }
    }
    truncated_hex(hasher)
}

/// Hashes every regular file in `paths`, keyed by its display path.
/// Entries that cannot be hashed are omitted.
pub fn hash_paths<'a>(paths: impl IntoIterator<Item = &'a PathBuf>) -> BTreeMap<String, String> {
    paths
        .into_iter()
        .filter(|p| p.is_file())
        .filter_map(|p| {
            let digest = hash_file(p);
            (!digest.is_empty()).then(|| (p.to_string_lossy().into_owned(), digest))
        })
        .collect()
}
