//! Exact-fetch: pointer dereference with locked reads.
//!
//! Reads a validated line range from disk under a shared advisory lock
//! (`fs2`), with a bounded wait. Staleness is reported as a warning, never a
//! failure: the caller still gets the current content plus a `stale_pointer`
//! flag when the stored first-line hash no longer matches.

use fs2::FileExt;
use serde::Serialize;
use std::fs::File;
use std::io::Read;
use std::time::{Duration, Instant};

use crate::errors::EngineError;
use crate::paths::{decode_bytes, validate_line_range, PathPolicy};
use crate::vector::first_line_hash;

/// Result of an exact fetch.
#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub content: String,
    pub file: String,
    pub range: (i64, i64),
    /// `Some("stale_pointer")` when the stored hash no longer matches.
    pub warning: Option<String>,
}

/// Read `start..=end` (1-based, inclusive) from `path`.
///
/// Blocking: callers on an async runtime should wrap this in
/// `spawn_blocking`. The shared lock is polled every 100ms up to
/// `timeout_secs`, then the call fails with `LockTimeout` rather than
/// blocking indefinitely.
pub fn fetch_exact(
    policy: &PathPolicy,
    path: &str,
    start_line: i64,
    end_line: i64,
    content_hash: Option<&str>,
    timeout_secs: u64,
) -> Result<FetchResult, EngineError> {
    let abs = policy.check(path)?;
    validate_line_range(start_line, end_line)?;

    let mut file = File::open(&abs).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => EngineError::FileNotFound(path.to_string()),
        std::io::ErrorKind::PermissionDenied => EngineError::PermissionDenied(path.to_string()),
        _ => EngineError::Internal(e.to_string()),
    })?;

    let deadline = Instant::now() + Duration::from_secs(timeout_secs);
    loop {
        match file.try_lock_shared() {
            Ok(()) => break,
            Err(_) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(_) => return Err(EngineError::LockTimeout(timeout_secs)),
        }
    }

    let result = read_range(&mut file, path, start_line, end_line, content_hash);
    let _ = fs2::FileExt::unlock(&file);
    result
}

fn read_range(
    file: &mut File,
    path: &str,
    start_line: i64,
    end_line: i64,
    content_hash: Option<&str>,
) -> Result<FetchResult, EngineError> {
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|e| EngineError::Internal(e.to_string()))?;
    let (text, _) = decode_bytes(&bytes);

    let lines: Vec<&str> = text.lines().collect();
    let total = lines.len() as i64;
    if end_line > total {
        return Err(EngineError::InvalidRange(format!(
            "file has {} lines, requested up to {}",
            total, end_line
        )));
    }

    let slice = &lines[(start_line - 1) as usize..end_line as usize];
    let content = slice.join("\n");

    let warning = match content_hash {
        Some(expected) if !expected.is_empty() && first_line_hash(&content) != expected => {
            Some("stale_pointer".to_string())
        }
        _ => None,
    };

    Ok(FetchResult {
        content,
        file: path.to_string(),
        range: (start_line, end_line),
        warning,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn setup(body: &str) -> (tempfile::TempDir, PathPolicy, String) {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("doc.md");
        std::fs::write(&file, body).unwrap();
        let policy = PathPolicy::new(&[dir.path().to_path_buf()]);
        (dir, policy, file.display().to_string())
    }

    #[test]
    fn fetches_requested_lines() {
        let (_dir, policy, path) = setup("one\ntwo\nthree\nfour\n");
        let out = fetch_exact(&policy, &path, 2, 3, None, 5).unwrap();
        assert_eq!(out.content, "two\nthree");
        assert_eq!(out.range, (2, 3));
        assert!(out.warning.is_none());
    }

    #[test]
    fn range_beyond_file_is_invalid() {
        let (_dir, policy, path) = setup("one\ntwo\n");
        let err = fetch_exact(&policy, &path, 1, 10, None, 5).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRange(_)));
    }

    #[test]
    fn missing_file_maps_to_not_found() {
        let (_dir, policy, path) = setup("x\n");
        let missing = path.replace("doc.md", "absent.md");
        let err = fetch_exact(&policy, &missing, 1, 1, None, 5).unwrap_err();
        assert!(matches!(err, EngineError::FileNotFound(_)));
    }

    #[test]
    fn unsafe_path_is_rejected_before_io() {
        let (_dir, policy, _path) = setup("x\n");
        let err = fetch_exact(&policy, "../etc/passwd", 1, 1, None, 5).unwrap_err();
        assert!(matches!(err, EngineError::InvalidPath(_)));
    }

    #[test]
    fn hash_mismatch_is_a_warning_not_a_failure() {
        let (_dir, policy, path) = setup("current line\nmore\n");
        let out = fetch_exact(&policy, &path, 1, 2, Some("0".repeat(64).as_str()), 5).unwrap();
        assert_eq!(out.warning.as_deref(), Some("stale_pointer"));
        assert_eq!(out.content, "current line\nmore");
    }

    #[test]
    fn matching_hash_produces_no_warning() {
        let (_dir, policy, path) = setup("current line\nmore\n");
        let expected = first_line_hash("current line");
        let out = fetch_exact(&policy, &path, 1, 2, Some(&expected), 5).unwrap();
        assert!(out.warning.is_none());
    }

    #[test]
    fn policy_roots_include_extras() {
        let dir = tempfile::tempdir().unwrap();
        let policy = PathPolicy::new(&[PathBuf::from(dir.path())]);
        assert!(policy.roots().len() >= 2);
    }
}
