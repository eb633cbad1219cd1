//! Path safety, line-range validation, and text decoding.
//!
//! Every external-facing path goes through [`PathPolicy`]: reject empty
//! strings and control characters, normalize, refuse `..` segments, and
//! confirm the path sits under one of the allowed roots (the process working
//! directory plus configured and `MNEMO_ALLOWED_ROOTS` extensions).

use std::path::{Component, Path, PathBuf};

use crate::errors::EngineError;

/// Maximum line span an exact fetch may request.
pub const MAX_FETCH_LINES: i64 = 10_000;

/// Allowed-roots policy for external-facing paths.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    roots: Vec<PathBuf>,
}

impl PathPolicy {
    /// Build a policy from explicit roots. The process working directory is
    /// always included.
    pub fn new(extra_roots: &[PathBuf]) -> Self {
        let mut roots = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            roots.push(cwd);
        }
        for root in extra_roots {
            let abs = absolutize(root);
            if !roots.contains(&abs) {
                roots.push(abs);
            }
        }
        Self { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// True when the path is syntactically safe and under an allowed root.
    pub fn is_safe(&self, path: &str) -> bool {
        self.check(path).is_ok()
    }

    /// Full validation, returning the normalized absolute path.
    pub fn check(&self, path: &str) -> Result<PathBuf, EngineError> {
        if path.trim().is_empty() {
            return Err(EngineError::InvalidPath("empty path".into()));
        }
        if path.contains('\0') || path.contains('\n') || path.contains('\r') {
            return Err(EngineError::InvalidPath(
                "path contains control characters".into(),
            ));
        }

        let candidate = Path::new(path);
        if candidate
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(EngineError::InvalidPath(format!(
                "path escapes allowed roots: {}",
                path
            )));
        }

        let abs = absolutize(candidate);
        if self.roots.iter().any(|root| abs.starts_with(root)) {
            Ok(abs)
        } else {
            Err(EngineError::InvalidPath(format!(
                "path outside allowed roots: {}",
                path
            )))
        }
    }
}

/// Lexically absolutize without touching the filesystem. `.` components are
/// dropped; relative paths are joined onto the working directory.
fn absolutize(path: &Path) -> PathBuf {
    let base = if path.is_absolute() {
        PathBuf::new()
    } else {
        std::env::current_dir().unwrap_or_default()
    };
    let mut out = base;
    for component in path.components() {
        match component {
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Validate a 1-based inclusive line range.
pub fn validate_line_range(start: i64, end: i64) -> Result<(), EngineError> {
    if start < 1 {
        return Err(EngineError::InvalidRange(format!(
            "start_line {} must be >= 1",
            start
        )));
    }
    if end < start {
        return Err(EngineError::InvalidRange(format!(
            "end_line {} must be >= start_line {}",
            end, start
        )));
    }
    if end - start > MAX_FETCH_LINES {
        return Err(EngineError::InvalidRange(format!(
            "range too large ({} lines), max allowed is {}",
            end - start,
            MAX_FETCH_LINES
        )));
    }
    Ok(())
}

/// Decode file bytes: BOM first, then strict UTF-8, then Windows-1252 with
/// replacement. Never fails; returns the text and the encoding label.
pub fn decode_bytes(bytes: &[u8]) -> (String, &'static str) {
    if let Some((encoding, _bom_len)) = encoding_rs::Encoding::for_bom(bytes) {
        // `decode` strips the BOM itself.
        let (text, _, _) = encoding.decode(bytes);
        return (text.into_owned(), encoding.name());
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => (text.to_string(), "UTF-8"),
        Err(_) => {
            let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            (text.into_owned(), "windows-1252")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_with(dir: &Path) -> PathPolicy {
        PathPolicy::new(&[dir.to_path_buf()])
    }

    #[test]
    fn rejects_empty_and_control_chars() {
        let dir = tempfile::tempdir().unwrap();
        let policy = policy_with(dir.path());
        assert!(!policy.is_safe(""));
        assert!(!policy.is_safe("a\0b"));
        assert!(!policy.is_safe("a\nb"));
    }

    #[test]
    fn rejects_parent_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let policy = policy_with(dir.path());
        let sneaky = format!("{}/../../etc/passwd", dir.path().display());
        assert!(!policy.is_safe(&sneaky));
        assert!(!policy.is_safe("../outside.md"));
    }

    #[test]
    fn accepts_paths_under_roots() {
        let dir = tempfile::tempdir().unwrap();
        let policy = policy_with(dir.path());
        let inside = format!("{}/notes/dev.md", dir.path().display());
        assert!(policy.is_safe(&inside));
    }

    #[test]
    fn rejects_paths_outside_roots() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let policy = policy_with(dir.path());
        let outside = format!("{}/notes.md", other.path().display());
        assert!(!policy.is_safe(&outside));
    }

    #[test]
    fn line_range_validation() {
        assert!(validate_line_range(1, 1).is_ok());
        assert!(validate_line_range(5, 4).is_err());
        assert!(validate_line_range(0, 4).is_err());
        assert!(validate_line_range(1, 1 + MAX_FETCH_LINES + 1).is_err());
        assert!(validate_line_range(1, 1 + MAX_FETCH_LINES).is_ok());
    }

    #[test]
    fn decode_utf8_and_bom() {
        let (text, enc) = decode_bytes("plain text".as_bytes());
        assert_eq!(text, "plain text");
        assert_eq!(enc, "UTF-8");

        let mut bom_bytes = vec![0xEF, 0xBB, 0xBF];
        bom_bytes.extend_from_slice("bom text".as_bytes());
        let (text, _) = decode_bytes(&bom_bytes);
        assert!(text.ends_with("bom text"));
    }

    #[test]
    fn decode_invalid_utf8_falls_back() {
        let bytes = vec![0x68, 0x69, 0xE9, 0x21]; // "hié!" in latin-1
        let (text, enc) = decode_bytes(&bytes);
        assert_eq!(enc, "windows-1252");
        assert!(text.starts_with("hi"));
    }
}
