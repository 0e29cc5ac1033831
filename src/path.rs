//! The path resolver: turns a client-supplied virtual path into a
//! normalised virtual path and a validated absolute OS path rooted at the
//! session's chroot directory (spec §4.5).
//!
//! `..` above the root is silently absorbed rather than rejected -- this
//! is the containment primitive the rest of the server relies on. No
//! client-supplied path can ever resolve outside `root`.

use std::path::{Path, PathBuf};

use crate::protocol::normalize_path;

/// Resolves `input` (absolute-within-session if it starts with `/`,
/// otherwise relative to `base`) against `root`.
///
/// Returns `(virtual_path, absolute_os_path)`. `virtual_path` always
/// starts with `/`, is normalised, and never contains `.` or `..`
/// segments. `absolute_os_path` is guaranteed to be `root` or a
/// descendant of it.
pub fn resolve(root: &Path, base: &str, input: &str) -> (String, PathBuf) {
    let joined = if input.starts_with('/') {
        input.to_string()
    } else {
        format!("{}/{}", base, input)
    };
    let normalized = normalize_path(&joined);

    let mut stack: Vec<&str> = Vec::new();
    for token in normalized.split('/') {
        match token {
            "" | "." => continue,
            ".." => {
                stack.pop();
            }
            t => stack.push(t),
        }
    }

    let virtual_path = if stack.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", stack.join("/"))
    };

    let mut abs = root.to_path_buf();
    for seg in &stack {
        abs.push(seg);
    }

    (virtual_path, abs)
}

/// Normalises a virtual path the same way [`resolve`] does, without
/// requiring a filesystem root -- used by the access-control check (spec
/// §4.6) which only cares about the virtual-path shape.
pub fn normalize_virtual(base: &str, input: &str) -> String {
    let joined = if input.starts_with('/') {
        input.to_string()
    } else {
        format!("{}/{}", base, input)
    };
    let normalized = normalize_path(&joined);
    let mut stack: Vec<&str> = Vec::new();
    for token in normalized.split('/') {
        match token {
            "" | "." => continue,
            ".." => {
                stack.pop();
            }
            t => stack.push(t),
        }
    }
    if stack.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", stack.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn absolute_escape_is_absorbed_at_root() {
        let root = Path::new("/srv/ftp");
        let (vp, abs) = resolve(root, "/", "../../../../etc/passwd");
        assert_eq!(vp, "/etc/passwd");
        assert!(abs.starts_with(root));
    }

    #[test]
    fn dotdot_from_root_stays_at_root() {
        let root = Path::new("/srv/ftp");
        let (vp, abs) = resolve(root, "/", "../../..");
        assert_eq!(vp, "/");
        assert_eq!(abs, root);
    }

    #[test]
    fn relative_resolution_against_base() {
        let root = Path::new("/srv/ftp");
        let (vp, abs) = resolve(root, "/users/alice", "../bob/file.txt");
        assert_eq!(vp, "/users/bob/file.txt");
        assert_eq!(abs, root.join("users/bob/file.txt"));
    }

    #[test]
    fn dot_segments_are_ignored() {
        let root = Path::new("/srv/ftp");
        let (vp, _) = resolve(root, "/a/b", "./.././c");
        assert_eq!(vp, "/a/c");
    }

    #[test]
    fn resolve_every_virtual_path_stays_inside_root() {
        let root = Path::new("/srv/ftp");
        let inputs = [
            "..", "../..", "a/../../b", "/../x", "//a//b//", "a/./b/../c",
        ];
        for base in ["/", "/a", "/a/b/c"] {
            for i in inputs {
                let (_, abs) = resolve(root, base, i);
                assert!(abs.starts_with(root), "{base} + {i} escaped root: {abs:?}");
            }
        }
    }
}
