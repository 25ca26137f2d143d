//! Unified diff handling.
//!
//! - [`parse`]: unified diff text into per-file hunks
//! - [`apply_to_dir`]: all-or-nothing application with offset search and
//!   optional whitespace-insensitive matching (`patch -p1 -l`)
//! - [`compare_trees`]: recursive comparison ignoring whitespace (`diff -rw`)
//! - [`relativize`]: rewrite diff paths relative to a driver directory

mod apply;
mod compare;

pub use apply::{
    apply_to_dir, parse, ApplyError, ApplyOptions, ApplyReport, FilePatch, Hunk, HunkLine,
};
pub use compare::{compare_trees, copy_tree, lines_equal_ignoring_whitespace};

use std::path::Path;

/// Split text into lines without their `\n` terminators.
///
/// A trailing newline does not produce an empty last line.
pub(crate) fn split_lines(text: &[u8]) -> Vec<&[u8]> {
    if text.is_empty() {
        return Vec::new();
    }
    let body = text.strip_suffix(b"\n").unwrap_or(text);
    body.split(|&b| b == b'\n').collect()
}

fn replace_all(haystack: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(haystack.len());
    let mut i = 0;
    while i < haystack.len() {
        if haystack[i..].starts_with(from) {
            out.extend_from_slice(to);
            i += from.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out
}

/// Rewrite the paths of a git-style diff so they are relative to `base`.
///
/// `a/drivers/net/e1000e/netdev.c` becomes `a/netdev.c` for
/// `base = drivers/net/e1000e`. Lines that are not file headers are left
/// untouched, byte for byte.
pub fn relativize(diff: &[u8], base: &Path) -> Vec<u8> {
    let base = base.to_string_lossy();
    let base = base.trim_matches('/');
    if base.is_empty() {
        return diff.to_vec();
    }
    let from_a = format!("a/{}/", base);
    let from_b = format!("b/{}/", base);

    let mut out = Vec::with_capacity(diff.len());
    let mut in_hunk = false;
    for line in diff.split_inclusive(|&b| b == b'\n') {
        if line.starts_with(b"diff --git ") {
            in_hunk = false;
        } else if line.starts_with(b"@@ ") {
            in_hunk = true;
        }

        let is_header = !in_hunk
            && (line.starts_with(b"diff --git ")
                || line.starts_with(b"--- ")
                || line.starts_with(b"+++ "));
        if is_header {
            let line = replace_all(line, from_a.as_bytes(), b"a/");
            out.extend_from_slice(&replace_all(&line, from_b.as_bytes(), b"b/"));
        } else {
            out.extend_from_slice(line);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relativize_headers_only() {
        let diff = b"diff --git a/drivers/net/e1000e/netdev.c b/drivers/net/e1000e/netdev.c\n\
                    index 1111111..2222222 100644\n\
                    --- a/drivers/net/e1000e/netdev.c\n\
                    +++ b/drivers/net/e1000e/netdev.c\n\
                    @@ -1 +1,2 @@\n\
                    \x20/* a/drivers/net/e1000e/x */\n\
                    +#include <netmap/if_e1000e_netmap.h>\n";
        let rel = String::from_utf8(relativize(diff, Path::new("drivers/net/e1000e"))).unwrap();
        assert!(rel.starts_with("diff --git a/netdev.c b/netdev.c\n"));
        assert!(rel.contains("--- a/netdev.c\n+++ b/netdev.c\n"));
        // hunk bodies are not rewritten
        assert!(rel.contains(" /* a/drivers/net/e1000e/x */\n"));
    }

    #[test]
    fn test_relativize_keeps_latin1_bytes() {
        let diff = b"--- a/drivers/net/e1000e/netdev.c\n+++ b/drivers/net/e1000e/netdev.c\n@@ -1 +1 @@\n- * Fran\xe7ois\n+ * Fran\xe7ois \xe9\xf4\n";
        let rel = relativize(diff, Path::new("drivers/net/e1000e"));
        assert!(rel.starts_with(b"--- a/netdev.c\n+++ b/netdev.c\n"));
        assert!(rel.ends_with(b"+ * Fran\xe7ois \xe9\xf4\n"));
    }

    #[test]
    fn test_split_lines() {
        assert!(split_lines(b"").is_empty());
        assert_eq!(split_lines(b"a\nb\n"), vec![&b"a"[..], &b"b"[..]]);
        assert_eq!(split_lines(b"a\n\nb"), vec![&b"a"[..], &b""[..], &b"b"[..]]);
    }

    #[test]
    fn test_relativize_empty_base() {
        let diff = b"--- a/x.c\n+++ b/x.c\n";
        assert_eq!(relativize(diff, Path::new("")), diff);
    }
}
