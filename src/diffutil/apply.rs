//! Unified diff parsing and application.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use super::compare::lines_equal_ignoring_whitespace;
use super::split_lines;

/// Errors from parsing or applying a diff.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("malformed diff at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("file to patch not found: {0}")]
    MissingFile(String),

    #[error("file to create already exists: {0}")]
    FileExists(String),

    #[error("hunk #{hunk} does not apply to {path}")]
    HunkFailed { path: String, hunk: usize },

    #[error("unsafe path in diff: {0}")]
    UnsafePath(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// One line of a hunk body, without its marker or newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(Vec<u8>),
    Remove(Vec<u8>),
    Add(Vec<u8>),
}

/// A `@@ -a,b +c,d @@` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
    pub lines: Vec<HunkLine>,
    /// `\ No newline at end of file` after an old-side line.
    pub old_missing_eol: bool,
    /// `\ No newline at end of file` after a new-side line.
    pub new_missing_eol: bool,
}

impl Hunk {
    fn old_side(&self) -> Vec<&[u8]> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(s) | HunkLine::Remove(s) => Some(s.as_slice()),
                HunkLine::Add(_) => None,
            })
            .collect()
    }
}

/// Changes to a single file. `None` paths stand for `/dev/null`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub hunks: Vec<Hunk>,
}

/// How to apply a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Leading path components to strip (`-p`).
    pub strip: usize,
    /// Match context and removed lines ignoring whitespace (`-l`).
    pub ignore_whitespace: bool,
    /// Furthest a hunk may move from its stated position; unbounded when `None`.
    pub max_offset: Option<usize>,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            strip: 1,
            ignore_whitespace: false,
            max_offset: None,
        }
    }
}

impl ApplyOptions {
    pub fn ignoring_whitespace() -> Self {
        Self {
            ignore_whitespace: true,
            ..Self::default()
        }
    }
}

/// Summary of a successful application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Files written, relative to the target directory.
    pub files: Vec<PathBuf>,
    /// Largest distance any hunk moved from its stated position.
    pub max_offset: usize,
}

/// Parse a unified diff.
///
/// Anything outside `---`/`+++` headers and hunks (`diff --git`, `index`,
/// mode lines) is ignored. An empty diff parses to no files. Hunk bodies
/// are kept as raw bytes; only headers must be UTF-8.
pub fn parse(diff: &[u8]) -> Result<Vec<FilePatch>, ApplyError> {
    let lines = split_lines(diff);
    let mut files = Vec::new();
    let mut current: Option<FilePatch> = None;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if let Some(old) = line.strip_prefix(b"--- ") {
            if let Some(new) = lines.get(i + 1).and_then(|l| l.strip_prefix(b"+++ ")) {
                if let Some(done) = current.take() {
                    files.push(done);
                }
                current = Some(FilePatch {
                    old_path: header_path(old, i + 1)?,
                    new_path: header_path(new, i + 2)?,
                    hunks: Vec::new(),
                });
                i += 2;
                continue;
            }
        }

        if line.starts_with(b"@@") {
            let file = current.as_mut().ok_or_else(|| ApplyError::Parse {
                line: i + 1,
                reason: "hunk before file header".to_string(),
            })?;
            let (hunk, consumed) = parse_hunk(&lines[i..], i)?;
            file.hunks.push(hunk);
            i += consumed;
            continue;
        }

        i += 1;
    }

    if let Some(done) = current {
        files.push(done);
    }
    Ok(files)
}

fn header_text(bytes: &[u8], line: usize) -> Result<&str, ApplyError> {
    std::str::from_utf8(bytes).map_err(|_| ApplyError::Parse {
        line,
        reason: "header is not valid UTF-8".to_string(),
    })
}

fn header_path(field: &[u8], line: usize) -> Result<Option<String>, ApplyError> {
    let field = header_text(field, line)?;
    let path = field.split('\t').next().unwrap_or(field).trim_end();
    if path == "/dev/null" {
        Ok(None)
    } else {
        Ok(Some(path.to_string()))
    }
}

fn parse_range(token: &str, prefix: char, line: usize) -> Result<(usize, usize), ApplyError> {
    let bad = || ApplyError::Parse {
        line,
        reason: format!("bad hunk range {:?}", token),
    };
    let body = token.strip_prefix(prefix).ok_or_else(bad)?;
    let (start, len) = match body.split_once(',') {
        Some((s, l)) => (s, l),
        None => (body, "1"),
    };
    Ok((start.parse().map_err(|_| bad())?, len.parse().map_err(|_| bad())?))
}

/// Parse a hunk starting at its `@@` header. Returns the hunk and lines consumed.
fn parse_hunk(lines: &[&[u8]], offset: usize) -> Result<(Hunk, usize), ApplyError> {
    let header_line = offset + 1;
    let tokens: Vec<&str> = header_text(lines[0], header_line)?.split_whitespace().collect();
    if tokens.len() < 3 {
        return Err(ApplyError::Parse {
            line: header_line,
            reason: "truncated hunk header".to_string(),
        });
    }
    let (old_start, old_len) = parse_range(tokens[1], '-', header_line)?;
    let (new_start, new_len) = parse_range(tokens[2], '+', header_line)?;

    let mut hunk = Hunk {
        old_start,
        old_len,
        new_start,
        new_len,
        lines: Vec::new(),
        old_missing_eol: false,
        new_missing_eol: false,
    };
    let (mut old_seen, mut new_seen) = (0, 0);
    let mut j = 1;

    while old_seen < old_len || new_seen < new_len {
        let line = lines.get(j).ok_or_else(|| ApplyError::Parse {
            line: offset + j + 1,
            reason: "hunk truncated".to_string(),
        })?;
        match line.first() {
            Some(b' ') => {
                hunk.lines.push(HunkLine::Context(line[1..].to_vec()));
                old_seen += 1;
                new_seen += 1;
            }
            // Editors strip the lone space of empty context lines.
            None => {
                hunk.lines.push(HunkLine::Context(Vec::new()));
                old_seen += 1;
                new_seen += 1;
            }
            Some(b'-') => {
                hunk.lines.push(HunkLine::Remove(line[1..].to_vec()));
                old_seen += 1;
            }
            Some(b'+') => {
                hunk.lines.push(HunkLine::Add(line[1..].to_vec()));
                new_seen += 1;
            }
            Some(b'\\') => mark_missing_eol(&mut hunk),
            Some(_) => {
                return Err(ApplyError::Parse {
                    line: offset + j + 1,
                    reason: format!("unexpected line in hunk: {:?}", String::from_utf8_lossy(line)),
                })
            }
        }
        j += 1;
    }

    while lines.get(j).map_or(false, |l| l.starts_with(b"\\")) {
        mark_missing_eol(&mut hunk);
        j += 1;
    }

    Ok((hunk, j))
}

fn mark_missing_eol(hunk: &mut Hunk) {
    match hunk.lines.last() {
        Some(HunkLine::Remove(_)) => hunk.old_missing_eol = true,
        Some(HunkLine::Add(_)) => hunk.new_missing_eol = true,
        Some(HunkLine::Context(_)) => {
            hunk.old_missing_eol = true;
            hunk.new_missing_eol = true;
        }
        None => {}
    }
}

fn strip_path(path: &str, strip: usize) -> Result<PathBuf, ApplyError> {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    if parts.len() <= strip {
        return Err(ApplyError::UnsafePath(path.to_string()));
    }
    let rel: PathBuf = parts[strip..].iter().collect();
    let safe = rel.components().all(|c| matches!(c, Component::Normal(_)));
    if !safe {
        return Err(ApplyError::UnsafePath(path.to_string()));
    }
    Ok(rel)
}

/// Apply `diff` to the files under `dir`.
///
/// All files are patched in memory first; nothing is written unless every
/// hunk of every file applies.
pub fn apply_to_dir(diff: &[u8], dir: &Path, options: ApplyOptions) -> Result<ApplyReport, ApplyError> {
    let files = parse(diff)?;
    // path -> new content, None for deletion
    let mut staged: BTreeMap<PathBuf, Option<Vec<u8>>> = BTreeMap::new();
    let mut report = ApplyReport::default();

    for file in &files {
        let old = file.old_path.as_deref().map(|p| strip_path(p, options.strip)).transpose()?;
        let new = file.new_path.as_deref().map(|p| strip_path(p, options.strip)).transpose()?;

        match (old, new) {
            (None, None) => {
                return Err(ApplyError::Parse {
                    line: 0,
                    reason: "file header with /dev/null on both sides".to_string(),
                })
            }
            (None, Some(new)) => {
                let exists = match staged.get(&new) {
                    Some(content) => content.is_some(),
                    None => dir.join(&new).exists(),
                };
                if exists {
                    return Err(ApplyError::FileExists(new.display().to_string()));
                }
                let (content, drift) = apply_hunks(b"", &file.hunks, options, &new)?;
                report.max_offset = report.max_offset.max(drift);
                staged.insert(new, Some(content));
            }
            (Some(old), new) => {
                let original = match staged.get(&old) {
                    Some(Some(content)) => content.clone(),
                    Some(None) => return Err(ApplyError::MissingFile(old.display().to_string())),
                    None => {
                        let path = dir.join(&old);
                        if !path.is_file() {
                            return Err(ApplyError::MissingFile(old.display().to_string()));
                        }
                        fs::read(&path)?
                    }
                };
                let (content, drift) = apply_hunks(&original, &file.hunks, options, &old)?;
                report.max_offset = report.max_offset.max(drift);

                match new {
                    None => {
                        if !content.is_empty() {
                            return Err(ApplyError::HunkFailed {
                                path: old.display().to_string(),
                                hunk: file.hunks.len(),
                            });
                        }
                        staged.insert(old, None);
                    }
                    Some(new) if new != old => {
                        staged.insert(old, None);
                        staged.insert(new, Some(content));
                    }
                    Some(new) => {
                        staged.insert(new, Some(content));
                    }
                }
            }
        }
    }

    for (rel, content) in staged {
        let path = dir.join(&rel);
        match content {
            Some(content) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&path, content)?;
            }
            None => {
                if path.exists() {
                    fs::remove_file(&path)?;
                }
            }
        }
        report.files.push(rel);
    }
    Ok(report)
}

/// Apply hunks to file content. Returns the new content and the largest drift.
fn apply_hunks(
    original: &[u8],
    hunks: &[Hunk],
    options: ApplyOptions,
    path: &Path,
) -> Result<(Vec<u8>, usize), ApplyError> {
    let had_eol = original.is_empty() || original.ends_with(b"\n");
    let mut lines: Vec<Vec<u8>> = split_lines(original).into_iter().map(<[u8]>::to_vec).collect();
    // Net line-count change so far plus drift of earlier hunks.
    let mut shift: isize = 0;
    let mut min_pos = 0;
    let mut max_drift = 0;

    for (idx, hunk) in hunks.iter().enumerate() {
        let old = hunk.old_side();
        let stated = if hunk.old_len == 0 {
            hunk.old_start
        } else {
            hunk.old_start.saturating_sub(1)
        };
        let expected = (stated as isize + shift).max(0) as usize;

        let pos = find_position(&lines, &old, expected, min_pos, options).ok_or_else(|| {
            ApplyError::HunkFailed {
                path: path.display().to_string(),
                hunk: idx + 1,
            }
        })?;
        max_drift = max_drift.max(pos.abs_diff(expected));

        let mut replacement = Vec::with_capacity(hunk.new_len);
        let mut k = pos;
        for line in &hunk.lines {
            match line {
                // Context keeps the file's own text.
                HunkLine::Context(_) => {
                    replacement.push(lines[k].clone());
                    k += 1;
                }
                HunkLine::Remove(_) => k += 1,
                HunkLine::Add(s) => replacement.push(s.clone()),
            }
        }

        let inserted = replacement.len();
        lines.splice(pos..pos + old.len(), replacement);
        shift += (pos as isize - expected as isize) + inserted as isize - old.len() as isize;
        min_pos = pos + inserted;
    }

    let eol = if hunks.iter().any(|h| h.new_missing_eol) {
        false
    } else if hunks.iter().any(|h| h.old_missing_eol) {
        true
    } else {
        had_eol
    };

    let mut content = lines.join(&b'\n');
    if eol && !lines.is_empty() {
        content.push(b'\n');
    }
    Ok((content, max_drift))
}

/// Find where `old` occurs, searching outward from `expected`.
fn find_position(
    lines: &[Vec<u8>],
    old: &[&[u8]],
    expected: usize,
    min_pos: usize,
    options: ApplyOptions,
) -> Option<usize> {
    if lines.len() < old.len() {
        return None;
    }
    let last = lines.len() - old.len();
    if old.is_empty() {
        return Some(expected.clamp(min_pos.min(last), last));
    }

    let matches_at = |pos: usize| -> bool {
        pos >= min_pos
            && pos <= last
            && old.iter().enumerate().all(|(i, want)| {
                let have = lines[pos + i].as_slice();
                if options.ignore_whitespace {
                    lines_equal_ignoring_whitespace(have, want)
                } else {
                    have == *want
                }
            })
    };

    let limit = options.max_offset.unwrap_or(lines.len());
    for distance in 0..=limit {
        if let Some(pos) = expected.checked_add(distance) {
            if matches_at(pos) {
                return Some(pos);
            }
        }
        if distance > 0 {
            if let Some(pos) = expected.checked_sub(distance) {
                if matches_at(pos) {
                    return Some(pos);
                }
            }
        }
        if expected.saturating_sub(distance) == 0 && expected + distance > last {
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const NETDEV: &str = "#include <linux/module.h>\n\
                          #include <linux/netdevice.h>\n\
                          \n\
                          static int e1000_open(struct net_device *dev)\n\
                          {\n\
                          \treturn 0;\n\
                          }\n";

    const ADD_INCLUDE: &str = "diff --git a/netdev.c b/netdev.c\n\
                               --- a/netdev.c\n\
                               +++ b/netdev.c\n\
                               @@ -1,3 +1,4 @@\n\
                               \x20#include <linux/module.h>\n\
                               \x20#include <linux/netdevice.h>\n\
                               +#include <if_e1000e_netmap.h>\n\
                               \x20\n";

    fn setup(content: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("netdev.c"), content).unwrap();
        dir
    }

    #[test]
    fn test_parse_single_hunk() {
        let files = parse(ADD_INCLUDE.as_bytes()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].old_path.as_deref(), Some("a/netdev.c"));
        let hunk = &files[0].hunks[0];
        assert_eq!((hunk.old_start, hunk.old_len, hunk.new_start, hunk.new_len), (1, 3, 1, 4));
        assert_eq!(hunk.lines[2], HunkLine::Add(b"#include <if_e1000e_netmap.h>".to_vec()));
    }

    #[test]
    fn test_parse_empty_diff() {
        assert!(parse(b"").unwrap().is_empty());
    }

    #[test]
    fn test_parse_truncated_hunk() {
        let diff = b"--- a/x.c\n+++ b/x.c\n@@ -1,3 +1,3 @@\n a\n";
        assert!(matches!(parse(diff), Err(ApplyError::Parse { .. })));
    }

    #[test]
    fn test_apply_exact() {
        let dir = setup(NETDEV);
        apply_to_dir(ADD_INCLUDE.as_bytes(), dir.path(), ApplyOptions::default()).unwrap();
        let patched = fs::read_to_string(dir.path().join("netdev.c")).unwrap();
        assert!(patched.contains("#include <linux/netdevice.h>\n#include <if_e1000e_netmap.h>\n\n"));
        assert!(patched.ends_with("}\n"));
    }

    #[test]
    fn test_apply_with_offset() {
        let shifted = format!("/* SPDX */\n/* header */\n{}", NETDEV);
        let dir = setup(&shifted);
        let report = apply_to_dir(ADD_INCLUDE.as_bytes(), dir.path(), ApplyOptions::default()).unwrap();
        assert_eq!(report.max_offset, 2);
        let patched = fs::read_to_string(dir.path().join("netdev.c")).unwrap();
        assert!(patched.starts_with("/* SPDX */\n/* header */\n#include <linux/module.h>\n"));
        assert!(patched.contains("#include <if_e1000e_netmap.h>"));
    }

    #[test]
    fn test_whitespace_only_requires_option() {
        let retabbed = NETDEV.replace("#include <linux/netdevice.h>", "#include  <linux/netdevice.h>");
        let dir = setup(&retabbed);
        assert!(matches!(
            apply_to_dir(ADD_INCLUDE.as_bytes(), dir.path(), ApplyOptions::default()),
            Err(ApplyError::HunkFailed { hunk: 1, .. })
        ));
        // failed application leaves the file untouched
        assert_eq!(fs::read_to_string(dir.path().join("netdev.c")).unwrap(), retabbed);

        apply_to_dir(ADD_INCLUDE.as_bytes(), dir.path(), ApplyOptions::ignoring_whitespace()).unwrap();
        let patched = fs::read_to_string(dir.path().join("netdev.c")).unwrap();
        // context keeps the file's spacing
        assert!(patched.contains("#include  <linux/netdevice.h>\n#include <if_e1000e_netmap.h>"));
    }

    #[test]
    fn test_apply_latin1_source_verbatim() {
        let original = b"/* Fran\xe7ois */\nint a;\nint b;\n";
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("netdev.c"), original).unwrap();
        let diff = b"--- a/netdev.c\n+++ b/netdev.c\n@@ -1,2 +1,3 @@\n /* Fran\xe7ois */\n+/* \xe9\xf4 */\n int a;\n";
        apply_to_dir(diff, dir.path(), ApplyOptions::default()).unwrap();
        assert_eq!(
            fs::read(dir.path().join("netdev.c")).unwrap(),
            b"/* Fran\xe7ois */\n/* \xe9\xf4 */\nint a;\nint b;\n"
        );
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            apply_to_dir(ADD_INCLUDE.as_bytes(), dir.path(), ApplyOptions::default()),
            Err(ApplyError::MissingFile(_))
        ));
    }

    #[test]
    fn test_create_and_delete() {
        let dir = setup(NETDEV);
        fs::write(dir.path().join("old.h"), "gone\n").unwrap();
        let diff = "--- /dev/null\n\
                    +++ b/netmap/if_e1000e_netmap.h\n\
                    @@ -0,0 +1,2 @@\n\
                    +#ifndef IF_E1000E_NETMAP_H\n\
                    +#endif\n\
                    --- a/old.h\n\
                    +++ /dev/null\n\
                    @@ -1 +0,0 @@\n\
                    -gone\n";
        apply_to_dir(diff.as_bytes(), dir.path(), ApplyOptions::default()).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("netmap/if_e1000e_netmap.h")).unwrap(),
            "#ifndef IF_E1000E_NETMAP_H\n#endif\n"
        );
        assert!(!dir.path().join("old.h").exists());
    }

    #[test]
    fn test_create_existing_fails() {
        let dir = setup(NETDEV);
        let diff = "--- /dev/null\n+++ b/netdev.c\n@@ -0,0 +1 @@\n+x\n";
        assert!(matches!(
            apply_to_dir(diff.as_bytes(), dir.path(), ApplyOptions::default()),
            Err(ApplyError::FileExists(_))
        ));
    }

    #[test]
    fn test_unsafe_paths_rejected() {
        let dir = setup(NETDEV);
        let diff = "--- a/../etc/passwd\n+++ b/../etc/passwd\n@@ -1 +1 @@\n-x\n+y\n";
        assert!(matches!(
            apply_to_dir(diff.as_bytes(), dir.path(), ApplyOptions::default()),
            Err(ApplyError::UnsafePath(_))
        ));
    }

    #[test]
    fn test_no_newline_marker() {
        let dir = setup("a\nb\n");
        let diff = "--- a/netdev.c\n+++ b/netdev.c\n@@ -1,2 +1,2 @@\n a\n-b\n+c\n\\ No newline at end of file\n";
        apply_to_dir(diff.as_bytes(), dir.path(), ApplyOptions::default()).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("netdev.c")).unwrap(), "a\nc");
    }

    #[test]
    fn test_two_hunks_shift() {
        let original: String = (1..=20).map(|i| format!("line{}\n", i)).collect();
        let dir = setup(&original);
        let diff = "--- a/netdev.c\n+++ b/netdev.c\n\
                    @@ -2,2 +2,3 @@\n line2\n+inserted\n line3\n\
                    @@ -15,2 +16,1 @@\n line15\n-line16\n";
        apply_to_dir(diff.as_bytes(), dir.path(), ApplyOptions::default()).unwrap();
        let patched = fs::read_to_string(dir.path().join("netdev.c")).unwrap();
        assert!(patched.contains("line2\ninserted\nline3\n"));
        assert!(patched.contains("line15\nline17\n"));
    }
}
