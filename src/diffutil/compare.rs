//! Directory tree comparison and copying.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::split_lines;

/// True when two lines differ only in ASCII whitespace.
pub fn lines_equal_ignoring_whitespace(a: &[u8], b: &[u8]) -> bool {
    a.iter()
        .filter(|c| !c.is_ascii_whitespace())
        .eq(b.iter().filter(|c| !c.is_ascii_whitespace()))
}

fn files_equal_ignoring_whitespace(a: &[u8], b: &[u8]) -> bool {
    if a == b {
        return true;
    }
    let mut left = split_lines(a).into_iter();
    let mut right = split_lines(b).into_iter();
    loop {
        match (left.next(), right.next()) {
            (None, None) => return true,
            (Some(x), Some(y)) if lines_equal_ignoring_whitespace(x, y) => {}
            _ => return false,
        }
    }
}

fn relative_files(root: &Path) -> io::Result<BTreeSet<PathBuf>> {
    let mut files = BTreeSet::new();
    if !root.exists() {
        return Ok(files);
    }
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        if entry.file_type().is_file() {
            if let Ok(rel) = entry.path().strip_prefix(root) {
                files.insert(rel.to_path_buf());
            }
        }
    }
    Ok(files)
}

/// Compare two trees file by file, ignoring whitespace within lines.
///
/// Returns the relative paths that differ, including files present on one
/// side only. An empty result means the trees are equivalent.
pub fn compare_trees(a: &Path, b: &Path) -> io::Result<Vec<PathBuf>> {
    let left = relative_files(a)?;
    let right = relative_files(b)?;
    let mut differing = Vec::new();

    for rel in left.union(&right) {
        if !left.contains(rel) || !right.contains(rel) {
            differing.push(rel.clone());
            continue;
        }
        let x = fs::read(a.join(rel))?;
        let y = fs::read(b.join(rel))?;
        if !files_equal_ignoring_whitespace(&x, &y) {
            differing.push(rel.clone());
        }
    }
    Ok(differing)
}

/// Copy the regular files and directories of `src` into `dest`.
pub fn copy_tree(src: &Path, dest: &Path) -> io::Result<()> {
    fs::create_dir_all(dest)?;
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let rel = match entry.path().strip_prefix(src) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel,
            _ => continue,
        };
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
