//! Test file discovery.
//!
//! Expands the command-line paths into an ordered, deduplicated file list and
//! computes the set of files watch mode observes.

use crate::error::DiscoveryError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

/// Directories never descended into.
const SKIPPED_DIRS: &[&str] = &["target", "node_modules", "__pycache__"];

#[derive(Debug, Default)]
pub struct Discovery {
    pub files: Vec<PathBuf>,
    /// Arguments that matched nothing.
    pub unmatched: Vec<PathBuf>,
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.iter().any(|x| x.trim_start_matches('.') == e))
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n != "." && n != "..")
}

fn is_skipped(entry: &DirEntry) -> bool {
    if is_hidden(entry.path()) {
        return true;
    }
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|n| SKIPPED_DIRS.contains(&n))
}

/// Symlinked directories are not followed, so link cycles cannot recurse.
fn collect_dir(dir: &Path, extensions: &[String], recursive: bool, out: &mut Vec<PathBuf>) {
    let walker = WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .max_depth(if recursive { usize::MAX } else { 1 });

    for entry in walker
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_skipped(e))
        .filter_map(|e| e.ok())
    {
        let ty = entry.file_type();
        let is_file = ty.is_file() || (ty.is_symlink() && entry.path().is_file());
        if is_file && has_extension(entry.path(), extensions) {
            out.push(entry.into_path());
        }
    }
}

/// Resolve `args` into test files.
///
/// Files are taken as given, directories expand to their files carrying one of
/// `extensions`. Unmatched arguments are warned about; finding nothing at all
/// is an error.
pub fn resolve_files(
    args: &[PathBuf],
    extensions: &[String],
    recursive: bool,
) -> Result<Discovery, DiscoveryError> {
    let mut discovery = Discovery::default();
    let mut seen = HashSet::new();

    for arg in args {
        let mut found = Vec::new();
        if arg.is_file() {
            found.push(arg.clone());
        } else if arg.is_dir() {
            collect_dir(arg, extensions, recursive, &mut found);
        }

        if found.is_empty() {
            warn!("cannot find any files matching {:?}", arg.display().to_string());
            discovery.unmatched.push(arg.clone());
            continue;
        }
        for file in found {
            let key = file.canonicalize().unwrap_or_else(|_| file.clone());
            if seen.insert(key) {
                discovery.files.push(file);
            }
        }
    }

    if discovery.files.is_empty() {
        return Err(DiscoveryError::NoTestFiles);
    }
    Ok(discovery)
}

/// Files watch mode observes: the test files plus every file under `root`
/// carrying one of `watch_extensions`. Paths are canonical.
pub fn watch_set(root: &Path, files: &[PathBuf], watch_extensions: &[String]) -> Vec<PathBuf> {
    let mut all = files.to_vec();
    collect_dir(root, watch_extensions, true, &mut all);

    let mut seen = HashSet::new();
    all.into_iter()
        .filter_map(|p| p.canonicalize().ok())
        .filter(|p| seen.insert(p.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs::{self, File};
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    fn exts(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_files_anywhere_is_fatal() {
        let dir = tempdir().unwrap();
        let err = resolve_files(
            &[dir.path().join("missing"), dir.path().to_path_buf()],
            &exts(&["tests"]),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, DiscoveryError::NoTestFiles));
        assert_eq!(err.to_string(), "no test files found");
    }

    #[test]
    fn unmatched_arguments_are_reported_but_not_fatal() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.tests");
        File::create(&file).unwrap();
        let missing = dir.path().join("nope.tests");

        let found = resolve_files(&[missing.clone(), file.clone()], &exts(&["tests"]), false)
            .unwrap();
        assert_eq!(found.files, vec![file]);
        assert_eq!(found.unmatched, vec![missing]);
    }

    #[test]
    fn directories_expand_by_extension_and_dedupe() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("nested");
        fs::create_dir(&sub).unwrap();
        let hidden = dir.path().join(".cache");
        fs::create_dir(&hidden).unwrap();
        File::create(dir.path().join("b.tests")).unwrap();
        File::create(dir.path().join("a.tests")).unwrap();
        File::create(dir.path().join("notes.txt")).unwrap();
        File::create(sub.join("c.tests")).unwrap();
        File::create(hidden.join("d.tests")).unwrap();

        let flat = resolve_files(&[dir.path().to_path_buf()], &exts(&["tests"]), false).unwrap();
        assert_eq!(flat.files.len(), 2);
        assert!(flat.files[0].ends_with("a.tests"));

        let args = [dir.path().to_path_buf(), dir.path().join("a.tests")];
        let deep = resolve_files(&args, &exts(&[".tests"]), true).unwrap();
        let names: Vec<_> = deep
            .files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.tests", "b.tests", "c.tests"]);
    }

    #[test]
    fn watch_set_includes_sources_and_tests() {
        let dir = tempdir().unwrap();
        let test = dir.path().join("a.tests");
        let src = dir.path().join("lib.sh");
        let target = dir.path().join("target");
        fs::create_dir(&target).unwrap();
        File::create(&test).unwrap();
        File::create(&src).unwrap();
        File::create(target.join("build.sh")).unwrap();

        let set = watch_set(dir.path(), &[test.clone()], &exts(&["sh"]));
        assert_eq!(set.len(), 2);
        assert!(set.contains(&test.canonicalize().unwrap()));
        assert!(set.contains(&src.canonicalize().unwrap()));
    }

    #[test]
    fn symlinked_directories_are_not_followed() {
        let dir = tempdir().unwrap();
        let test = dir.path().join("a.tests");
        File::create(&test).unwrap();
        symlink(dir.path(), dir.path().join("loop")).unwrap();
        symlink(dir.path(), dir.path().join("loop2")).unwrap();

        let set = watch_set(dir.path(), &[], &exts(&["tests"]));
        assert_eq!(set, vec![test.canonicalize().unwrap()]);

        let found = resolve_files(&[dir.path().to_path_buf()], &exts(&["tests"]), true).unwrap();
        assert_eq!(found.files, vec![test]);
    }

    #[test]
    fn symlinked_test_files_are_kept() {
        let dir = tempdir().unwrap();
        let real = dir.path().join("real.txt");
        File::create(&real).unwrap();
        symlink(&real, dir.path().join("linked.tests")).unwrap();

        let found = resolve_files(&[dir.path().to_path_buf()], &exts(&["tests"]), false).unwrap();
        assert_eq!(found.files, vec![dir.path().join("linked.tests")]);
    }
}
