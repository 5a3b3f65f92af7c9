use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use glob::glob;
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::{DirEntry, WalkDir};

use crate::batch::{CancellationSource, CancellationToken};

const BINARY_CHECK_BYTES: usize = 4096;

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub path: PathBuf,
    pub is_probably_binary: bool,
}

/// Resolve explicit targets plus glob patterns to a deduplicated, sorted
/// list of candidate files. Hidden files are skipped unless requested;
/// exclude patterns apply to both sources.
pub fn resolve_targets(
    explicit: &[PathBuf],
    globs: &[String],
    include_hidden: bool,
    exclude_patterns: &[String],
) -> Result<Vec<FileEntry>> {
    let exclude = build_exclude_globs(exclude_patterns)?;
    let mut entries = Vec::new();

    for path in explicit {
        append_path(path, include_hidden, exclude.as_ref(), &mut entries)
            .with_context(|| format!("processing target {}", path.display()))?;
    }

    for pattern in globs {
        let matches =
            glob(pattern).map_err(|err| anyhow!("invalid glob pattern '{pattern}': {err}"))?;
        for entry in matches {
            let path =
                entry.map_err(|err| anyhow!("error reading matches for '{pattern}': {err}"))?;
            append_path(&path, include_hidden, exclude.as_ref(), &mut entries)
                .with_context(|| format!("processing match {}", path.display()))?;
        }
    }

    if entries.is_empty() {
        bail!("no files matched; provide --target or --glob");
    }

    entries.sort_by(|a, b| a.path.cmp(&b.path));
    entries.dedup_by(|a, b| a.path == b.path);
    Ok(entries)
}

fn append_path(
    path: &Path,
    include_hidden: bool,
    exclude: Option<&GlobSet>,
    acc: &mut Vec<FileEntry>,
) -> Result<()> {
    let metadata = fs::metadata(path)
        .with_context(|| format!("unable to read metadata for {}", path.display()))?;

    if metadata.is_dir() {
        let walker = WalkDir::new(path)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| include_hidden || !is_hidden(entry));
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.into_path();
            if should_skip(&path, include_hidden, exclude) {
                continue;
            }
            acc.push(FileEntry {
                is_probably_binary: detect_binary(&path)?,
                path,
            });
        }
        return Ok(());
    }

    if metadata.is_file() && !should_skip(path, include_hidden, exclude) {
        acc.push(FileEntry {
            is_probably_binary: detect_binary(path)?,
            path: path.to_path_buf(),
        });
    }

    Ok(())
}

fn should_skip(path: &Path, include_hidden: bool, exclude: Option<&GlobSet>) -> bool {
    if !include_hidden && path_components_start_with_dot(path) {
        return true;
    }

    if let Some(set) = exclude {
        let candidate = path.to_string_lossy().replace('\\', "/");
        return set.is_match(candidate.as_str());
    }

    false
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

fn path_components_start_with_dot(path: &Path) -> bool {
    path.components().any(|component| {
        component
            .as_os_str()
            .to_str()
            .map(|segment| segment.starts_with('.') && segment != "." && segment != "..")
            .unwrap_or(false)
    })
}

fn detect_binary(path: &Path) -> Result<bool> {
    let mut file = fs::File::open(path)
        .with_context(|| format!("opening '{}' for binary detection", path.display()))?;
    let mut buf = [0u8; BINARY_CHECK_BYTES];
    let read = file.read(&mut buf)?;
    Ok(buf[..read].contains(&0))
}

fn build_exclude_globs(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob =
            Glob::new(pattern).map_err(|err| anyhow!("invalid exclude glob '{pattern}': {err}"))?;
        builder.add(glob);
    }

    builder
        .build()
        .map(Some)
        .map_err(|err| anyhow!("unable to build exclude globs: {err}"))
}

/// Relative path from a file to its owning package's `src` directory, found
/// by walking up to the nearest `package.json`. Empty when no package root
/// exists or the walk escapes into a `packages` directory.
pub fn path_to_package_root(path: &Path) -> String {
    let Some(package_json) = find_package_json(path) else {
        return String::new();
    };
    let Some(package_dir) = package_json.parent() else {
        return String::new();
    };
    relative_path(path, &package_dir.join("src"))
}

fn find_package_json(path: &Path) -> Option<PathBuf> {
    let mut directory = path.parent()?.to_path_buf();
    loop {
        let candidate = directory.join("package.json");
        if candidate.exists() {
            if directory.ends_with("packages") {
                // Walked past every real package without a hit.
                return None;
            }
            return Some(candidate);
        }
        if !directory.pop() {
            return None;
        }
    }
}

fn relative_path(from_file: &Path, to_dir: &Path) -> String {
    let from_components: Vec<Component<'_>> = from_file
        .parent()
        .map(|parent| parent.components().collect())
        .unwrap_or_default();
    let to_components: Vec<Component<'_>> = to_dir.components().collect();

    let mut shared = 0;
    while shared < from_components.len()
        && shared < to_components.len()
        && from_components[shared] == to_components[shared]
    {
        shared += 1;
    }

    let mut parts: Vec<String> = Vec::new();
    for _ in shared..from_components.len() {
        parts.push("..".to_string());
    }
    for component in &to_components[shared..] {
        parts.push(component.as_os_str().to_string_lossy().into_owned());
    }
    if parts.is_empty() {
        return ".".to_string();
    }
    parts.join("/")
}

/// Holder for the single in-flight search. Beginning a new search cancels
/// and replaces the previous cancellation source, so a superseded search can
/// never deliver its results.
#[derive(Default)]
pub struct SearchSession {
    current: Option<CancellationSource>,
}

impl SearchSession {
    pub fn new() -> SearchSession {
        SearchSession { current: None }
    }

    pub fn begin(&mut self) -> CancellationToken {
        if let Some(previous) = self.current.take() {
            previous.cancel();
        }
        let source = CancellationSource::new();
        let token = source.token();
        self.current = Some(source);
        token
    }
}

/// Filter candidate files to those containing `needle`, checking the token
/// before each file. Returns `None` when the search was superseded.
pub fn search_files(
    entries: &[FileEntry],
    needle: Option<&str>,
    token: &CancellationToken,
) -> Result<Option<Vec<PathBuf>>> {
    let Some(needle) = needle.filter(|needle| !needle.is_empty()) else {
        return Ok(Some(entries.iter().map(|e| e.path.clone()).collect()));
    };

    let mut matched = Vec::new();
    for entry in entries {
        if token.is_cancelled() {
            return Ok(None);
        }
        if entry.is_probably_binary {
            continue;
        }
        let contents = fs::read_to_string(&entry.path)
            .with_context(|| format!("reading {}", entry.path.display()))?;
        if contents.contains(needle) {
            matched.push(entry.path.clone());
        }
    }
    Ok(Some(matched))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn hidden_components_are_detected() {
        assert!(path_components_start_with_dot(Path::new("a/.git/config")));
        assert!(!path_components_start_with_dot(Path::new("a/b/c.ts")));
        assert!(!path_components_start_with_dot(Path::new("./a/b.ts")));
    }

    #[test]
    fn relative_path_walks_up_and_down() {
        assert_eq!(
            relative_path(Path::new("/repo/lib/deep/file.ts"), Path::new("/repo/src")),
            "../../src"
        );
        assert_eq!(
            relative_path(Path::new("/repo/src/file.ts"), Path::new("/repo/src")),
            "."
        );
    }

    #[test]
    fn package_root_found_from_nested_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        fs::write(root.join("package.json"), "{}").expect("write package.json");
        fs::create_dir_all(root.join("src/nested")).expect("mkdir");
        let file = root.join("src/nested/a.ts");
        fs::write(&file, "const a = 1;").expect("write file");

        assert_eq!(path_to_package_root(&file), "..");
    }

    #[test]
    fn missing_package_json_yields_empty_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("a.ts");
        fs::write(&file, "const a = 1;").expect("write file");
        // The tempdir itself has no package.json; the walk may still find one
        // above it on exotic systems, so only assert on the common case.
        let root = path_to_package_root(&file);
        assert!(root.is_empty() || root.contains("src"));
    }

    #[test]
    fn new_search_cancels_the_previous_one() {
        let mut session = SearchSession::new();
        let first = session.begin();
        assert!(!first.is_cancelled());
        let second = session.begin();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }

    #[test]
    fn cancelled_search_reports_no_results() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("a.ts");
        fs::write(&file, "needle").expect("write file");
        let entries = vec![FileEntry {
            path: file,
            is_probably_binary: false,
        }];

        let source = CancellationSource::new();
        let token = source.token();
        source.cancel();
        let result = search_files(&entries, Some("needle"), &token).expect("search");
        assert!(result.is_none());
    }

    #[test]
    fn search_filters_by_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let with = dir.path().join("with.ts");
        let without = dir.path().join("without.ts");
        fs::write(&with, "const marker = 1;").expect("write");
        fs::write(&without, "const other = 2;").expect("write");
        let entries = resolve_targets(&[dir.path().to_path_buf()], &[], false, &[])
            .expect("resolve");

        let source = CancellationSource::new();
        let matched = search_files(&entries, Some("marker"), &source.token())
            .expect("search")
            .expect("not cancelled");
        assert_eq!(matched, vec![with]);
    }
}
