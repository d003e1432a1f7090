//! Project intake
//!
//! Finds the Solidity sources of a project, picks its entry point and names the
//! artifact written for it.

use crate::error::{Error, Result};
use crate::parser::SourceFile;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default directory artifacts are written to
pub const OUTPUT_DIR: &str = "outputs";

/// Extension of HPG artifact files
pub const ARTIFACT_EXTENSION: &str = "hpg.json";

lazy_static::lazy_static! {
    static ref IMPORT_PATTERN: Regex =
        Regex::new(r#"import\s+(?:[^;]*?from\s+)?['"]([^'"]+)['"];?"#)
            .expect("import pattern is valid");
    static ref SLUG_SEPARATOR: Regex = Regex::new(r"[^0-9A-Za-z]+").expect("slug pattern is valid");
}

fn is_solidity(path: &Path) -> bool {
    path.extension().map(|e| e == "sol").unwrap_or(false)
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| Error::io(dir, e))?.path();
        if path.is_dir() {
            walk(&path, out)?;
        } else if is_solidity(&path) {
            out.push(path);
        }
    }
    Ok(())
}

/// Solidity files of a project
///
/// A single `.sol` file yields itself; a directory yields every `*.sol` file
/// beneath it, sorted. Paths are canonicalized.
pub fn collect_sources(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        return Err(Error::InvalidSourcePath(format!(
            "project path does not exist: {}",
            path.display()
        )));
    }
    if path.is_file() {
        if !is_solidity(path) {
            return Err(Error::InvalidSourcePath(format!(
                "file is not a Solidity source: {}",
                path.display()
            )));
        }
        let canonical = path.canonicalize().map_err(|e| Error::io(path, e))?;
        return Ok(vec![canonical]);
    }
    if !path.is_dir() {
        return Err(Error::InvalidSourcePath(format!(
            "project path must be a Solidity file or directory: {}",
            path.display()
        )));
    }

    let mut files = Vec::new();
    walk(path, &mut files)?;
    let mut files = files
        .into_iter()
        .map(|f| f.canonicalize().map_err(|e| Error::io(&f, e)))
        .collect::<Result<Vec<_>>>()?;
    files.sort();
    debug!(path = %path.display(), files = files.len(), "collected sources");
    Ok(files)
}

/// Import targets of `content` that exist relative to `file`
fn resolve_imports(file: &Path, content: &str) -> Vec<PathBuf> {
    let Some(dir) = file.parent() else {
        return Vec::new();
    };
    IMPORT_PATTERN
        .captures_iter(content)
        .filter_map(|cap| cap.get(1))
        .map(|m| m.as_str().trim())
        .filter(|p| !p.is_empty())
        .filter_map(|p| dir.join(p).canonicalize().ok())
        .collect()
}

/// The first file no other file imports, else the first file
pub fn select_entry_point(files: &[PathBuf]) -> Option<PathBuf> {
    if files.len() <= 1 {
        return files.first().cloned();
    }
    let mut imported = HashSet::new();
    for file in files {
        // Unreadable files simply import nothing
        if let Ok(content) = std::fs::read_to_string(file) {
            imported.extend(resolve_imports(file, &content));
        }
    }
    files
        .iter()
        .find(|f| {
            let canonical = f.canonicalize().unwrap_or_else(|_| f.to_path_buf());
            !imported.contains(&canonical)
        })
        .or_else(|| files.first())
        .cloned()
}

/// Artifact file name for a project path
///
/// The slug is the path relative to the working directory (absolute when it
/// lies outside), with every run of non-alphanumerics collapsed to `_`.
pub fn artifact_file_name(project_path: &Path) -> String {
    let resolved = project_path
        .canonicalize()
        .unwrap_or_else(|_| project_path.to_path_buf());
    let source = std::env::current_dir()
        .ok()
        .and_then(|cwd| cwd.canonicalize().ok())
        .and_then(|cwd| resolved.strip_prefix(cwd).ok().map(Path::to_path_buf))
        .unwrap_or(resolved);
    slug_file_name(&source.to_string_lossy())
}

fn slug_file_name(source: &str) -> String {
    let slug = SLUG_SEPARATOR.replace_all(source, "_");
    let slug = slug.trim_matches('_');
    let slug = if slug.is_empty() { "project" } else { slug };
    format!("{}.{}", slug, ARTIFACT_EXTENSION)
}

/// Default artifact location for a project: `outputs/<slug>.hpg.json`
pub fn default_artifact_path(project_path: &Path) -> PathBuf {
    Path::new(OUTPUT_DIR).join(artifact_file_name(project_path))
}

/// Read every file into memory, paths kept as given
pub fn load_sources(files: &[PathBuf]) -> Result<Vec<SourceFile>> {
    files
        .iter()
        .map(|f| {
            let content = std::fs::read_to_string(f).map_err(|e| Error::io(f, e))?;
            Ok(SourceFile::new(f.display().to_string(), content))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_collect_sources_sorted_and_recursive() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("b.sol"), "").unwrap();
        fs::write(dir.path().join("a.sol"), "").unwrap();
        fs::write(dir.path().join("lib/c.sol"), "").unwrap();
        fs::write(dir.path().join("notes.md"), "").unwrap();

        let files = collect_sources(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.sol", "b.sol", "c.sol"]);
    }

    #[test]
    fn test_non_solidity_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readme.txt");
        fs::write(&path, "").unwrap();
        assert!(matches!(
            collect_sources(&path),
            Err(Error::InvalidSourcePath(_))
        ));
        assert!(collect_sources(&dir.path().join("missing.sol")).is_err());
    }

    #[test]
    fn test_entry_point_is_not_imported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("A.sol"), "contract A {}").unwrap();
        fs::write(
            dir.path().join("B.sol"),
            "import \"./A.sol\";\ncontract B is A {}",
        )
        .unwrap();
        let files = collect_sources(dir.path()).unwrap();
        let entry = select_entry_point(&files).unwrap();
        assert_eq!(entry.file_name().unwrap(), "B.sol");
    }

    #[test]
    fn test_entry_point_falls_back_to_first() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("A.sol"), "import {B} from './B.sol';").unwrap();
        fs::write(dir.path().join("B.sol"), "import './A.sol';").unwrap();
        let files = collect_sources(dir.path()).unwrap();
        assert_eq!(select_entry_point(&files), Some(files[0].clone()));
        assert_eq!(select_entry_point(&[]), None);
    }

    #[test]
    fn test_slug_file_name() {
        assert_eq!(slug_file_name("contracts/My Vault"), "contracts_My_Vault.hpg.json");
        assert_eq!(slug_file_name("/tmp/x.sol"), "tmp_x_sol.hpg.json");
        assert_eq!(slug_file_name("///"), "project.hpg.json");
        assert_eq!(
            default_artifact_path(Path::new("/nonexistent/p")),
            Path::new(OUTPUT_DIR).join("nonexistent_p.hpg.json")
        );
    }
}
