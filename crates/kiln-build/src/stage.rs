//! Staging: cleaning the output tree and copying sources into it.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::SiteConfig;
use crate::error::BuildError;
use crate::kind::{CleanTarget, Kind};

/// Cleans and populates the output tree for one kind at a time.
pub struct Stager<'a> {
    config: &'a SiteConfig,
}

impl<'a> Stager<'a> {
    pub fn new(config: &'a SiteConfig) -> Self {
        Self { config }
    }

    /// Remove the files of `target` from the output tree.
    ///
    /// Directory-scoped kinds lose every directory of their name at any
    /// depth; `html` loses every page. Nothing of another kind is touched.
    /// Returns the number of entries removed.
    pub fn clean(&self, target: CleanTarget) -> Result<usize, BuildError> {
        let output = self.config.output_dir();
        if !output.exists() {
            return Ok(0);
        }

        let doomed = match target {
            CleanTarget::All => {
                fs::remove_dir_all(&output).map_err(|e| BuildError::write(&output, e))?;
                return Ok(1);
            }
            CleanTarget::Kind(kind) => match kind.dir_name() {
                Some(dir) => directories_named(&output, dir)?,
                None => owned_files(&output, kind)?,
            },
        };

        for path in &doomed {
            let result = if path.is_dir() {
                fs::remove_dir_all(path)
            } else {
                fs::remove_file(path)
            };
            result.map_err(|e| BuildError::write(path, e))?;
        }

        Ok(doomed.len())
    }

    /// Copy every source file of `kind` into the output tree, preserving
    /// relative paths. Returns the number of files copied.
    pub fn stage(&self, kind: Kind) -> Result<usize, BuildError> {
        let source = self.config.source_dir();
        let output = self.config.output_dir();

        if !source.is_dir() {
            return Err(BuildError::missing(&source));
        }

        let mut copied = 0;

        if kind == Kind::Html {
            for page in &self.config.paths.root_pages {
                let from = self.config.root.join(page);
                if !from.is_file() {
                    return Err(BuildError::missing(&from));
                }
                copy_file(&from, &output.join(page))?;
                copied += 1;
            }
        }

        for from in owned_files(&source, kind)? {
            let relative = from.strip_prefix(&source).unwrap_or(&from);
            copy_file(&from, &output.join(relative))?;
            copied += 1;
        }

        Ok(copied)
    }
}

fn copy_file(from: &Path, to: &Path) -> Result<(), BuildError> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|e| BuildError::write(parent, e))?;
    }
    fs::copy(from, to).map_err(|e| BuildError::read(from, e))?;
    Ok(())
}

/// Every file below `base` that `kind` owns, in sorted walk order.
fn owned_files(base: &Path, kind: Kind) -> Result<Vec<PathBuf>, BuildError> {
    let mut files = Vec::new();

    for entry in WalkDir::new(base).sort_by_file_name() {
        let entry = entry.map_err(|e| BuildError::read(base, e))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(base).unwrap_or(entry.path());
        if kind.owns(relative) {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}

/// Outermost directories below `base` named `name`.
fn directories_named(base: &Path, name: &str) -> Result<Vec<PathBuf>, BuildError> {
    let mut dirs = Vec::new();
    let mut walker = WalkDir::new(base).min_depth(1).sort_by_file_name().into_iter();

    while let Some(entry) = walker.next() {
        let entry = entry.map_err(|e| BuildError::read(base, e))?;
        if entry.file_type().is_dir() && entry.file_name() == name {
            dirs.push(entry.into_path());
            walker.skip_current_dir();
        }
    }

    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// Snapshot of every file under `dir`: relative path -> contents.
    fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                (
                    e.path().strip_prefix(dir).unwrap().to_path_buf(),
                    fs::read(e.path()).unwrap(),
                )
            })
            .collect()
    }

    fn site() -> (tempfile::TempDir, SiteConfig) {
        let temp = tempdir().unwrap();
        let root = temp.path();
        write(&root.join("index.html"), "<h1>home</h1>");
        write(&root.join("src/pizza/pizza.html"), "<h1>pizza</h1>");
        write(&root.join("src/pizza/css/main/a.css"), ".a{}");
        write(&root.join("src/pizza/js/bundle/a.js"), "var a;");
        write(&root.join("src/pizza/images/p.jpg"), "jpg");
        let config = SiteConfig::with_root(root);
        (temp, config)
    }

    #[test]
    fn stages_each_kind_into_matching_paths() {
        let (temp, config) = site();
        let stager = Stager::new(&config);
        let dist = temp.path().join("dist");

        assert_eq!(stager.stage(Kind::Html).unwrap(), 2);
        assert_eq!(stager.stage(Kind::Css).unwrap(), 1);

        assert!(dist.join("index.html").exists());
        assert!(dist.join("pizza/pizza.html").exists());
        assert!(dist.join("pizza/css/main/a.css").exists());
        assert!(!dist.join("pizza/js").exists());
    }

    #[test]
    fn cleaning_one_kind_leaves_others_identical() {
        let (temp, config) = site();
        let stager = Stager::new(&config);
        let dist = temp.path().join("dist");
        for kind in Kind::ALL {
            stager.stage(kind).unwrap();
        }

        for kind in Kind::ALL {
            let before = snapshot(&dist);
            stager.clean(CleanTarget::Kind(kind)).unwrap();
            let after = snapshot(&dist);

            for (path, contents) in &before {
                if kind.owns(path) {
                    assert!(!after.contains_key(path), "{} survived", path.display());
                } else {
                    assert_eq!(after.get(path), Some(contents), "{} changed", path.display());
                }
            }

            stager.stage(kind).unwrap();
        }
    }

    #[test]
    fn clean_all_removes_output_tree() {
        let (temp, config) = site();
        let stager = Stager::new(&config);
        stager.stage(Kind::Css).unwrap();

        stager.clean(CleanTarget::All).unwrap();

        assert!(!temp.path().join("dist").exists());
    }

    #[test]
    fn cleaning_missing_output_is_a_no_op() {
        let (_temp, config) = site();
        assert_eq!(Stager::new(&config).clean(CleanTarget::Kind(Kind::Js)).unwrap(), 0);
    }

    #[test]
    fn missing_root_page_is_fatal() {
        let (temp, config) = site();
        fs::remove_file(temp.path().join("index.html")).unwrap();

        let result = Stager::new(&config).stage(Kind::Html);
        assert!(matches!(result, Err(BuildError::SourceMissing(_))));
    }

    #[test]
    fn missing_source_tree_is_fatal() {
        let temp = tempdir().unwrap();
        let config = SiteConfig::with_root(temp.path());

        let result = Stager::new(&config).stage(Kind::Css);
        assert!(matches!(result, Err(BuildError::SourceMissing(_))));
    }
}
