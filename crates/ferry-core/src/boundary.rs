//! Output boundary resolution.
//!
//! A target reference is resolved component by component against the real
//! filesystem: every symlink that already exists is followed before the next
//! component is applied, so `..` behaves as it would for the OS. The result
//! must stay under the canonical output root.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// A resolved path escaped the declared output root.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Target '{target}' resolves to '{resolved}', outside the output boundary '{root}'")]
pub struct BoundaryViolation {
    pub target: String,
    pub resolved: PathBuf,
    pub root: PathBuf,
}

/// Errors resolving the output root itself.
#[derive(Error, Debug)]
pub enum BoundaryError {
    #[error("Cannot resolve output root {path}: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The canonical output root a run writes under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputBoundary {
    root: PathBuf,
}

impl OutputBoundary {
    /// Resolve `root` to an absolute, symlink-free path.
    ///
    /// A root that does not exist yet (dry runs) is made absolute lexically
    /// from its deepest existing ancestor.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, BoundaryError> {
        let root = root.as_ref();
        let absolute = std::path::absolute(root).map_err(|source| BoundaryError::Root {
            path: root.to_path_buf(),
            source,
        })?;
        let resolved = resolve_physical(Path::new("/"), &absolute).ok_or_else(|| {
            BoundaryError::Root {
                path: root.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "unresolvable symlink"),
            }
        })?;
        Ok(Self { root: resolved })
    }

    /// Create the root on disk, then resolve it.
    pub fn create(root: impl AsRef<Path>) -> Result<Self, BoundaryError> {
        let root = root.as_ref();
        fs::create_dir_all(root).map_err(|source| BoundaryError::Root {
            path: root.to_path_buf(),
            source,
        })?;
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a step's target reference and check it stays under the root.
    pub fn resolve(&self, target: &str) -> Result<PathBuf, BoundaryViolation> {
        let violation = |resolved: PathBuf| BoundaryViolation {
            target: target.to_string(),
            resolved,
            root: self.root.clone(),
        };

        let resolved = resolve_physical(&self.root, Path::new(target))
            .ok_or_else(|| violation(self.root.join(target)))?;

        if resolved.starts_with(&self.root) && resolved != self.root {
            Ok(resolved)
        } else {
            Err(violation(resolved))
        }
    }
}

/// Cheap lexical check used before any generation happens.
///
/// Rejects absolute targets, targets that climb above the root at any point
/// and targets that normalize to the root itself. `app/../lib/a.ts` passes.
/// The full resolution in [`OutputBoundary::resolve`] still runs before writing.
pub fn lexically_escapes(target: &str) -> bool {
    let mut depth: usize = 0;
    for component in Path::new(target).components() {
        match component {
            Component::Prefix(_) | Component::RootDir => return true,
            Component::CurDir => {}
            Component::ParentDir => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return true,
            },
            Component::Normal(_) => depth += 1,
        }
    }
    depth == 0
}

/// Walk `relative` from `base`, following existing symlinks as they appear.
///
/// Returns `None` when a symlink cannot be resolved (dangling or looping).
fn resolve_physical(base: &Path, relative: &Path) -> Option<PathBuf> {
    let mut current = base.to_path_buf();

    for component in relative.components() {
        match component {
            Component::Prefix(prefix) => current = PathBuf::from(prefix.as_os_str()),
            Component::RootDir => current.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                current.pop();
            }
            Component::Normal(name) => {
                current.push(name);
                match fs::symlink_metadata(&current) {
                    Ok(meta) if meta.file_type().is_symlink() => {
                        current = fs::canonicalize(&current).ok()?;
                    }
                    _ => {}
                }
            }
        }
    }

    Some(current)
}
