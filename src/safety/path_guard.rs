//! Containment checks for paths built from request data.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::error::PathError;

/// Resolve `candidate` and require it to be `root` or nested under it.
///
/// Symlinks and `..` segments are resolved before the comparison. The
/// candidate does not have to exist: missing trailing components are
/// normalized lexically on top of the deepest existing ancestor, so a
/// missing file inside the root still resolves and the caller decides
/// whether absence is an error.
pub fn resolve(root: &Path, candidate: &Path) -> Result<PathBuf, PathError> {
    let canonical_root = canonicalize_lenient(root)?;
    let canonical = canonicalize_lenient(candidate)?;

    if !canonical.starts_with(&canonical_root) {
        return Err(PathError::Escape {
            root: canonical_root,
            candidate: canonical,
        });
    }

    Ok(canonical)
}

/// Canonicalize the existing part of `path` and lexically normalize the rest.
fn canonicalize_lenient(path: &Path) -> Result<PathBuf, PathError> {
    let absolute = std::path::absolute(path).map_err(|e| PathError::Resolve {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut resolved = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(name) => {
                let next = resolved.join(name);
                match std::fs::symlink_metadata(&next) {
                    Ok(_) => {
                        resolved = next.canonicalize().map_err(|e| PathError::Resolve {
                            path: next.clone(),
                            source: e,
                        })?;
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => resolved = next,
                    Err(e) => {
                        return Err(PathError::Resolve {
                            path: next,
                            source: e,
                        });
                    }
                }
            }
        }
    }

    Ok(resolved)
}
