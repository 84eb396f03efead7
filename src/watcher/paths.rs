//! Lexical path helpers shared by the registry and the dispatch loop.
//!
//! Nothing here touches the filesystem except [`absolutize`], which may
//! consult the current directory. Symlinks are not resolved.

use std::path::{Component, Path, PathBuf};

use super::WatchError;

/// Clean a path lexically: drop `.` segments, fold `..` into its parent and
/// collapse repeated separators.
///
/// `..` above the root stays at the root. `..` at the start of a relative
/// path is preserved.
pub fn clean(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }

    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().collect()
}

/// Normalize a raw backend path into an absolute, root-anchored path.
///
/// Backends may report paths relative to the filesystem root
/// (`foo/bar`) or already absolute (`/foo/bar`); both become `/foo/bar`.
pub fn normalize_event_path(raw: &Path) -> PathBuf {
    clean(&Path::new("/").join(raw))
}

/// Whether `child` is `parent` itself or lives somewhere beneath it.
///
/// Comparison is per component, so `/ab` is not a child of `/a`.
pub fn is_child_of(child: &Path, parent: &Path) -> bool {
    clean(child).starts_with(clean(parent))
}

/// Make a caller-supplied path absolute and clean.
///
/// Relative paths resolve against the current directory.
pub fn absolutize(path: &Path) -> Result<PathBuf, WatchError> {
    if path.as_os_str().is_empty() {
        return Err(WatchError::InvalidPath {
            path: path.to_path_buf(),
            reason: "path is empty".to_string(),
        });
    }

    let absolute = std::path::absolute(path).map_err(|e| WatchError::InvalidPath {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    Ok(clean(&absolute))
}
