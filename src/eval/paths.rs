//! Lexical path resolution and containment. No filesystem access: symlinks
//! are not followed, so the check is about what the agent wrote, not what
//! the disk currently holds.

use std::path::{Component, Path, PathBuf};

/// Does this argument name a filesystem location?
///
/// Flags and URLs are never paths. Anything containing `/`, or the bare
/// directory names `.` and `..`, is.
pub fn looks_like_path(arg: &str) -> bool {
    if arg.starts_with('-') || arg.contains("://") {
        return false;
    }
    arg.contains('/') || arg == "." || arg == ".."
}

/// Collapse `.` and `..` components without touching the filesystem.
/// `..` at the root stays at the root.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            Component::Normal(name) => out.push(name),
        }
    }
    out
}

/// Resolve `path` against `dir` (absolute paths stay as they are) and normalise.
pub fn resolve(dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&dir.join(path))
    }
}

/// Path of `target` relative to `base`, both already normalised.
/// Walks up with `..` where the two diverge.
pub fn relative_to(base: &Path, target: &Path) -> PathBuf {
    let base: Vec<Component> = base.components().collect();
    let target: Vec<Component> = target.components().collect();
    let common = base
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count();

    if common == 0 && target.first().is_some_and(|c| matches!(c, Component::RootDir)) {
        // Nothing shared, not even the root: the relative form is the target itself.
        return target.iter().collect();
    }

    let mut rel = PathBuf::new();
    for _ in common..base.len() {
        rel.push("..");
    }
    for c in &target[common..] {
        rel.push(c.as_os_str());
    }
    rel
}

/// `candidate` is within `base` iff the relative path from `base` to it is
/// empty, or neither starts with `..` nor is absolute.
pub fn is_within(base: &Path, candidate: &Path) -> bool {
    let base = normalize(base);
    let candidate = normalize(candidate);
    let rel = relative_to(&base, &candidate);
    if rel.as_os_str().is_empty() {
        return true;
    }
    !rel.is_absolute() && !matches!(rel.components().next(), Some(Component::ParentDir))
}
