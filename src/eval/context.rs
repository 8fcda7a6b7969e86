use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::SafeShellConfig;
use crate::eval::paths::{normalize, resolve};

/// Everything the validator needs to judge an AST.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    /// Exact program names that may appear as `argv[0]`.
    pub allowed_commands: HashSet<String>,
    /// Containment root for every referenced path.
    pub base_dir: PathBuf,
    /// Directory relative paths are resolved against.
    pub cwd: PathBuf,
    pub config: SafeShellConfig,
}

impl ValidationContext {
    pub fn new<I, S>(allowed: I, base_dir: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_commands: allowed.into_iter().map(Into::into).collect(),
            base_dir: base_dir.into(),
            cwd: cwd.into(),
            config: SafeShellConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SafeShellConfig) -> Self {
        self.config = config;
        self
    }

    pub fn is_allowed(&self, program: &str) -> bool {
        self.allowed_commands.contains(program)
    }

    /// The allowlist, sorted and comma-joined, for messages.
    pub fn allowed_list(&self) -> String {
        let mut names: Vec<&str> = self.allowed_commands.iter().map(String::as_str).collect();
        names.sort_unstable();
        names.join(", ")
    }

    /// Normalised containment root.
    pub fn root(&self) -> PathBuf {
        normalize(&self.base_dir)
    }

    /// Absolute directory that relative arguments resolve against.
    /// A relative `cwd` is taken relative to the base directory.
    pub fn resolution_dir(&self) -> PathBuf {
        resolve(&self.root(), &self.cwd)
    }

    /// Whether `flag` introduces a free-text argument (commit message etc.).
    pub fn is_free_text_flag(&self, flag: &str) -> bool {
        self.config.free_text_flags.iter().any(|f| f == flag)
    }

    /// Resolve a word against the resolution directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        resolve(&self.resolution_dir(), Path::new(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_list_sorted() {
        let ctx = ValidationContext::new(["git", "cat", "echo"], "/w", "/w");
        assert_eq!(ctx.allowed_list(), "cat, echo, git");
        assert!(ctx.is_allowed("git"));
        assert!(!ctx.is_allowed("/usr/bin/git"));
    }

    #[test]
    fn relative_cwd_resolves_under_base() {
        let ctx = ValidationContext::new(["ls"], "/w", "sub");
        assert_eq!(ctx.resolution_dir(), PathBuf::from("/w/sub"));
        assert_eq!(ctx.resolve("a.txt"), PathBuf::from("/w/sub/a.txt"));
        assert_eq!(ctx.resolve("../b"), PathBuf::from("/w/b"));
    }

    #[test]
    fn free_text_flags_from_config() {
        let ctx = ValidationContext::new(["git"], "/w", "/w");
        assert!(ctx.is_free_text_flag("-m"));
        assert!(ctx.is_free_text_flag("--message"));
        assert!(!ctx.is_free_text_flag("-f"));
    }
}
