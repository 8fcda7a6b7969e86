use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::eval::ValidationContext;
use crate::exec::ExecOptions;

/// Embedded default configuration.
const DEFAULT_CONFIG: &str = include_str!("../config.default.toml");

fn default_true() -> bool {
    true
}

fn default_max_segments() -> usize {
    8
}

fn default_max_output_bytes() -> usize {
    1_048_576
}

fn default_free_text_flags() -> Vec<String> {
    vec!["-m".into(), "--message".into()]
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_kill_grace_ms() -> u64 {
    500
}

fn default_log_level() -> String {
    "info".into()
}

// ── Final (merged) config types ──

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub commands: Commands,
    #[serde(default)]
    pub policy: SafeShellConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Containment root; `~` is expanded. Empty means the directory the
    /// engine was started in, never a directory named by a request.
    #[serde(default)]
    pub base_dir: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Time between SIGTERM and SIGKILL when a run is interrupted.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_dir: String::new(),
            timeout_ms: default_timeout_ms(),
            kill_grace_ms: default_kill_grace_ms(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Commands {
    /// Exact program names the agent may run.
    #[serde(default)]
    pub allow: Vec<String>,
}

/// Feature toggles and limits enforced by the validator and executor.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SafeShellConfig {
    #[serde(default = "default_true")]
    pub allow_pipes: bool,
    #[serde(default = "default_true")]
    pub allow_chaining: bool,
    #[serde(default = "default_true")]
    pub allow_redirection: bool,
    /// Maximum number of commands across the whole input.
    #[serde(default = "default_max_segments")]
    pub max_segments: usize,
    /// Bytes of stdout (and separately stderr) kept per call.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// Flags whose next argument is prose and exempt from path checks.
    #[serde(default = "default_free_text_flags")]
    pub free_text_flags: Vec<String>,
}

impl Default for SafeShellConfig {
    fn default() -> Self {
        Self {
            allow_pipes: true,
            allow_chaining: true,
            allow_redirection: true,
            max_segments: default_max_segments(),
            max_output_bytes: default_max_output_bytes(),
            free_text_flags: default_free_text_flags(),
        }
    }
}

// ── Overlay types (user config that merges with defaults) ──

#[derive(Debug, Deserialize, Default)]
struct ConfigOverlay {
    #[serde(default)]
    settings: SettingsOverlay,
    #[serde(default)]
    commands: CommandsOverlay,
    #[serde(default)]
    policy: PolicyOverlay,
}

#[derive(Debug, Deserialize, Default)]
struct SettingsOverlay {
    base_dir: Option<String>,
    timeout_ms: Option<u64>,
    kill_grace_ms: Option<u64>,
    log_level: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CommandsOverlay {
    #[serde(default)]
    replace: bool,
    #[serde(default)]
    allow: Vec<String>,
    #[serde(default)]
    remove_allow: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct PolicyOverlay {
    #[serde(default)]
    replace: bool,
    allow_pipes: Option<bool>,
    allow_chaining: Option<bool>,
    allow_redirection: Option<bool>,
    max_segments: Option<usize>,
    max_output_bytes: Option<usize>,
    #[serde(default)]
    free_text_flags: Vec<String>,
    #[serde(default)]
    remove_free_text_flags: Vec<String>,
}

// ── Merge logic ──

/// Merge a user list into a default list.
/// In replace mode: user list replaces default entirely.
/// In merge mode: remove items first, then extend with additions (deduped).
fn merge_list(base: &mut Vec<String>, add: Vec<String>, remove: &[String], replace: bool) {
    if replace {
        *base = add;
    } else {
        base.retain(|item| !remove.contains(item));
        for item in add {
            if !base.contains(&item) {
                base.push(item);
            }
        }
    }
}

impl Config {
    /// Load the default embedded configuration.
    pub fn default_config() -> Self {
        toml::from_str(DEFAULT_CONFIG).expect("embedded default config must parse")
    }

    /// Load configuration with resolution order:
    /// 1. Start with embedded defaults
    /// 2. Merge user overlay from ~/.config/cc-safeshell/config.toml (if exists)
    ///
    /// User config merges with defaults: lists extend, scalars override.
    /// Set `replace = true` in a section to replace its lists entirely.
    /// Use `remove_<field>` lists to subtract specific items from defaults.
    pub fn load() -> Self {
        let mut config = Self::default_config();
        if let Some(overlay) = Self::load_overlay() {
            config.apply_overlay(overlay);
        }
        config
    }

    /// Try to load user overlay from ~/.config/cc-safeshell/config.toml.
    fn load_overlay() -> Option<ConfigOverlay> {
        let home = std::env::var_os("HOME")?;
        let path = Path::new(&home).join(".config/cc-safeshell/config.toml");
        let content = std::fs::read_to_string(&path).ok()?;
        match toml::from_str(&content) {
            Ok(overlay) => {
                log::debug!("loaded config overlay from {}", path.display());
                Some(overlay)
            }
            Err(e) => {
                log::warn!("config parse error in {}: {e}", path.display());
                eprintln!("cc-safeshell: config parse error: {e}");
                None
            }
        }
    }

    /// Apply an overlay on top of this config (merge semantics).
    fn apply_overlay(&mut self, overlay: ConfigOverlay) {
        // Settings: scalar overrides
        let s = overlay.settings;
        if let Some(v) = s.base_dir {
            self.settings.base_dir = v;
        }
        if let Some(v) = s.timeout_ms {
            self.settings.timeout_ms = v;
        }
        if let Some(v) = s.kill_grace_ms {
            self.settings.kill_grace_ms = v;
        }
        if let Some(v) = s.log_level {
            self.settings.log_level = v;
        }

        // Commands
        let c = overlay.commands;
        merge_list(
            &mut self.commands.allow,
            c.allow,
            &c.remove_allow,
            c.replace,
        );

        // Policy
        let p = overlay.policy;
        if let Some(v) = p.allow_pipes {
            self.policy.allow_pipes = v;
        }
        if let Some(v) = p.allow_chaining {
            self.policy.allow_chaining = v;
        }
        if let Some(v) = p.allow_redirection {
            self.policy.allow_redirection = v;
        }
        if let Some(v) = p.max_segments {
            self.policy.max_segments = v;
        }
        if let Some(v) = p.max_output_bytes {
            self.policy.max_output_bytes = v;
        }
        merge_list(
            &mut self.policy.free_text_flags,
            p.free_text_flags,
            &p.remove_free_text_flags,
            p.replace,
        );
    }

    /// Apply an overlay from a TOML string. Used for testing.
    #[cfg(test)]
    fn apply_overlay_str(&mut self, toml_str: &str) {
        let overlay: ConfigOverlay = toml::from_str(toml_str).unwrap();
        self.apply_overlay(overlay);
    }

    /// The containment root: `settings.base_dir` with `~` expanded, or `fallback`.
    pub fn base_dir(&self, fallback: &Path) -> PathBuf {
        let raw = self.settings.base_dir.trim();
        if raw.is_empty() {
            return fallback.to_path_buf();
        }
        let expanded = shellexpand::tilde(raw);
        let path = PathBuf::from(expanded.as_ref());
        if path.is_absolute() {
            path
        } else {
            fallback.join(path)
        }
    }

    /// Build the validator's view of this config for a command run in `cwd`.
    ///
    /// `launch_dir` is the directory the engine was started in; it is the
    /// root when `settings.base_dir` is empty. `cwd` itself must then lie
    /// within that root, which [`validate`](crate::eval::validate) checks.
    pub fn validation_context(&self, launch_dir: &Path, cwd: &Path) -> ValidationContext {
        ValidationContext {
            allowed_commands: self.commands.allow.iter().cloned().collect::<HashSet<_>>(),
            base_dir: self.base_dir(launch_dir),
            cwd: cwd.to_path_buf(),
            config: self.policy.clone(),
        }
    }

    /// Build executor options for a command run in `cwd`.
    pub fn exec_options(&self, cwd: &Path) -> ExecOptions {
        ExecOptions {
            cwd: cwd.to_path_buf(),
            timeout: Duration::from_millis(self.settings.timeout_ms),
            abort: None,
            max_output_bytes: self.policy.max_output_bytes,
            kill_grace: Duration::from_millis(self.settings.kill_grace_ms),
        }
    }

    /// `settings.log_level` as a log filter; unknown names fall back to `Info`.
    pub fn log_level(&self) -> log::LevelFilter {
        self.settings
            .log_level
            .parse()
            .unwrap_or(log::LevelFilter::Info)
    }
}
