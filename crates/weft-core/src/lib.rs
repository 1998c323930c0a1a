//! # Weft Core
//!
//! Compile-time weaving of tracing hooks into Go builds:
//! - rule descriptors and the immutable [`RuleSet`]
//! - formatting-preserving Go source units
//! - the weaver that applies rules to source units
//! - the `-toolexec` interceptor that feeds woven sources to the compiler
//! - build sessions that prepare a module and restore it afterwards

#![warn(clippy::all)]

pub mod rules;
pub mod session;
pub mod source;
pub mod toolexec;
pub mod weaver;

use std::path::PathBuf;

pub use rules::{GoVersion, Rule, RuleKind, RuleLoadError, RuleSet, VersionRange};
pub use session::{BuildSession, GoToolchain, SessionGuard, SessionState, SetupError, Toolchain};
pub use source::{ParseError, ParseMode, SourceUnit};
pub use toolexec::{Interceptor, ToolexecError};
pub use weaver::{PackageState, PackageWeave, WeaveError, WeaveSummary, Weaver};

/// Weft version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Carries the session's work directory into interceptor processes.
pub const ENV_WORK_DIR: &str = "WEFT_WORK_DIR";
pub const ENV_RULES: &str = "WEFT_RULES";
pub const ENV_NO_BUILTIN_RULES: &str = "WEFT_NO_BUILTIN_RULES";
pub const ENV_RUNTIME_MODULE: &str = "WEFT_RUNTIME_MODULE";
pub const ENV_RUNTIME_VERSION: &str = "WEFT_RUNTIME_VERSION";
pub const ENV_RUNTIME_REPLACE: &str = "WEFT_RUNTIME_REPLACE";
pub const ENV_KEEP_WORK: &str = "WEFT_KEEP_WORK";

/// Initialize tracing on stderr. `default_directive` applies when
/// `RUST_LOG` does not say otherwise.
pub fn init_tracing(default_directive: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    // a second init in the same process keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Weft configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeftConfig {
    /// Work directory, relative to the module root unless absolute
    pub work_dir: PathBuf,
    /// Extra rule descriptor files, loaded after the builtin ones
    pub rule_files: Vec<PathBuf>,
    /// Load the descriptors compiled into the binary
    pub builtin_rules: bool,
    /// Module providing the hook packages
    pub runtime_module: String,
    pub runtime_version: String,
    /// Local checkout to use for the runtime module
    pub runtime_replace: Option<PathBuf>,
    /// Keep woven sources and the work directory after the build
    pub keep_work_dir: bool,
    pub debug: bool,
}

impl Default for WeftConfig {
    fn default() -> Self {
        Self {
            work_dir: ".weft-build".into(),
            rule_files: Vec::new(),
            builtin_rules: true,
            runtime_module: "github.com/weft-go/runtime".to_string(),
            runtime_version: "v0.1.0".to_string(),
            runtime_replace: None,
            keep_work_dir: false,
            debug: false,
        }
    }
}

impl WeftConfig {
    /// Defaults overlaid with the `WEFT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().overlay(|key| std::env::var_os(key))
    }

    /// Overlay settings from `lookup`, keyed by environment variable name.
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<std::ffi::OsString>,
    {
        if let Some(rules) = lookup(ENV_RULES) {
            self.rule_files
                .extend(std::env::split_paths(&rules).filter(|p| !p.as_os_str().is_empty()));
        }
        if let Some(value) = lookup(ENV_NO_BUILTIN_RULES) {
            self.builtin_rules = !parse_flag(ENV_NO_BUILTIN_RULES, &value)?;
        }
        if let Some(dir) = lookup(ENV_WORK_DIR) {
            self.work_dir = dir.into();
        }
        if let Some(module) = lookup(ENV_RUNTIME_MODULE) {
            self.runtime_module = module.to_string_lossy().into_owned();
        }
        if let Some(version) = lookup(ENV_RUNTIME_VERSION) {
            self.runtime_version = version.to_string_lossy().into_owned();
        }
        if let Some(dir) = lookup(ENV_RUNTIME_REPLACE) {
            self.runtime_replace = Some(dir.into());
        }
        if let Some(value) = lookup(ENV_KEEP_WORK) {
            self.keep_work_dir = parse_flag(ENV_KEEP_WORK, &value)?;
        }
        Ok(self)
    }
}

fn parse_flag(key: &str, value: &std::ffi::OsStr) -> Result<bool> {
    match value.to_string_lossy().trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" | "off" => Ok(false),
        "1" | "true" | "yes" | "on" => Ok(true),
        other => Err(WeftError::Config(format!("{key}: expected a boolean, got `{other}`"))),
    }
}

/// Error types for weft operations
#[derive(thiserror::Error, Debug)]
pub enum WeftError {
    #[error(transparent)]
    Rules(#[from] RuleLoadError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Weave(#[from] WeaveError),

    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Toolexec(#[from] ToolexecError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for weft operations
pub type Result<T> = std::result::Result<T, WeftError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::ffi::OsString;

    fn overlay(vars: &[(&str, &str)]) -> Result<WeftConfig> {
        let vars: HashMap<String, OsString> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), OsString::from(v)))
            .collect();
        WeftConfig::default().overlay(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_config_defaults() {
        let config = WeftConfig::default();
        assert!(config.builtin_rules);
        assert_eq!(config.work_dir, PathBuf::from(".weft-build"));
        assert_eq!(overlay(&[]).unwrap(), config);
    }

    #[test]
    fn test_config_overlay() {
        let config = overlay(&[
            (ENV_NO_BUILTIN_RULES, "1"),
            (ENV_KEEP_WORK, "yes"),
            (ENV_RUNTIME_REPLACE, "/src/runtime"),
            (ENV_WORK_DIR, "/tmp/weft-work"),
        ])
        .unwrap();
        assert!(!config.builtin_rules);
        assert!(config.keep_work_dir);
        assert_eq!(config.runtime_replace, Some(PathBuf::from("/src/runtime")));
        assert_eq!(config.work_dir, PathBuf::from("/tmp/weft-work"));
    }

    #[test]
    fn test_config_rejects_bad_flag() {
        let err = overlay(&[(ENV_KEEP_WORK, "maybe")]).unwrap_err();
        assert!(err.to_string().contains(ENV_KEEP_WORK));
    }

    #[cfg(unix)]
    #[test]
    fn test_config_rule_list() {
        let config = overlay(&[(ENV_RULES, "/a/one.yaml:/b/two.yaml")]).unwrap();
        assert_eq!(
            config.rule_files,
            vec![PathBuf::from("/a/one.yaml"), PathBuf::from("/b/two.yaml")]
        );
    }
}
