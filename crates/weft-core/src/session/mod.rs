/*!
# Build Session

Prepares a Go module for a woven build and puts it back afterwards.

A session backs up `go.mod`/`go.sum`, registers the runtime module, drops a
registration file into every main package so hook packages join the build
graph, and records itself in `session.json` for the interceptor processes.
The returned [`SessionGuard`] undoes all of it when dropped, so cleanup runs
on success, on error and during panic unwinding. SIGINT/SIGTERM are latched
while the build runs so the guard still gets to run.
*/

pub mod gomod;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use gomod::{find_main_packages, find_module_root, parse_requires, GoToolchain, Toolchain};

use crate::rules::{GoVersion, RuleLoadError, RuleSet};
use crate::source::builder::import_spec;
use crate::WeftConfig;

pub const SESSION_FILE: &str = "session.json";
pub const REGISTRATION_FILE: &str = "weft_registration.go";
const BACKUP_DIR: &str = "backup";
const MANIFESTS: &[&str] = &["go.mod", "go.sum"];
const GO_SUBCOMMANDS: &[&str] = &["build", "install", "run", "test", "vet"];

#[derive(thiserror::Error, Debug)]
pub enum SetupError {
    #[error("no go.mod found at or above {0}")]
    NoModule(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed: {stderr}")]
    GoCommand { command: String, stderr: String },

    #[error("invalid session state: {0}")]
    State(String),

    #[error("no session to restore in {0}")]
    NoSession(PathBuf),

    #[error("`-toolexec` is already set; weft provides its own")]
    ToolexecConflict,

    #[error("no go subcommand in build arguments")]
    NoSubcommand,

    #[error(transparent)]
    Rules(#[from] RuleLoadError),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SetupError + '_ {
    move |source| SetupError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestBackup {
    pub original: PathBuf,
    pub backup: PathBuf,
    /// `false` when the manifest did not exist and must be removed on restore.
    pub existed: bool,
}

/// Everything interceptor processes need to know about the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub weft_version: String,
    pub module_root: PathBuf,
    pub work_dir: PathBuf,
    pub rule_files: Vec<PathBuf>,
    pub builtin_rules: bool,
    pub fingerprint: String,
    pub go_version: Option<String>,
    /// Module path → version, from go.mod.
    pub modules: BTreeMap<String, String>,
    pub registration_files: Vec<PathBuf>,
    pub backups: Vec<ManifestBackup>,
}

impl SessionState {
    pub fn path(work_dir: &Path) -> PathBuf {
        work_dir.join(SESSION_FILE)
    }

    pub fn load(work_dir: &Path) -> Result<Option<Self>, SetupError> {
        let path = Self::path(work_dir);
        if !path.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path).map_err(io_err(&path))?;
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| SetupError::State(format!("{}: {e}", path.display())))
    }

    pub fn save(&self) -> Result<(), SetupError> {
        let path = Self::path(&self.work_dir);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| SetupError::State(e.to_string()))?;
        fs::write(&path, json).map_err(io_err(&path))
    }

    /// Version of the package at `import_path`: the toolchain version for
    /// standard library packages, otherwise the version of the longest
    /// module path containing it.
    pub fn package_version(&self, import_path: &str) -> Option<GoVersion> {
        let first = import_path.split('/').next().unwrap_or_default();
        if !first.contains('.') && !self.modules.contains_key(first) {
            return self.go_version.as_deref().and_then(GoVersion::parse);
        }
        self.modules
            .iter()
            .filter(|(module, _)| {
                import_path == module.as_str()
                    || import_path
                        .strip_prefix(module.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .max_by_key(|(module, _)| module.len())
            .and_then(|(_, version)| GoVersion::parse(version))
    }

    /// Rule set this session was prepared with.
    pub fn rule_set(&self) -> Result<RuleSet, RuleLoadError> {
        let config = WeftConfig {
            rule_files: self.rule_files.clone(),
            builtin_rules: self.builtin_rules,
            ..WeftConfig::default()
        };
        RuleSet::load(&config)
    }
}

/// Source of the registration file: blank imports of `packages`.
pub fn registration_source(packages: &[String]) -> String {
    let mut out = String::from("// Code generated by weft. DO NOT EDIT.\n\npackage main\n\nimport (\n");
    for path in packages {
        out.push_str(&format!("\t{}\n", import_spec(Some("_"), path)));
    }
    out.push_str(")\n");
    out
}

pub struct BuildSession;

impl BuildSession {
    /// Prepare the module containing `dir`.
    pub fn begin(
        config: &WeftConfig,
        toolchain: &dyn Toolchain,
        dir: &Path,
    ) -> Result<SessionGuard, SetupError> {
        let root = find_module_root(dir)?;
        let work_dir = root.join(&config.work_dir);

        // a crashed session leaves its state behind; undo it first
        if let Some(stale) = SessionState::load(&work_dir)? {
            warn!(work_dir = %work_dir.display(), "Restoring stale session");
            restore_state(&stale, false)?;
        }
        fs::create_dir_all(work_dir.join(BACKUP_DIR)).map_err(io_err(&work_dir))?;

        let mut backups = Vec::new();
        for name in MANIFESTS {
            let original = root.join(name);
            let backup = work_dir.join(BACKUP_DIR).join(name);
            let existed = original.is_file();
            if existed {
                fs::copy(&original, &backup).map_err(io_err(&original))?;
            }
            backups.push(ManifestBackup {
                original,
                backup,
                existed,
            });
        }

        let state = SessionState {
            weft_version: crate::VERSION.to_string(),
            module_root: root.clone(),
            work_dir: work_dir.clone(),
            // interceptors run from package directories
            rule_files: config
                .rule_files
                .iter()
                .map(|p| p.canonicalize().unwrap_or_else(|_| p.clone()))
                .collect(),
            builtin_rules: config.builtin_rules,
            fingerprint: String::new(),
            go_version: None,
            modules: BTreeMap::new(),
            registration_files: Vec::new(),
            backups,
        };
        state.save()?;
        // from here on every failure is undone by the guard
        let mut guard = SessionGuard {
            state,
            armed: true,
            keep_work_dir: config.keep_work_dir,
        };

        let rules = RuleSet::load(config)?;
        let packages = rules.required_packages();
        if !packages.is_empty() {
            let source = registration_source(&packages);
            for main_dir in find_main_packages(&root, &work_dir)? {
                let file = main_dir.join(REGISTRATION_FILE);
                fs::write(&file, &source).map_err(io_err(&file))?;
                debug!(file = %file.display(), "Wrote registration file");
                guard.state.registration_files.push(file);
            }
            guard.state.save()?;

            toolchain.require(
                &root,
                &config.runtime_module,
                &config.runtime_version,
                config.runtime_replace.as_deref(),
            )?;
            toolchain.tidy(&root)?;
        }

        let gomod = root.join("go.mod");
        let gomod_text = fs::read_to_string(&gomod).map_err(io_err(&gomod))?;
        guard.state.modules = parse_requires(&gomod_text);
        guard.state.go_version = Some(toolchain.version()?);
        guard.state.fingerprint = rules.fingerprint();
        guard.state.save()?;

        info!(
            root = %root.display(),
            rules = rules.len(),
            registrations = guard.state.registration_files.len(),
            "Build session ready"
        );
        Ok(guard)
    }

    /// Undo a session left in place by `weft setup`.
    pub fn restore(config: &WeftConfig, dir: &Path) -> Result<(), SetupError> {
        let root = find_module_root(dir)?;
        let work_dir = root.join(&config.work_dir);
        let state = SessionState::load(&work_dir)?.ok_or(SetupError::NoSession(work_dir))?;
        restore_state(&state, config.keep_work_dir)
    }
}

fn restore_state(state: &SessionState, keep_work_dir: bool) -> Result<(), SetupError> {
    let mut errors = Vec::new();

    for file in &state.registration_files {
        if file.exists() {
            errors.extend(fs::remove_file(file).map_err(io_err(file)).err());
        }
    }
    for backup in &state.backups {
        let result = if backup.existed {
            fs::copy(&backup.backup, &backup.original)
                .map(|_| ())
                .map_err(io_err(&backup.original))
        } else if backup.original.exists() {
            fs::remove_file(&backup.original).map_err(io_err(&backup.original))
        } else {
            Ok(())
        };
        errors.extend(result.err());
    }

    // backups stay on disk until every manifest is back
    if errors.is_empty() {
        let session_file = SessionState::path(&state.work_dir);
        let result = if keep_work_dir {
            fs::remove_file(&session_file).map_err(io_err(&session_file))
        } else if state.work_dir.exists() {
            fs::remove_dir_all(&state.work_dir).map_err(io_err(&state.work_dir))
        } else {
            Ok(())
        };
        errors.extend(result.err());
    }

    for err in errors.iter().skip(1) {
        warn!(error = %err, "Session cleanup step failed");
    }
    match errors.into_iter().next() {
        Some(err) => Err(err),
        None => {
            debug!(work_dir = %state.work_dir.display(), "Session restored");
            Ok(())
        }
    }
}

/// Owns a prepared session; restores the module when dropped.
#[derive(Debug)]
pub struct SessionGuard {
    state: SessionState,
    armed: bool,
    keep_work_dir: bool,
}

impl SessionGuard {
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn work_dir(&self) -> &Path {
        &self.state.work_dir
    }

    /// Restore now, reporting failures.
    pub fn restore(mut self) -> Result<(), SetupError> {
        self.armed = false;
        restore_state(&self.state, self.keep_work_dir)
    }

    /// Leave the session in place for a later `weft restore`.
    pub fn persist(mut self) -> SessionState {
        self.armed = false;
        self.state.clone()
    }

    /// Run `go <args>` with the interceptor installed, returning the
    /// build's exit status. `interceptor` is the weft executable.
    pub fn run_build(
        &self,
        toolchain: &dyn Toolchain,
        interceptor: &Path,
        args: &[String],
    ) -> Result<ExitStatus, SetupError> {
        let args = with_toolexec(args, interceptor)?;
        info!(args = ?args, "Starting build");

        let interrupted = Arc::new(AtomicBool::new(false));
        for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
            signal_hook::flag::register(signal, Arc::clone(&interrupted))
                .map_err(|source| SetupError::Io {
                    path: PathBuf::from("<signal handler>"),
                    source,
                })?;
        }

        let mut child = Command::new(toolchain.go_binary())
            .args(&args)
            .current_dir(&self.state.module_root)
            .env(crate::ENV_WORK_DIR, &self.state.work_dir)
            .spawn()
            .map_err(|source| SetupError::Spawn {
                program: toolchain.go_binary().to_path_buf(),
                source,
            })?;

        let mut killed = false;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {}
                Err(source) => {
                    return Err(SetupError::Spawn {
                        program: toolchain.go_binary().to_path_buf(),
                        source,
                    })
                }
            }
            if interrupted.load(Ordering::Relaxed) && !killed {
                warn!("Interrupted, stopping build");
                let _ = child.kill();
                killed = true;
            }
            thread::sleep(Duration::from_millis(50));
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.armed {
            self.armed = false;
            if let Err(err) = restore_state(&self.state, self.keep_work_dir) {
                warn!(error = %err, "Failed to restore module state");
            }
        }
    }
}

/// Insert `-toolexec=<interceptor> toolexec` right after the go subcommand.
pub fn with_toolexec(args: &[String], interceptor: &Path) -> Result<Vec<String>, SetupError> {
    if args
        .iter()
        .any(|a| a == "-toolexec" || a.starts_with("-toolexec=") || a == "--toolexec" || a.starts_with("--toolexec="))
    {
        return Err(SetupError::ToolexecConflict);
    }
    let position = args
        .iter()
        .position(|a| GO_SUBCOMMANDS.contains(&a.as_str()))
        .ok_or(SetupError::NoSubcommand)?;

    let exe = interceptor.display().to_string();
    let exe = if exe.contains(char::is_whitespace) {
        format!("'{exe}'")
    } else {
        exe
    };
    let mut out = args.to_vec();
    out.insert(position + 1, format!("-toolexec={exe} toolexec"));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(modules: &[(&str, &str)]) -> SessionState {
        SessionState {
            weft_version: crate::VERSION.to_string(),
            module_root: PathBuf::from("/m"),
            work_dir: PathBuf::from("/m/.weft-build"),
            rule_files: Vec::new(),
            builtin_rules: true,
            fingerprint: String::new(),
            go_version: Some("go1.22.3".to_string()),
            modules: modules
                .iter()
                .map(|(m, v)| (m.to_string(), v.to_string()))
                .collect(),
            registration_files: Vec::new(),
            backups: Vec::new(),
        }
    }

    #[test]
    fn test_package_version_lookup() {
        let state = state_with(&[
            ("github.com/redis/go-redis/v9", "v9.5.1"),
            ("github.com/redis", "v0.1.0"),
            ("example.com/app", "v0.0.0"),
        ]);
        assert_eq!(
            state.package_version("github.com/redis/go-redis/v9/internal/pool"),
            GoVersion::parse("v9.5.1")
        );
        assert_eq!(state.package_version("net/http"), GoVersion::parse("go1.22.3"));
        assert_eq!(state.package_version("example.com/app/cmd"), GoVersion::parse("v0.0.0"));
        assert_eq!(state.package_version("github.com/other/x"), None);
    }

    #[test]
    fn test_with_toolexec_insertion() {
        let args: Vec<String> = ["build", "-o", "app", "./..."].iter().map(|s| s.to_string()).collect();
        let out = with_toolexec(&args, Path::new("/usr/bin/weft")).unwrap();
        assert_eq!(out[1], "-toolexec=/usr/bin/weft toolexec");
        assert_eq!(out.len(), 5);

        let spaced = with_toolexec(&args, Path::new("/opt/my tools/weft")).unwrap();
        assert_eq!(spaced[1], "-toolexec='/opt/my tools/weft' toolexec");
    }

    #[test]
    fn test_with_toolexec_conflicts() {
        let args: Vec<String> = ["build", "-toolexec=x", "."].iter().map(|s| s.to_string()).collect();
        assert!(matches!(
            with_toolexec(&args, Path::new("weft")),
            Err(SetupError::ToolexecConflict)
        ));
        let args: Vec<String> = vec!["mod".to_string(), "tidy".to_string()];
        assert!(matches!(with_toolexec(&args, Path::new("weft")), Err(SetupError::NoSubcommand)));
    }

    #[test]
    fn test_registration_source() {
        let src = registration_source(&["example.com/hooks".to_string()]);
        assert!(src.contains("\t_ \"example.com/hooks\"\n"));
        assert!(src.contains("package main"));
    }
}
