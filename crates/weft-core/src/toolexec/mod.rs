/*!
# Toolchain Interceptor

`weft toolexec <tool> <args>` is what the go command runs in place of each
toolchain program when a build uses `-toolexec`. Everything except
`compile` steps for targeted packages passes straight through; those get
their sources woven into a private directory and the compiler pointed at
the woven copies.

Each invocation is its own process. The only shared inputs are the rule
descriptors and the session state, both read-only here, and every write
lands in a fresh directory under the work dir.
*/

pub mod args;
pub mod importcfg;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};

pub use args::ToolInvocation;
pub use importcfg::{GoListResolver, ImportCfg, ImportResolver};

use crate::rules::{GoVersion, RuleLoadError, RuleSet};
use crate::session::{SessionState, SetupError};
use crate::source::{ParseError, ParseMode, SourceUnit};
use crate::weaver::{WeaveError, Weaver};
use crate::WeftConfig;

/// Set by the go command for every tool it runs under `-toolexec`.
pub const TOOLEXEC_MARKER: &str = "TOOLEXEC_IMPORTPATH";

const COMPILE_DIR: &str = "compile";

#[derive(thiserror::Error, Debug)]
pub enum ToolexecError {
    #[error("toolexec must be run by the go command (TOOLEXEC_IMPORTPATH is not set)")]
    NotUnderGo,

    #[error("toolexec needs the tool to run as its first argument")]
    MissingTool,

    #[error("compile invocation has no -p flag")]
    MissingPackage,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot locate export data for {package}: {message}")]
    Resolve { package: String, message: String },

    #[error(transparent)]
    Rules(#[from] RuleLoadError),

    #[error(transparent)]
    Weave(#[from] WeaveError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Session(#[from] SetupError),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ToolexecError + '_ {
    move |source| ToolexecError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub struct Interceptor {
    rules: RuleSet,
    work_dir: PathBuf,
    session: Option<SessionState>,
    resolver: Box<dyn ImportResolver>,
    keep_work_dir: bool,
}

impl Interceptor {
    pub fn new(rules: RuleSet, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            rules,
            work_dir: work_dir.into(),
            session: None,
            resolver: Box::new(GoListResolver::default()),
            keep_work_dir: false,
        }
    }

    pub fn with_session(mut self, session: SessionState) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_resolver(mut self, resolver: Box<dyn ImportResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn keep_work_dir(mut self, keep: bool) -> Self {
        self.keep_work_dir = keep;
        self
    }

    /// Build an interceptor for the session in `config.work_dir`, falling
    /// back to the configured rules when there is no session.
    pub fn from_config(config: &WeftConfig) -> Result<Self, ToolexecError> {
        let work_dir = if config.work_dir.is_absolute() {
            config.work_dir.clone()
        } else {
            std::env::current_dir()
                .map_err(io_err(&config.work_dir))?
                .join(&config.work_dir)
        };

        let interceptor = match SessionState::load(&work_dir)? {
            Some(session) => {
                let rules = session.rule_set()?;
                if rules.fingerprint() != session.fingerprint {
                    warn!("Rule descriptors changed since the session was prepared");
                }
                let resolver = GoListResolver::default().in_dir(&session.module_root);
                Self::new(rules, &work_dir)
                    .with_resolver(Box::new(resolver))
                    .with_session(session)
            }
            None => Self::new(RuleSet::load(config)?, &work_dir),
        };
        Ok(interceptor.keep_work_dir(config.keep_work_dir))
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Handle one tool invocation as the go command's `-toolexec` program,
    /// returning the exit code to propagate.
    pub fn run<I, S>(&self, argv: I) -> Result<i32, ToolexecError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let invocation = ToolInvocation::parse(argv)?;
        // the go command probes tool versions for its cache key without the marker
        if std::env::var_os(TOOLEXEC_MARKER).is_none() && !invocation.is_version_query() {
            return Err(ToolexecError::NotUnderGo);
        }
        self.run_invocation(invocation)
    }

    pub fn run_invocation(&self, invocation: ToolInvocation) -> Result<i32, ToolexecError> {
        if invocation.is_version_query() {
            return self.version_query(&invocation);
        }
        if !invocation.is_compile() {
            return exec(&invocation);
        }

        let import_path = invocation
            .flag_value("-p")
            .ok_or(ToolexecError::MissingPackage)?
            .to_string();
        if !self.rules.targets(&import_path) {
            return exec(&invocation);
        }

        let version = self.package_version(&import_path);
        let matched = self.rules.matching(&import_path, version.as_ref());
        if matched.is_empty() {
            debug!(import_path, version = ?version, "No rule matches this package version");
            return exec(&invocation);
        }

        let sources: Vec<(usize, PathBuf)> = invocation
            .go_files()
            .into_iter()
            .filter(|(_, path)| !self.is_work_file(path))
            .collect();
        if sources.is_empty() {
            return exec(&invocation);
        }

        let mut units = Vec::with_capacity(sources.len());
        for (_, path) in &sources {
            match SourceUnit::read(path, ParseMode::Full) {
                Ok(unit) => units.push(unit),
                Err(err) => {
                    // let the compiler report its own diagnostics first
                    let code = exec(&invocation)?;
                    if code != 0 {
                        return Ok(code);
                    }
                    return Err(err.into());
                }
            }
        }

        let weave = Weaver::new(&self.rules).weave_package(units, &import_path, version.as_ref())?;
        if !weave.is_modified() {
            return exec(&invocation);
        }

        let compile_root = self.work_dir.join(COMPILE_DIR);
        fs::create_dir_all(&compile_root).map_err(io_err(&compile_root))?;
        let scratch = tempfile::Builder::new()
            .prefix("compile-")
            .keep(self.keep_work_dir)
            .tempdir_in(&compile_root)
            .map_err(io_err(&compile_root))?;

        let mut invocation = invocation;
        for ((idx, original), woven) in sources.iter().zip(&weave.files) {
            if !woven.modified {
                continue;
            }
            let name = original
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("woven_{idx}.go"));
            let target = scratch.path().join(name);
            fs::write(&target, &woven.text).map_err(io_err(&target))?;
            invocation.replace_arg(*idx, &target);
            info!(
                file = %original.display(),
                woven = %target.display(),
                rules = ?woven.applied,
                "Substituted woven source"
            );
        }

        if weave.uses_linkname() && invocation.remove_flag("-complete") {
            debug!(import_path, "Dropped -complete for bodyless hook declarations");
        }
        self.extend_importcfg(&mut invocation, &weave.added_imports(), scratch.path())?;

        exec(&invocation)
    }

    fn package_version(&self, import_path: &str) -> Option<GoVersion> {
        self.session
            .as_ref()
            .and_then(|session| session.package_version(import_path))
    }

    /// Files under the work directory were produced by an earlier weave.
    fn is_work_file(&self, path: &Path) -> bool {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let work_dir = self
            .work_dir
            .canonicalize()
            .unwrap_or_else(|_| self.work_dir.clone());
        canonical.starts_with(&work_dir)
    }

    fn version_query(&self, invocation: &ToolInvocation) -> Result<i32, ToolexecError> {
        let output = Command::new(&invocation.tool)
            .args(&invocation.args)
            .output()
            .map_err(|source| ToolexecError::Spawn {
                tool: invocation.tool.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let tagged = tag_version_output(&stdout, &self.rules.fingerprint());
        let mut out = std::io::stdout();
        out.write_all(tagged.as_bytes())
            .and_then(|_| out.flush())
            .map_err(io_err(Path::new("<stdout>")))?;
        std::io::stderr()
            .write_all(&output.stderr)
            .map_err(io_err(Path::new("<stderr>")))?;
        Ok(output.status.code().unwrap_or(1))
    }

    fn extend_importcfg(
        &self,
        invocation: &mut ToolInvocation,
        added: &[String],
        scratch: &Path,
    ) -> Result<(), ToolexecError> {
        let added: Vec<&String> = added.iter().filter(|p| p.as_str() != "unsafe").collect();
        if added.is_empty() {
            return Ok(());
        }
        let Some(current) = invocation.flag_value("-importcfg").map(PathBuf::from) else {
            return Ok(());
        };

        let mut cfg = ImportCfg::read(&current)?;
        let mut changed = false;
        for path in added {
            if cfg.has_package(path) {
                continue;
            }
            let export = self.resolver.export_file(path)?;
            cfg.add_packagefile(path, &export);
            changed = true;
        }
        if changed {
            let private = scratch.join("importcfg");
            fs::write(&private, cfg.render()).map_err(io_err(&private))?;
            invocation.set_flag_value("-importcfg", &private.display().to_string());
        }
        Ok(())
    }
}

/// Append the fingerprint to release toolchain version lines so woven and
/// plain builds get distinct cache keys. Development toolchains key on
/// their own build ID and are left alone.
pub fn tag_version_output(stdout: &str, fingerprint: &str) -> String {
    let trimmed = stdout.trim_end();
    if trimmed.is_empty() || trimmed.contains("devel") {
        return stdout.to_string();
    }
    format!("{trimmed} weft:{fingerprint}\n")
}

/// Run the real tool with inherited stdio.
fn exec(invocation: &ToolInvocation) -> Result<i32, ToolexecError> {
    let status = Command::new(&invocation.tool)
        .args(&invocation.args)
        .status()
        .map_err(|source| ToolexecError::Spawn {
            tool: invocation.tool.clone(),
            source,
        })?;
    Ok(status.code().unwrap_or(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_version_output() {
        assert_eq!(
            tag_version_output("compile version go1.22.3\n", "abc"),
            "compile version go1.22.3 weft:abc\n"
        );
        let devel = "compile version devel go1.23-1234 buildID=xyz\n";
        assert_eq!(tag_version_output(devel, "abc"), devel);
        assert_eq!(tag_version_output("", "abc"), "");
    }

    #[test]
    fn test_work_files_are_never_rewoven() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join(".weft-build");
        fs::create_dir_all(work.join("compile/compile-1")).unwrap();
        let woven = work.join("compile/compile-1/main.go");
        fs::write(&woven, "package main\n").unwrap();
        let plain = dir.path().join("main.go");
        fs::write(&plain, "package main\n").unwrap();

        let interceptor = Interceptor::new(RuleSet::default(), &work);
        assert!(interceptor.is_work_file(&woven));
        assert!(!interceptor.is_work_file(&plain));
    }

    #[test]
    fn test_missing_package_flag() {
        let interceptor = Interceptor::new(RuleSet::default(), "/tmp/weft");
        let invocation = ToolInvocation::parse(["/go/pkg/tool/compile", "-o", "x.a", "main.go"]).unwrap();
        assert!(matches!(
            interceptor.run_invocation(invocation),
            Err(ToolexecError::MissingPackage)
        ));
    }
}
