//! The compiler's `-importcfg` file: `packagefile <path>=<export file>`
//! lines telling `compile` where each imported package's export data is.
//! Woven files can import packages the original did not, so the
//! interceptor hands the compiler a private, extended copy.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use super::ToolexecError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportCfg {
    lines: Vec<String>,
}

impl ImportCfg {
    pub fn parse(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    pub fn read(path: &Path) -> Result<Self, ToolexecError> {
        std::fs::read_to_string(path)
            .map(|text| Self::parse(&text))
            .map_err(|source| ToolexecError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    pub fn has_package(&self, import_path: &str) -> bool {
        self.lines.iter().any(|line| {
            line.strip_prefix("packagefile ")
                .and_then(|rest| rest.split_once('='))
                .is_some_and(|(path, _)| path == import_path)
        })
    }

    pub fn add_packagefile(&mut self, import_path: &str, export: &Path) {
        self.lines
            .push(format!("packagefile {import_path}={}", export.display()));
    }

    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}

/// Locates compiled export data for an import path.
pub trait ImportResolver {
    fn export_file(&self, import_path: &str) -> Result<PathBuf, ToolexecError>;
}

/// Asks the go command: `go list -export -f {{.Export}} <path>`.
#[derive(Debug, Clone)]
pub struct GoListResolver {
    go: PathBuf,
    dir: Option<PathBuf>,
}

impl GoListResolver {
    pub fn new(go: impl Into<PathBuf>) -> Self {
        Self {
            go: go.into(),
            dir: None,
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }
}

impl Default for GoListResolver {
    fn default() -> Self {
        Self::new("go")
    }
}

impl ImportResolver for GoListResolver {
    fn export_file(&self, import_path: &str) -> Result<PathBuf, ToolexecError> {
        let mut cmd = Command::new(&self.go);
        cmd.args(["list", "-export", "-f", "{{.Export}}", import_path]);
        if let Some(dir) = &self.dir {
            cmd.current_dir(dir);
        }
        // never recurse into the interceptor from the nested go command
        cmd.env_remove("GOFLAGS");

        let output = cmd.output().map_err(|source| ToolexecError::Spawn {
            tool: self.go.clone(),
            source,
        })?;
        if !output.status.success() {
            return Err(ToolexecError::Resolve {
                package: import_path.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let export = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if export.is_empty() {
            return Err(ToolexecError::Resolve {
                package: import_path.to_string(),
                message: "no export data".to_string(),
            });
        }
        debug!(package = import_path, export = %export, "Resolved export data");
        Ok(PathBuf::from(export))
    }
}
