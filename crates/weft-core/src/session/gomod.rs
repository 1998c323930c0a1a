//! Module-level plumbing: locating the module root, reading `go.mod`
//! requirements and driving the go command.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use super::SetupError;
use crate::source::{ParseMode, SourceUnit};

/// The go command operations a session needs.
pub trait Toolchain {
    /// `go version`, e.g. `go1.22.3`.
    fn version(&self) -> Result<String, SetupError>;

    /// Add `module@version` to the module's requirements, optionally
    /// replaced by a local directory.
    fn require(
        &self,
        root: &Path,
        module: &str,
        version: &str,
        replace: Option<&Path>,
    ) -> Result<(), SetupError>;

    /// `go mod tidy`
    fn tidy(&self, root: &Path) -> Result<(), SetupError>;

    /// Executable the build runs under.
    fn go_binary(&self) -> &Path;
}

#[derive(Debug, Clone)]
pub struct GoToolchain {
    go: PathBuf,
}

impl GoToolchain {
    pub fn new(go: impl Into<PathBuf>) -> Self {
        Self { go: go.into() }
    }

    fn run(&self, root: &Path, args: &[&str]) -> Result<String, SetupError> {
        debug!(args = ?args, dir = %root.display(), "Running go command");
        let output = Command::new(&self.go)
            .args(args)
            .current_dir(root)
            .output()
            .map_err(|source| SetupError::Spawn {
                program: self.go.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(SetupError::GoCommand {
                command: format!("go {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for GoToolchain {
    fn default() -> Self {
        Self::new("go")
    }
}

impl Toolchain for GoToolchain {
    fn version(&self) -> Result<String, SetupError> {
        let out = self.run(Path::new("."), &["env", "GOVERSION"])?;
        Ok(out.trim().to_string())
    }

    fn require(
        &self,
        root: &Path,
        module: &str,
        version: &str,
        replace: Option<&Path>,
    ) -> Result<(), SetupError> {
        let requirement = format!("-require={module}@{version}");
        self.run(root, &["mod", "edit", &requirement])?;
        if let Some(dir) = replace {
            let replacement = format!("-replace={module}={}", dir.display());
            self.run(root, &["mod", "edit", &replacement])?;
        }
        Ok(())
    }

    fn tidy(&self, root: &Path) -> Result<(), SetupError> {
        self.run(root, &["mod", "tidy"]).map(|_| ())
    }

    fn go_binary(&self) -> &Path {
        &self.go
    }
}

/// Walk up from `start` to the directory holding `go.mod`.
pub fn find_module_root(start: &Path) -> Result<PathBuf, SetupError> {
    let start = start.canonicalize().map_err(|source| SetupError::Io {
        path: start.to_path_buf(),
        source,
    })?;
    start
        .ancestors()
        .find(|dir| dir.join("go.mod").is_file())
        .map(Path::to_path_buf)
        .ok_or_else(|| SetupError::NoModule(start.clone()))
}

/// `module path → version` for every `require` in a go.mod file, plus the
/// main module itself under the version `v0.0.0`.
pub fn parse_requires(gomod: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let mut in_block = false;
    for raw in gomod.lines() {
        let line = raw.split("//").next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        if in_block {
            if line == ")" {
                in_block = false;
            } else {
                push_requirement(&mut out, line);
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("module ") {
            out.insert(rest.trim().trim_matches('"').to_string(), "v0.0.0".to_string());
        } else if let Some(rest) = line.strip_prefix("require") {
            let rest = rest.trim();
            if rest == "(" {
                in_block = true;
            } else {
                push_requirement(&mut out, rest);
            }
        }
    }
    out
}

fn push_requirement(out: &mut BTreeMap<String, String>, line: &str) {
    let mut parts = line.split_whitespace();
    if let (Some(path), Some(version)) = (parts.next(), parts.next()) {
        out.insert(path.trim_matches('"').to_string(), version.to_string());
    }
}

/// Directories under `root` holding a `package main` (test files
/// excluded), skipping nested modules, vendored code and `skip`.
pub fn find_main_packages(root: &Path, skip: &Path) -> Result<Vec<PathBuf>, SetupError> {
    let mut mains = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).map_err(|source| SetupError::Io {
            path: dir.clone(),
            source,
        })?;
        let mut is_main = false;
        let mut subdirs = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if path.is_dir() {
                let skipped = name.starts_with('.')
                    || name.starts_with('_')
                    || name == "vendor"
                    || name == "testdata"
                    || path == skip
                    || path.join("go.mod").is_file();
                if !skipped {
                    subdirs.push(path);
                }
            } else if !is_main && name.ends_with(".go") && !name.ends_with("_test.go") {
                if let Ok(unit) = SourceUnit::read(&path, ParseMode::PackageClauseOnly) {
                    is_main = unit.package_name() == "main";
                }
            }
        }
        if is_main {
            mains.push(dir);
        }
        subdirs.sort();
        pending.extend(subdirs.into_iter().rev());
    }
    mains.sort();
    Ok(mains)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_requires() {
        let gomod = "module example.com/app\n\ngo 1.22\n\nrequire github.com/a/b v1.2.3\n\nrequire (\n\tgithub.com/c/d v0.4.0 // indirect\n\tgolang.org/x/net v0.20.0\n)\n";
        let reqs = parse_requires(gomod);
        assert_eq!(reqs.get("example.com/app").map(String::as_str), Some("v0.0.0"));
        assert_eq!(reqs.get("github.com/a/b").map(String::as_str), Some("v1.2.3"));
        assert_eq!(reqs.get("github.com/c/d").map(String::as_str), Some("v0.4.0"));
        assert_eq!(reqs.get("golang.org/x/net").map(String::as_str), Some("v0.20.0"));
    }

    #[test]
    fn test_find_module_root_and_mains() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("go.mod"), "module example.com/app\n").unwrap();
        fs::create_dir_all(root.join("cmd/tool")).unwrap();
        fs::create_dir_all(root.join("internal/lib")).unwrap();
        fs::create_dir_all(root.join(".weft-build")).unwrap();
        fs::write(root.join("cmd/tool/main.go"), "package main\n\nfunc main() {}\n").unwrap();
        fs::write(root.join("internal/lib/lib.go"), "package lib\n").unwrap();
        fs::write(root.join("main_test.go"), "package main\n").unwrap();

        let found = find_module_root(&root.join("internal/lib")).unwrap();
        assert_eq!(found, root.canonicalize().unwrap());

        let mains = find_main_packages(&found, &found.join(".weft-build")).unwrap();
        assert_eq!(mains, vec![found.join("cmd/tool")]);
    }
}
