//! Build session setup and restoration against a scratch module.

use std::cell::Cell;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use anyhow::Result;
use pretty_assertions::assert_eq;
use weft_core::session::{BuildSession, SessionState, SetupError, Toolchain, REGISTRATION_FILE};
use weft_core::WeftConfig;

const GO_MOD: &str = "module example.com/app\n\ngo 1.22\n\nrequire github.com/a/b v1.2.3\n";
const GO_SUM: &str = "github.com/a/b v1.2.3 h1:abc=\n";

/// Edits go.mod/go.sum the way the go command would, without running it.
struct FakeToolchain {
    go: PathBuf,
    tidied: Cell<bool>,
}

impl FakeToolchain {
    fn new() -> Self {
        Self {
            go: PathBuf::from("go"),
            tidied: Cell::new(false),
        }
    }
}

impl Toolchain for FakeToolchain {
    fn version(&self) -> Result<String, SetupError> {
        Ok("go1.22.3".to_string())
    }

    fn require(&self, root: &Path, module: &str, version: &str, _replace: Option<&Path>) -> Result<(), SetupError> {
        let gomod = root.join("go.mod");
        let mut text = fs::read_to_string(&gomod).unwrap();
        text.push_str(&format!("require {module} {version}\n"));
        fs::write(gomod, text).unwrap();
        Ok(())
    }

    fn tidy(&self, root: &Path) -> Result<(), SetupError> {
        let gosum = root.join("go.sum");
        let mut text = fs::read_to_string(&gosum).unwrap_or_default();
        text.push_str("github.com/weft-go/runtime v0.1.0 h1:xyz=\n");
        fs::write(gosum, text).unwrap();
        self.tidied.set(true);
        Ok(())
    }

    fn go_binary(&self) -> &Path {
        &self.go
    }
}

fn module(with_sum: bool) -> Result<tempfile::TempDir> {
    let dir = tempfile::tempdir()?;
    fs::write(dir.path().join("go.mod"), GO_MOD)?;
    if with_sum {
        fs::write(dir.path().join("go.sum"), GO_SUM)?;
    }
    fs::create_dir_all(dir.path().join("cmd/app"))?;
    fs::write(dir.path().join("cmd/app/main.go"), "package main\n\nfunc main() {}\n")?;
    fs::create_dir_all(dir.path().join("lib"))?;
    fs::write(dir.path().join("lib/lib.go"), "package lib\n")?;
    Ok(dir)
}

fn assert_pristine(root: &Path, with_sum: bool) -> Result<()> {
    assert_eq!(fs::read_to_string(root.join("go.mod"))?, GO_MOD);
    if with_sum {
        assert_eq!(fs::read_to_string(root.join("go.sum"))?, GO_SUM);
    } else {
        assert!(!root.join("go.sum").exists());
    }
    assert!(!root.join("cmd/app").join(REGISTRATION_FILE).exists());
    assert!(!root.join(".weft-build").exists());
    Ok(())
}

#[test]
fn test_session_prepares_module() -> Result<()> {
    let dir = module(true)?;
    let toolchain = FakeToolchain::new();
    let guard = BuildSession::begin(&WeftConfig::default(), &toolchain, dir.path())?;

    let registration = dir.path().join("cmd/app").join(REGISTRATION_FILE);
    let source = fs::read_to_string(&registration)?;
    assert!(source.contains("_ \"github.com/weft-go/runtime/rules/nethttp\""));
    assert!(!dir.path().join("lib").join(REGISTRATION_FILE).exists());
    assert!(fs::read_to_string(dir.path().join("go.mod"))?.contains("github.com/weft-go/runtime v0.1.0"));
    assert!(toolchain.tidied.get());

    let state = SessionState::load(guard.work_dir())?.expect("session state");
    assert_eq!(state.go_version.as_deref(), Some("go1.22.3"));
    assert_eq!(state.modules.get("github.com/a/b").map(String::as_str), Some("v1.2.3"));
    assert_eq!(state.fingerprint.len(), 32);
    assert_eq!(&state, guard.state());

    guard.restore()?;
    assert_pristine(dir.path(), true)
}

#[test]
fn test_panic_mid_build_restores_module() -> Result<()> {
    let dir = module(true)?;
    let root = dir.path().to_path_buf();
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let toolchain = FakeToolchain::new();
        let _guard = BuildSession::begin(&WeftConfig::default(), &toolchain, &root).unwrap();
        assert!(root.join("cmd/app").join(REGISTRATION_FILE).exists());
        panic!("build blew up");
    }));
    assert!(result.is_err());
    assert_pristine(dir.path(), true)
}

#[test]
fn test_missing_go_sum_is_removed_again() -> Result<()> {
    let dir = module(false)?;
    let guard = BuildSession::begin(&WeftConfig::default(), &FakeToolchain::new(), dir.path())?;
    assert!(dir.path().join("go.sum").exists());
    drop(guard);
    assert_pristine(dir.path(), false)
}

#[test]
fn test_persisted_session_restores_later() -> Result<()> {
    let dir = module(true)?;
    let config = WeftConfig::default();
    let guard = BuildSession::begin(&config, &FakeToolchain::new(), dir.path())?;
    let state = guard.persist();
    assert!(state.registration_files[0].exists());

    BuildSession::restore(&config, &dir.path().join("lib"))?;
    assert_pristine(dir.path(), true)?;

    assert!(matches!(
        BuildSession::restore(&config, dir.path()),
        Err(SetupError::NoSession(_))
    ));
    Ok(())
}

#[test]
fn test_stale_session_is_undone_before_a_new_one() -> Result<()> {
    let dir = module(true)?;
    let config = WeftConfig::default();
    BuildSession::begin(&config, &FakeToolchain::new(), dir.path())?.persist();

    // the second session must back up the pristine manifests, not the edited ones
    let guard = BuildSession::begin(&config, &FakeToolchain::new(), dir.path())?;
    guard.restore()?;
    assert_pristine(dir.path(), true)
}

#[test]
fn test_no_rules_leaves_module_untouched() -> Result<()> {
    let dir = module(true)?;
    let config = WeftConfig {
        builtin_rules: false,
        ..WeftConfig::default()
    };
    let toolchain = FakeToolchain::new();
    let guard = BuildSession::begin(&config, &toolchain, dir.path())?;
    assert!(guard.state().registration_files.is_empty());
    assert!(!toolchain.tidied.get());
    assert_eq!(fs::read_to_string(dir.path().join("go.mod"))?, GO_MOD);
    guard.restore()?;
    assert_pristine(dir.path(), true)
}

#[test]
fn test_outside_a_module_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = BuildSession::begin(&WeftConfig::default(), &FakeToolchain::new(), dir.path()).unwrap_err();
    assert!(matches!(err, SetupError::NoModule(_)));
}
