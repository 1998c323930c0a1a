//! The interceptor against a stand-in `compile` that records what it was
//! given.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use weft_core::rules::RuleSet;
use weft_core::toolexec::{ImportResolver, Interceptor, ToolInvocation, ToolexecError};

struct FixedResolver;

impl ImportResolver for FixedResolver {
    fn export_file(&self, import_path: &str) -> Result<PathBuf, ToolexecError> {
        Ok(PathBuf::from(format!("/cache/{}.a", import_path.replace('/', "_"))))
    }
}

const RULES: &str = r#"
wrap_get:
  target: example.com/app
  function-call: net/http.Get
  template: "wrap({{ . }})"
  imports:
    wrap: pkg/wrap
advise_run:
  target: example.com/svc
  func: Run
  before: OnEnter
  path: example.com/hooks
"#;

/// A `compile` that writes its arguments and the contents of its Go
/// sources next to itself.
fn fake_compile(dir: &Path) -> Result<PathBuf> {
    let bin = dir.join("bin");
    fs::create_dir_all(&bin)?;
    let script = bin.join("compile");
    let out = dir.display();
    fs::write(
        &script,
        format!(
            "#!/bin/sh\nprintf '%s\\n' \"$@\" > {out}/args.txt\n: > {out}/sources.txt\nfor a in \"$@\"; do\n  case \"$a\" in\n    *.go) cat \"$a\" >> {out}/sources.txt ;;\n    */importcfg) cp \"$a\" {out}/importcfg.seen ;;\n  esac\ndone\n"
        ),
    )?;
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755))?;
    Ok(script)
}

fn invocation(tool: &Path, package: &str, importcfg: &Path, files: &[&Path]) -> ToolInvocation {
    let mut argv = vec![
        tool.display().to_string(),
        "-o".to_string(),
        "_pkg_.a".to_string(),
        "-p".to_string(),
        package.to_string(),
        "-complete".to_string(),
        "-importcfg".to_string(),
        importcfg.display().to_string(),
    ];
    argv.extend(files.iter().map(|f| f.display().to_string()));
    ToolInvocation::parse(argv).unwrap()
}

// Everything runs in one test so no other thread forks while the script is
// being written.
#[test]
fn test_interceptor_substitutes_woven_sources() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path();
    let tool = fake_compile(root)?;
    let work = root.join(".weft-build");
    let importcfg = root.join("importcfg");
    fs::write(&importcfg, "# import config\npackagefile net/http=/cache/net_http.a\n")?;

    let main_go = root.join("main.go");
    fs::write(
        &main_go,
        "package main\n\nimport \"net/http\"\n\nfunc main() {\n\thttp.Get(\"u\")\n}\n",
    )?;
    let interceptor = Interceptor::new(RuleSet::from_yaml("rules.yaml", RULES)?, &work)
        .with_resolver(Box::new(FixedResolver));

    // call-site rule: woven copy compiled, importcfg extended, -complete kept
    let code = interceptor.run_invocation(invocation(&tool, "example.com/app", &importcfg, &[&main_go]))?;
    assert_eq!(code, 0);
    let args = fs::read_to_string(root.join("args.txt"))?;
    let sources = fs::read_to_string(root.join("sources.txt"))?;
    assert!(sources.contains("wrap.wrap(http.Get(\"u\"))"));
    assert!(!args.contains(&main_go.display().to_string()));
    assert!(args.contains("-complete"));
    assert!(!args.contains(&format!("{}\n", importcfg.display())));
    let seen = fs::read_to_string(root.join("importcfg.seen"))?;
    assert!(seen.contains("packagefile net/http=/cache/net_http.a"));
    assert!(seen.contains("packagefile pkg/wrap=/cache/pkg_wrap.a"));
    // the original file is untouched
    assert!(fs::read_to_string(&main_go)?.contains("\thttp.Get(\"u\")\n"));

    // function advice: bodyless hook stubs need -complete dropped
    let svc_go = root.join("svc.go");
    fs::write(&svc_go, "package svc\n\nfunc Run() {\n}\n")?;
    interceptor.run_invocation(invocation(&tool, "example.com/svc", &importcfg, &[&svc_go]))?;
    let args = fs::read_to_string(root.join("args.txt"))?;
    let sources = fs::read_to_string(root.join("sources.txt"))?;
    assert!(!args.contains("-complete"));
    assert!(sources.contains("//go:linkname __weft_before_advise_run example.com/hooks.OnEnter"));

    // untargeted packages pass through unchanged
    let lib_go = root.join("lib.go");
    fs::write(&lib_go, "package lib\n")?;
    interceptor.run_invocation(invocation(&tool, "example.com/lib", &importcfg, &[&lib_go]))?;
    let args = fs::read_to_string(root.join("args.txt"))?;
    assert!(args.contains(&lib_go.display().to_string()));
    assert!(args.contains("-complete"));

    // sources already inside the work directory are never rewoven
    let woven_dir = work.join("compile/compile-prev");
    fs::create_dir_all(&woven_dir)?;
    let rewoven = woven_dir.join("main.go");
    fs::copy(&main_go, &rewoven)?;
    interceptor.run_invocation(invocation(&tool, "example.com/app", &importcfg, &[&rewoven]))?;
    let sources = fs::read_to_string(root.join("sources.txt"))?;
    assert!(!sources.contains("wrap.wrap"));

    // a source the weaver cannot parse is left to the compiler to report
    let broken = root.join("broken.go");
    fs::write(&broken, "package main\n\nfunc main( {\n")?;
    let result = interceptor.run_invocation(invocation(&tool, "example.com/app", &importcfg, &[&broken]));
    assert!(matches!(result, Err(ToolexecError::Parse(_))));
    Ok(())
}
