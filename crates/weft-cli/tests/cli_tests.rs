use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;

fn weft() -> Command {
    let mut cmd = Command::cargo_bin("weft").unwrap();
    cmd.env_remove("TOOLEXEC_IMPORTPATH")
        .env_remove("WEFT_RULES")
        .env_remove("WEFT_NO_BUILTIN_RULES")
        .env_remove("WEFT_WORK_DIR");
    cmd
}

#[test]
fn test_version() {
    weft()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_rules_lists_builtins() {
    weft()
        .arg("rules")
        .assert()
        .success()
        .stdout(predicate::str::contains("net_http_client_send"))
        .stdout(predicate::str::contains("runtime_g_trace_slot"))
        .stdout(predicate::str::contains("fingerprint"));
}

#[test]
fn test_rules_validates_extra_files() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.yaml");
    fs::write(
        &good,
        "log_println:\n  target: example.com/app\n  function-call: fmt.Println\n  template: \"logged({{ . }})\"\n  imports:\n    logged: example.com/logging\n",
    )
    .unwrap();
    weft()
        .args(["rules", "--no-builtin-rules"])
        .arg(&good)
        .assert()
        .success()
        .stdout(predicate::str::contains("log_println"))
        .stdout(predicate::str::contains("net_http_client_send").not());
}

#[test]
fn test_rules_rejects_malformed_function_call() {
    let dir = tempfile::tempdir().unwrap();
    let bad = dir.path().join("bad.yaml");
    fs::write(
        &bad,
        "no_dot:\n  target: example.com/app\n  function-call: Println\n  template: \"f({{ . }})\"\n",
    )
    .unwrap();
    weft()
        .arg("rules")
        .arg(&bad)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no_dot"))
        .stderr(predicate::str::contains("<import-path>.<identifier>"));
}

#[test]
fn test_toolexec_refuses_outside_go() {
    let dir = tempfile::tempdir().unwrap();
    weft()
        .current_dir(dir.path())
        .args(["toolexec", "/usr/local/go/pkg/tool/linux_amd64/compile", "-p", "main", "main.go"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("TOOLEXEC_IMPORTPATH"));
}

#[test]
fn test_restore_without_session_fails() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("go.mod"), "module example.com/app\n").unwrap();
    weft()
        .current_dir(dir.path())
        .arg("restore")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no session"));
}
