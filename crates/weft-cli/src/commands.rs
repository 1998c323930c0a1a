//! Command-line surface of `weft`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing::info;
use weft_core::{BuildSession, GoToolchain, Interceptor, RuleSet, WeftConfig};

/// A parsed `weft` invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeftCommand {
    /// Prepare the module and leave the session in place
    Setup,
    /// Undo a session left by `setup`
    Restore,
    /// Run a go command under the interceptor
    Go(Vec<String>),
    /// Validate and list rules, optionally from extra files
    Rules(Vec<PathBuf>),
    /// Invoked by the go command for each toolchain program
    Toolexec(Vec<String>),
}

impl WeftCommand {
    pub fn from_matches(matches: &ArgMatches) -> Option<Self> {
        let strings = |m: &ArgMatches, id: &str| -> Vec<String> {
            m.get_many::<String>(id)
                .map(|values| values.cloned().collect())
                .unwrap_or_default()
        };
        match matches.subcommand()? {
            ("setup", _) => Some(Self::Setup),
            ("restore", _) => Some(Self::Restore),
            ("go", sub) => Some(Self::Go(strings(sub, "args"))),
            ("rules", sub) => Some(Self::Rules(
                strings(sub, "files").into_iter().map(PathBuf::from).collect(),
            )),
            ("toolexec", sub) => Some(Self::Toolexec(strings(sub, "args"))),
            _ => None,
        }
    }

    /// Interceptor processes stay quiet unless asked otherwise.
    pub fn default_log_directive(&self, debug: bool) -> &'static str {
        match (self, debug) {
            (_, true) => "weft_core=debug,weft_cli=debug",
            (Self::Toolexec(_), false) => "warn",
            _ => "weft_core=info,weft_cli=info",
        }
    }
}

pub fn cli() -> Command {
    let trailing = |help: &'static str| {
        Arg::new("args")
            .value_name("ARGS")
            .help(help)
            .num_args(1..)
            .required(true)
            .trailing_var_arg(true)
            .allow_hyphen_values(true)
    };

    Command::new("weft")
        .version(weft_core::VERSION)
        .about("Weave tracing hooks into Go builds at compile time")
        .subcommand_required(true)
        .arg(
            Arg::new("rules")
                .long("rules")
                .value_name("FILE")
                .help("Additional rule descriptor file (repeatable)")
                .action(ArgAction::Append)
                .global(true),
        )
        .arg(
            Arg::new("no-builtin-rules")
                .long("no-builtin-rules")
                .help("Do not load the rules compiled into weft")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("work-dir")
                .long("work-dir")
                .value_name("DIR")
                .help("Work directory, relative to the module root")
                .global(true),
        )
        .arg(
            Arg::new("keep-work")
                .long("keep-work")
                .help("Keep woven sources after the build")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .help("Enable debug logging")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(Command::new("setup").about("Prepare the module for woven builds and leave it prepared"))
        .subcommand(Command::new("restore").about("Undo a prepared module"))
        .subcommand(
            Command::new("go")
                .about("Run a go command with weaving, e.g. `weft go build ./...`")
                .arg(trailing("Arguments for the go command")),
        )
        .subcommand(
            Command::new("rules").about("Validate and list rules").arg(
                Arg::new("files")
                    .value_name("FILES")
                    .help("Rule descriptor files to validate")
                    .num_args(0..),
            ),
        )
        .subcommand(
            Command::new("toolexec")
                .about("Toolchain interceptor run by the go command")
                .hide(true)
                .arg(trailing("Tool path followed by its arguments")),
        )
}

/// Environment configuration overlaid with the global flags.
pub fn config_from_matches(matches: &ArgMatches) -> Result<WeftConfig> {
    let mut config = WeftConfig::from_env().context("reading WEFT_* environment")?;
    if let Some(files) = matches.get_many::<String>("rules") {
        config.rule_files.extend(files.map(PathBuf::from));
    }
    if matches.get_flag("no-builtin-rules") {
        config.builtin_rules = false;
    }
    if let Some(dir) = matches.get_one::<String>("work-dir") {
        config.work_dir = dir.into();
    }
    if matches.get_flag("keep-work") {
        config.keep_work_dir = true;
    }
    config.debug = matches.get_flag("debug");
    Ok(config)
}

/// Execute `command`, returning the process exit code.
pub fn run(command: WeftCommand, config: &WeftConfig) -> Result<i32> {
    match command {
        WeftCommand::Setup => setup(config),
        WeftCommand::Restore => {
            let cwd = std::env::current_dir()?;
            BuildSession::restore(config, &cwd).context("restoring module")?;
            println!("Module restored");
            Ok(0)
        }
        WeftCommand::Go(args) => go(config, &args),
        WeftCommand::Rules(files) => list_rules(config, &files),
        WeftCommand::Toolexec(args) => {
            let interceptor = Interceptor::from_config(config)?;
            Ok(interceptor.run(args)?)
        }
    }
}

fn setup(config: &WeftConfig) -> Result<i32> {
    let cwd = std::env::current_dir()?;
    let guard = BuildSession::begin(config, &GoToolchain::default(), &cwd)
        .context("preparing module")?;
    let state = guard.persist();
    println!("Module prepared; work directory {}", state.work_dir.display());
    println!("Run `weft restore` to undo");
    Ok(0)
}

fn go(config: &WeftConfig, args: &[String]) -> Result<i32> {
    let cwd = std::env::current_dir()?;
    let toolchain = GoToolchain::default();
    let exe = std::env::current_exe().context("locating the weft executable")?;

    let guard = BuildSession::begin(config, &toolchain, &cwd).context("preparing module")?;
    let status = guard.run_build(&toolchain, &exe, args)?;
    guard.restore().context("restoring module")?;

    // no exit code means the build was stopped by a signal
    let code = status.code().unwrap_or(130);
    info!(code, "Build finished");
    Ok(code)
}

fn list_rules(config: &WeftConfig, files: &[PathBuf]) -> Result<i32> {
    let mut config = config.clone();
    config.rule_files.extend(files.iter().cloned());
    let rules = RuleSet::load(&config)?;

    for rule in rules.rules() {
        let version = rule
            .version
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "*".to_string());
        println!(
            "{:<32} {:<6} {:<40} {:<14} {}",
            rule.name,
            rule.kind.label(),
            rule.target,
            version,
            rule.origin
        );
    }
    println!("{} rules, fingerprint {}", rules.len(), rules.fingerprint());
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> WeftCommand {
        let matches = cli().try_get_matches_from(argv).unwrap();
        WeftCommand::from_matches(&matches).unwrap()
    }

    #[test]
    fn test_go_args_pass_through() {
        assert_eq!(
            parse(&["weft", "go", "build", "-o", "app", "./..."]),
            WeftCommand::Go(vec!["build".into(), "-o".into(), "app".into(), "./...".into()])
        );
    }

    #[test]
    fn test_toolexec_args() {
        assert_eq!(
            parse(&["weft", "toolexec", "/go/pkg/tool/compile", "-V=full"]),
            WeftCommand::Toolexec(vec!["/go/pkg/tool/compile".into(), "-V=full".into()])
        );
    }

    #[test]
    fn test_rules_files_and_global_flags() {
        let matches = cli()
            .try_get_matches_from(["weft", "rules", "--no-builtin-rules", "a.yaml", "b.yaml"])
            .unwrap();
        assert!(matches.get_flag("no-builtin-rules"));
        assert_eq!(
            WeftCommand::from_matches(&matches),
            Some(WeftCommand::Rules(vec!["a.yaml".into(), "b.yaml".into()]))
        );
    }

    #[test]
    fn test_subcommand_required() {
        assert!(cli().try_get_matches_from(["weft"]).is_err());
    }

    #[test]
    fn test_log_directive() {
        assert_eq!(WeftCommand::Toolexec(vec![]).default_log_directive(false), "warn");
        assert_eq!(WeftCommand::Setup.default_log_directive(false), "weft_core=info,weft_cli=info");
    }
}
