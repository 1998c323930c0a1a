use std::process;

use weft_cli::{cli, config_from_matches, run, WeftCommand};
use weft_core::init_tracing;

fn main() {
    let matches = cli().get_matches();
    let Some(command) = WeftCommand::from_matches(&matches) else {
        eprintln!("weft: unknown command");
        process::exit(2);
    };

    let debug = matches.get_flag("debug");
    init_tracing(command.default_log_directive(debug));

    let code = match config_from_matches(&matches).and_then(|config| run(command, &config)) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("weft: {err:#}");
            1
        }
    };
    process::exit(code);
}
