use std::process;

use clap::Parser;

use wtd::config::Config;
use wtd::styling::{eprintln, error_message};

mod cli;
mod commands;

use cli::Cli;

/// Binary name from `argv[0]`, falling back to "wtd".
///
/// When installed as `wt`, the launcher stops after worktree readiness and
/// runs the command on the host (the `--no-docker` behavior).
fn binary_name() -> String {
    std::env::args()
        .next()
        .and_then(|arg0| {
            std::path::Path::new(&arg0)
                .file_stem()
                .and_then(|name| name.to_str())
                .map(String::from)
        })
        .unwrap_or_else(|| "wtd".to_string())
}

fn init_logging(cli: &Cli) {
    let filter = if cli.verbose {
        "debug"
    } else {
        cli.log_level.as_filter()
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn config_from(cli: &Cli) -> Config {
    let mut config = Config::from_env();
    config.extensions = cli.extensions.clone();
    config.rebuild = cli.rebuild;
    config.nocache = cli.nocache;
    config.no_gui = cli.no_gui;
    config.no_gpu = cli.no_gpu;
    config.no_container = cli.no_container;
    config.builder = cli.builder.clone();
    if let Some(platforms) = &cli.platforms {
        config.platforms = Some(
            platforms
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
        );
    }
    config
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    if cli.install {
        process::exit(commands::handle_install());
    }

    let config = config_from(&cli);

    let result = if cli.list {
        commands::handle_list()
    } else if let Some(scope) = &cli.prune {
        commands::handle_prune(&config, scope)
    } else if cli.ext_list {
        commands::handle_ext_list()
    } else if cli.doctor {
        commands::handle_doctor()
    } else if let Some(spec) = &cli.spec {
        let host_mode = cli.no_docker || binary_name() == "wt";
        commands::handle_launch(&config, spec, &cli.command, host_mode)
    } else {
        // No spec and no mode flag: usage error.
        let mut cmd = <Cli as clap::CommandFactory>::command();
        let _ = cmd.print_help();
        process::exit(2);
    };

    match result {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("{}", error_message(&err.to_string()));
            process::exit(wtd::error::exit_code(&err));
        }
    }
}
