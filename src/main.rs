use clap::{Arg, ArgAction, ArgMatches, Command};
use colored::Colorize;
use log::{error, info};
use pacrelay::{
    config::Config,
    pipeline::{OperationReport, Orchestrator},
    service::{RestartRequest, ServiceRestarter},
    utils::format_duration,
    RelayResult, PACRELAY_VERSION,
};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

/// Exit status when the operation ran but reported failure.
const EXIT_OPERATION_FAILED: i32 = 2;

#[tokio::main]
async fn main() {
    let matches = build_cli().get_matches();
    init_logging(matches.get_flag("verbose"));
    let start_time = Instant::now();

    let code = match run_command(&matches).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            1
        }
    };

    info!(
        "Operation completed in {}",
        format_duration(start_time.elapsed().as_secs())
    );
    std::process::exit(code);
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

fn build_cli() -> Command {
    Command::new("pacrelay")
        .version(PACRELAY_VERSION)
        .about("Runs pacman update steps one at a time and keeps their outcome on disk.")
        .arg(Arg::new("verbose")
            .short('v')
            .long("verbose")
            .global(true)
            .action(ArgAction::SetTrue))
        .arg(Arg::new("config")
            .short('c')
            .long("config")
            .global(true)
            .value_name("CONFIG"))
        .subcommand_required(true)
        .subcommand(Command::new("sync")
            .about("Synchronize the package database against the local repository"))
        .subcommand(Command::new("upgrade-deps")
            .about("List the files needed to upgrade installed packages"))
        .subcommand(Command::new("package-deps")
            .about("List the files needed to install a package")
            .arg(Arg::new("package")
                .required(true)
                .help("Package name")))
        .subcommand(Command::new("upgrade")
            .about("Upgrade all packages from the local repository"))
        .subcommand(Command::new("install")
            .about("Install a package from the local repository")
            .arg(Arg::new("package")
                .required(true)
                .help("Package name")))
        .subcommand(Command::new("result")
            .about("Report whether the last pacman run succeeded"))
        .subcommand(Command::new("last-run")
            .about("Show everything recorded about the last pacman run"))
        .subcommand(Command::new("receive-db")
            .about("Accept a verified repository database and sync against it")
            .arg(Arg::new("file")
                .required(true)
                .value_parser(clap::value_parser!(PathBuf))
                .help("Received database file")))
        .subcommand(Command::new("receive-package")
            .about("Accept a verified package file into the local repository")
            .arg(Arg::new("file")
                .required(true)
                .value_parser(clap::value_parser!(PathBuf))
                .help("Received package file")))
        .subcommand(Command::new("startup")
            .about("Discard state that must not survive a front-end restart"))
        .subcommand(Command::new("show-config")
            .about("Print the effective configuration"))
}

async fn run_command(matches: &ArgMatches) -> RelayResult<i32> {
    let config = Config::load(matches.get_one::<String>("config").map(String::as_str))?;
    let orchestrator = Orchestrator::new(&config)?;

    match matches.subcommand() {
        Some(("sync", _)) => emit(orchestrator.sync_repository().await),
        Some(("upgrade-deps", _)) => emit(orchestrator.list_upgrade_dependencies().await),
        Some(("package-deps", sub_matches)) => {
            let package = required_string(sub_matches, "package");
            emit(orchestrator.list_package_dependencies(&package).await)
        }
        Some(("upgrade", _)) => {
            let report = orchestrator.upgrade().await;
            finish_with_restart(&config, report).await
        }
        Some(("install", sub_matches)) => {
            let package = required_string(sub_matches, "package");
            let report = orchestrator.install_package(&package).await;
            finish_with_restart(&config, report).await
        }
        Some(("result", _)) => emit(orchestrator.query_last_result()),
        Some(("last-run", _)) => {
            let record = orchestrator.last_run()?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(0)
        }
        Some(("receive-db", sub_matches)) => {
            let file = required_path(sub_matches);
            emit(orchestrator.receive_repository_database(&file).await)
        }
        Some(("receive-package", sub_matches)) => {
            let file = required_path(sub_matches);
            emit(orchestrator.receive_artifact(&file))
        }
        Some(("startup", _)) => {
            orchestrator.startup()?;
            Ok(0)
        }
        Some(("show-config", _)) => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(0)
        }
        _ => {
            build_cli().print_help()?;
            Ok(1)
        }
    }
}

fn required_string(matches: &ArgMatches, name: &str) -> String {
    matches
        .get_one::<String>(name)
        .cloned()
        .unwrap_or_default()
}

fn required_path(matches: &ArgMatches) -> PathBuf {
    matches
        .get_one::<PathBuf>("file")
        .cloned()
        .unwrap_or_default()
}

/// Writes the JSON body a polling client expects and maps the report to an
/// exit status.
fn emit<T: Serialize>(report: OperationReport<T>) -> RelayResult<i32> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", serde_json::to_string(&report.value)?)?;
    stdout.flush()?;

    match &report.failure {
        None => Ok(0),
        Some(failure) => {
            eprintln!("{}: {}", "Failed".red().bold(), failure);
            if let Some(stderr) = report.diagnostics() {
                eprintln!("{}", stderr.trim_end().dimmed());
            }
            Ok(EXIT_OPERATION_FAILED)
        }
    }
}

/// The response goes out first; the restart may take this process down.
/// Once the service has been restarted the operation's own outcome lives in
/// the JSON body and the result record, and the exit status is 0.
async fn finish_with_restart(config: &Config, report: OperationReport<bool>) -> RelayResult<i32> {
    let restart: Option<RestartRequest> = report.restart.clone();
    let code = emit(report)?;
    let restarted = match restart {
        Some(request) => match ServiceRestarter::new(config).restart(&request).await {
            Ok(()) => true,
            Err(e) => {
                error!("{}", e);
                false
            }
        },
        None => false,
    };
    Ok(exit_status(code, restarted))
}

fn exit_status(reported: i32, restarted: bool) -> i32 {
    if restarted { 0 } else { reported }
}
