use std::fs::{self, OpenOptions};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use sqlnav_adapters::default_registry;
use sqlnav_core::config::{FileSettingsStore, SavedConnection, Settings};
use sqlnav_core::dsn::redact_dsn;
use sqlnav_core::events::Event;
use sqlnav_core::history::{FileHistory, HistorySink, NoopHistory};
use sqlnav_core::Orchestrator;
use sqlnav_tui::{ConnectTarget, TuiError};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "sqlnav.log";
const HISTORY_FILE: &str = "history.ndjson";
const LOG_FILTER_ENV: &str = "SQLNAV_LOG";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct CliArgs {
    connection: Option<String>,
    adapter: Option<String>,
    dsn: Option<String>,
    save_as: Option<String>,
    config: Option<PathBuf>,
    list: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ParseOutcome {
    Run(CliArgs),
    HelpRequested,
}

fn parse_args_from(args: impl IntoIterator<Item = String>) -> io::Result<ParseOutcome> {
    let mut parsed = CliArgs::default();
    let mut args = args.into_iter();

    while let Some(flag) = args.next() {
        match flag.as_str() {
            "-h" | "--help" => return Ok(ParseOutcome::HelpRequested),
            "-c" | "--connection" => parsed.connection = Some(next_value(&mut args, &flag)?),
            "--adapter" => parsed.adapter = Some(next_value(&mut args, &flag)?),
            "--dsn" => parsed.dsn = Some(next_value(&mut args, &flag)?),
            "--save" => parsed.save_as = Some(next_value(&mut args, &flag)?),
            "--config" => parsed.config = Some(PathBuf::from(next_value(&mut args, &flag)?)),
            "--list" => parsed.list = true,
            _ => return Err(io_other(format!("unknown argument `{flag}`"))),
        }
    }

    Ok(ParseOutcome::Run(parsed))
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> io::Result<String> {
    args.next()
        .ok_or_else(|| io_other(format!("missing value for `{flag}`")))
}

fn io_other(message: impl Into<String>) -> io::Error {
    io::Error::other(message.into())
}

/// Picks the connection to open at startup. An ad-hoc adapter/DSN pair is
/// saved under `--save` when given.
fn resolve_target(
    args: &CliArgs,
    store: &mut FileSettingsStore,
) -> io::Result<Option<ConnectTarget>> {
    match (&args.connection, &args.adapter, &args.dsn) {
        (Some(_), Some(_), _) | (Some(_), _, Some(_)) => Err(io_other(
            "`--connection` cannot be combined with `--adapter`/`--dsn`",
        )),
        (Some(name), None, None) => {
            let saved = store
                .connection(name)
                .ok_or_else(|| io_other(format!("no saved connection named `{name}`")))?;
            Ok(Some(target_from(saved)))
        }
        (None, Some(adapter), Some(dsn)) => {
            let name = args.save_as.clone().unwrap_or_else(|| "ad-hoc".to_string());
            let connection = SavedConnection::new(name, adapter.clone(), dsn.clone());
            if args.save_as.is_some() {
                store.upsert_connection(connection.clone());
                store
                    .persist()
                    .map_err(|error| io_other(error.to_string()))?;
            }
            Ok(Some(target_from(&connection)))
        }
        (None, Some(_), None) | (None, None, Some(_)) => Err(io_other(
            "`--adapter` and `--dsn` must be given together",
        )),
        (None, None, None) => Ok(None),
    }
}

fn target_from(saved: &SavedConnection) -> ConnectTarget {
    ConnectTarget {
        name: saved.name.clone(),
        adapter: saved.adapter.clone(),
        dsn: saved.dsn.clone(),
    }
}

fn history_sink(settings: &Settings, config_dir: &Path) -> Arc<dyn HistorySink> {
    if !settings.history.enabled {
        return Arc::new(NoopHistory);
    }
    let path = settings
        .history
        .path
        .clone()
        .unwrap_or_else(|| config_dir.join(HISTORY_FILE));
    Arc::new(FileHistory::from_path(path))
}

/// Sends logs to a file next to the settings; the terminal belongs to the UI.
fn init_logging(config_dir: &Path) -> io::Result<()> {
    fs::create_dir_all(config_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(config_dir.join(LOG_FILE))?;
    let filter =
        EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|error| io_other(error.to_string()))
}

fn list_connections(settings: &Settings) -> String {
    if settings.connections.is_empty() {
        return "no saved connections".to_string();
    }
    settings
        .connections
        .iter()
        .map(|connection| {
            format!(
                "{}\t{}\t{}",
                connection.name,
                connection.adapter,
                redact_dsn(&connection.dsn)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

async fn run_app<F, Fut>(
    settings: &Settings,
    history: Arc<dyn HistorySink>,
    target: Option<ConnectTarget>,
    run_tui: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: FnOnce(Orchestrator, UnboundedReceiver<Event>, Option<ConnectTarget>) -> Fut,
    Fut: Future<Output = Result<(), TuiError>>,
{
    let registry = default_registry();
    info!(adapters = ?registry.names(), "starting");
    let (orchestrator, events) = Orchestrator::new(registry, settings.limits, history);
    run_tui(orchestrator, events, target).await?;
    info!("exited");
    Ok(())
}

fn print_help() {
    println!(
        "sqlnav: terminal SQL navigator\n\n\
Usage:\n  sqlnav [OPTIONS]\n\n\
Options:\n  -c, --connection <name>  Open a saved connection\n  --adapter <name>         Adapter for an ad-hoc connection (mysql, postgres)\n  --dsn <dsn>              DSN for an ad-hoc connection\n  --save <name>            Save the ad-hoc connection under this name\n  --config <path>          Settings file (default: <config dir>/settings.toml)\n  --list                   Print saved connections and exit\n  -h, --help               Show this help\n\n\
Environment:\n  SQLNAV_CONFIG_DIR        Override the config directory\n  SQLNAV_LOG               Log filter (default: info)"
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = match parse_args_from(std::env::args().skip(1))? {
        ParseOutcome::Run(args) => args,
        ParseOutcome::HelpRequested => {
            print_help();
            return Ok(());
        }
    };

    let mut store = match &args.config {
        Some(path) => FileSettingsStore::load_from_path(path.clone())?,
        None => FileSettingsStore::load_default()?,
    };
    if args.list {
        println!("{}", list_connections(store.settings()));
        return Ok(());
    }

    let config_dir = store
        .path()
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    init_logging(&config_dir)?;

    let target = resolve_target(&args, &mut store)?;
    let history = history_sink(store.settings(), &config_dir);
    run_app(store.settings(), history, target, sqlnav_tui::run).await
}
