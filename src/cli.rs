//! CLI definition and dispatch.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::rate_http;
use crate::adapters::sqlite_store::SqliteStore;
use crate::domain::error::LedgerError;
use crate::domain::rates::{self, RateTable};
use crate::domain::transfer::{self, ImportOptions, ImportPayload};
use crate::ports::config_port::ConfigPort;
use crate::ports::rate_source_port::RateSource;

#[derive(Parser, Debug)]
#[command(name = "finledger", about = "Multi-platform multi-currency trading ledger")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the database schema and seed defaults
    Init {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Start the JSON API server
    Serve {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Refresh exchange rates from external sources
    RefreshRates {
        #[arg(short, long)]
        config: PathBuf,
        /// Repeat every N milliseconds instead of refreshing once
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    /// Stream a full ledger export to stdout or a file
    Export {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Import a ledger export file in one atomic transaction
    Import {
        #[arg(short, long)]
        config: PathBuf,
        /// Export file to read
        file: PathBuf,
        /// Keep existing transactions instead of replacing them
        #[arg(long)]
        keep_existing: bool,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "finledger=info".into()),
        )
        .with_writer(std::io::stderr)
        .try_init();

    match cli.command {
        Command::Init { config } => run_init(&config),
        Command::Serve { config } => run_serve(&config),
        Command::RefreshRates {
            config,
            interval_ms,
        } => run_refresh_rates(&config, interval_ms),
        Command::Export { config, output } => run_export(&config, output.as_ref()),
        Command::Import {
            config,
            file,
            keep_existing,
        } => run_import(&config, &file, keep_existing),
    }
}

pub fn load_config(path: &PathBuf) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| {
        eprintln!("error: cannot read config {}: {e}", path.display());
        ExitCode::from(1)
    })
}

fn open_store(config: &dyn ConfigPort) -> Result<SqliteStore, ExitCode> {
    SqliteStore::from_config(config).map_err(|e| {
        eprintln!("error: {e}");
        ExitCode::from(&e)
    })
}

fn run_init(config_path: &PathBuf) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let store = match open_store(&config) {
        Ok(s) => s,
        Err(code) => return code,
    };
    match store.initialize_schema() {
        Ok(()) => {
            eprintln!("Database initialized");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(&e)
        }
    }
}

fn rate_pacing(config: &dyn ConfigPort) -> Duration {
    Duration::from_millis(config.get_int("rates", "pacing_ms", 200).max(0) as u64)
}

fn run_refresh_rates(config_path: &PathBuf, interval_ms: Option<u64>) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let store = match open_store(&config) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let sources = rate_http::default_sources();
    let refs: Vec<&dyn RateSource> = sources.iter().map(|s| &**s as &dyn RateSource).collect();
    let fallback = RateTable::builtin_fallback();
    let pacing = rate_pacing(&config);

    loop {
        match rates::refresh_rates(&store, &refs, &fallback, pacing) {
            Ok(refreshed) => eprintln!("Refreshed {} rates", refreshed.len()),
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::from(&e);
            }
        }
        match interval_ms {
            Some(ms) => std::thread::sleep(Duration::from_millis(ms)),
            None => return ExitCode::SUCCESS,
        }
    }
}

fn run_export(config_path: &PathBuf, output: Option<&PathBuf>) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let store = match open_store(&config) {
        Ok(s) => s,
        Err(code) => return code,
    };

    let export_time = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();
    let result = match output {
        Some(path) => fs::File::create(path)
            .map_err(LedgerError::from)
            .and_then(|mut file| transfer::export_to_writer(&store, export_time, &mut file)),
        None => transfer::export_to_writer(&store, export_time, &mut std::io::stdout().lock()),
    };

    match result {
        Ok(()) => {
            if let Some(path) = output {
                eprintln!("Exported to {}", path.display());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(&e)
        }
    }
}

fn run_import(config_path: &PathBuf, file: &PathBuf, keep_existing: bool) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let store = match open_store(&config) {
        Ok(s) => s,
        Err(code) => return code,
    };

    let payload: ImportPayload = match fs::read_to_string(file)
        .map_err(LedgerError::from)
        .and_then(|content| {
            serde_json::from_str(&content)
                .map_err(|e| LedgerError::validation(format!("malformed export file: {e}")))
        }) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(&e);
        }
    };

    match transfer::import_ledger(&store, payload, ImportOptions { keep_existing }) {
        Ok(report) => {
            eprintln!(
                "Imported {} platforms ({} skipped), {} transactions ({} skipped), {} settings",
                report.platforms.imported,
                report.platforms.skipped,
                report.transactions.imported,
                report.transactions.skipped,
                report.settings.imported,
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(&e)
        }
    }
}

fn run_serve(config_path: &PathBuf) -> ExitCode {
    #[cfg(feature = "web")]
    {
        use std::sync::Arc;

        use crate::adapters::web::{AppState, build_router};
        use crate::ports::store_port::LedgerStore;

        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(code) => return code,
        };
        let store = match open_store(&config) {
            Ok(s) => s,
            Err(code) => return code,
        };
        if let Err(e) = store.initialize_schema() {
            eprintln!("error: {e}");
            return ExitCode::from(&e);
        }

        let addr = match server_addr(&config) {
            Ok(addr) => addr,
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::from(&e);
            }
        };

        eprintln!("Starting API server on {addr}");

        let state = AppState {
            store: Arc::new(store) as Arc<dyn LedgerStore + Send + Sync>,
            rate_sources: Arc::new(rate_http::default_sources()),
            rate_pacing: rate_pacing(&config),
        };
        let router = build_router(state);

        tokio::runtime::Runtime::new().unwrap().block_on(async {
            let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
            axum::serve(listener, router).await.unwrap();
        });

        ExitCode::SUCCESS
    }

    #[cfg(not(feature = "web"))]
    {
        let _ = config_path;
        eprintln!("error: web feature is required for serve");
        ExitCode::from(1)
    }
}

/// Listen address for `serve`. A missing `[server] bind` defaults to
/// 127.0.0.1:3456; a malformed one is a config error, not a silent default.
#[cfg(feature = "web")]
fn server_addr(config: &FileConfigAdapter) -> Result<std::net::SocketAddr, LedgerError> {
    let bind = config
        .get_string("server", "bind")
        .unwrap_or_else(|| "127.0.0.1:3456".to_string());
    bind.parse().map_err(|_| {
        LedgerError::validation(format!("invalid config value [server] bind: {bind:?}"))
    })
}

#[cfg(all(test, feature = "web"))]
mod tests {
    use super::*;

    #[test]
    fn server_addr_defaults_when_unset() {
        let config = FileConfigAdapter::from_string("[sqlite]\npath = ledger.db\n").unwrap();
        assert_eq!(
            server_addr(&config).unwrap(),
            "127.0.0.1:3456".parse::<std::net::SocketAddr>().unwrap()
        );
    }

    #[test]
    fn server_addr_rejects_malformed_bind() {
        let config =
            FileConfigAdapter::from_string("[server]\nbind = not-an-address\n").unwrap();
        let err = server_addr(&config).unwrap_err();
        assert!(matches!(err, LedgerError::Validation { .. }));
        assert!(err.to_string().contains("not-an-address"));
    }
}
