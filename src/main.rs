use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use tether::cache::LargeObjectCache;
use tether::comm::line::{self, LinePeer};
use tether::comm::local::{self, LocalWorker};
use tether::comm::{Outcome, StartRequest};
use tether::instrument::instrument_source;
use tether::script::ast::StmtKind;
use tether::script::unparse::unparse_module;
use tether::script::{EntryPoint, HOOK_NAME};
use tether::{util, value, Config, Registry, RunnerHost, RunnerSettings};

/// Run workflow scripts as durable, replayable workflows
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory (defaults to ~/.tether)
    #[arg(long, global = true, env = "TETHER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Config file (defaults to <data-dir>/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log to stderr instead of the log file
    #[arg(long, global = true)]
    log_stderr: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve sessions for a worker over the line protocol
    Worker {
        /// Worker TCP address (stdin/stdout when neither this nor the config sets one)
        #[arg(short, long)]
        address: Option<String>,

        /// Directory holding the workflow code
        #[arg(short, long)]
        code_dir: Option<PathBuf>,
    },
    /// Run one session locally, executing every activity in-process
    Run {
        /// Entry point, `path/to/file.flow:function`
        entry_point: String,

        /// Event passed to the entry function, as JSON
        #[arg(short, long)]
        event: Option<String>,

        /// Directory holding the workflow code
        #[arg(short, long)]
        code_dir: Option<PathBuf>,
    },
    /// Print a workflow file with every call routed through the hook
    Instrument {
        file: PathBuf,
    },
    /// Parse and instrument an entry point without running it
    Check {
        entry_point: String,

        #[arg(short, long)]
        code_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    util::init_data_dir(cli.data_dir.clone());
    init_logging(cli.log_stderr)?;

    match cli.command {
        Commands::Instrument { file } => instrument_file(&file),
        Commands::Check {
            entry_point,
            code_dir,
        } => {
            let code_dir = match code_dir {
                Some(dir) => dir,
                None => load_config(cli.config.as_deref())?.code_dir,
            };
            check(&code_dir, &entry_point)
        }
        Commands::Run {
            entry_point,
            event,
            code_dir,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(dir) = code_dir {
                config = config.with_code_dir(dir);
            }
            run(config, entry_point, event).await
        }
        Commands::Worker { address, code_dir } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(dir) = code_dir {
                config = config.with_code_dir(dir);
            }
            if let Some(address) = address {
                config = config.with_worker_address(address);
            }
            serve_worker(config).await
        }
    }
}

fn init_logging(log_stderr: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    if log_stderr {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(());
    }

    // Log to file (~/.tether/logs/tether.log); stdout may carry the protocol
    fs::create_dir_all(util::logs_dir())?;
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(util::log_file_path())?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(log_file)
        .with_ansi(false)
        .init();
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    Ok(config)
}

fn build_host(config: &Config, worker: Arc<dyn tether::Worker>) -> Result<RunnerHost> {
    let registry = Registry::with_defaults().context("bundled registry is invalid")?;
    registry.extend(&config.registry);
    let cache = LargeObjectCache::open(&config.cache_dir, config.cache_threshold)?;

    let mut settings = RunnerSettings::new(&config.code_dir);
    settings.start_timeout = config.start_timeout;
    settings.cache = Some(Arc::new(cache));
    Ok(RunnerHost::new(worker, Arc::new(registry), settings))
}

async fn serve_worker(config: Config) -> Result<()> {
    let (reader, writer): (
        Box<dyn AsyncRead + Send + Unpin>,
        Box<dyn AsyncWrite + Send + Unpin>,
    ) = match &config.worker_address {
        Some(address) => {
            let stream = TcpStream::connect(address)
                .await
                .with_context(|| format!("failed to connect to worker at {address}"))?;
            tracing::info!(address = %address, "Connected to worker");
            let (r, w) = stream.into_split();
            (Box::new(r), Box::new(w))
        }
        None => {
            tracing::info!("Serving worker on stdin/stdout");
            (Box::new(tokio::io::stdin()), Box::new(tokio::io::stdout()))
        }
    };

    let peer = LinePeer::new(writer);
    let host = build_host(&config, Arc::new(peer.clone()))?;
    line::serve(reader, peer, Arc::new(host)).await?;
    Ok(())
}

async fn run(config: Config, entry_point: String, event: Option<String>) -> Result<()> {
    let event = match event {
        Some(raw) => {
            let json: serde_json::Value =
                serde_json::from_str(&raw).context("--event is not valid JSON")?;
            value::json::from_json(&json)
        }
        None => value::Value::Nothing,
    };

    let (worker, events) = LocalWorker::new();
    let host = build_host(&config, worker)?;
    let start = StartRequest {
        runner_id: uuid::Uuid::new_v4().to_string(),
        entry_point,
        event,
    };
    match local::drive(&host, events, start).await? {
        Outcome::Value(result) => {
            if !result.is_nothing() {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&value::json::to_json(&result))?
                );
            }
            Ok(())
        }
        Outcome::Error(report) => {
            eprintln!("{}", report.into_script_error().render());
            std::process::exit(1);
        }
    }
}

fn instrument_file(file: &Path) -> Result<()> {
    let source =
        fs::read_to_string(file).with_context(|| format!("cannot read {}", file.display()))?;
    let name = file
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "main".to_string());
    let module = instrument_source(&source, &name, &file.display().to_string(), HOOK_NAME)
        .with_context(|| format!("syntax error in {}", file.display()))?;
    print!("{}", unparse_module(&module));
    Ok(())
}

fn check(code_dir: &Path, entry_point: &str) -> Result<()> {
    let entry = EntryPoint::parse(entry_point)?;
    let path = code_dir.join(&entry.file);
    let source =
        fs::read_to_string(&path).with_context(|| format!("cannot read {}", path.display()))?;
    let module = instrument_source(&source, &entry.module, &path.display().to_string(), HOOK_NAME)
        .with_context(|| format!("syntax error in {}", path.display()))?;
    let defined = module
        .body
        .iter()
        .any(|stmt| matches!(&stmt.kind, StmtKind::Def(def) if def.name == entry.function));
    if !defined {
        bail!(
            "{} does not define a top-level function '{}'",
            entry.file.display(),
            entry.function
        );
    }
    println!("ok: {entry_point}");
    Ok(())
}
