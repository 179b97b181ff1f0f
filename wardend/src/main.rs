use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use wardend::config::Config;
use wardend::cookie::Cookie;
use wardend::decoder::{self, CorrelationTable};
use wardend::logging::{self, EventLog, EventMask, ThreatLog};
use wardend::metrics::Metrics;
use wardend::probes::{ProbeController, ProbePaths};
use wardend::rule_engine::RuleEngine;
use wardend::scan;
use wardend::store::Store;
use wardend::task::TaskTable;
use wardend::yara_scan;

/// Behavioral security monitor: ftrace-driven process/ELF threat detection.
#[derive(Parser, Debug)]
#[command(name = "wardend", version, about)]
struct Cli {
    /// Event categories to log: "a" for all, or a colon-separated subset
    /// of category codes (x,t,s,f,m,p,n).
    #[arg(short = 'e', long = "events", default_value = "a")]
    events: String,

    /// Enable debug-level logging.
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Also print event/threat records to stdout.
    #[arg(short = 's', long = "stdout")]
    stdout: bool,

    /// Path to the configuration file (overrides WARDEND_CONFIG and the
    /// default /etc/wardend/wardend.toml).
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        std::env::set_var("WARDEND_CONFIG", path);
    }
    let config = Config::load();

    logging::init_console_logger(cli.debug || config.logging.debug);

    match run(cli, config).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            log::error!("fatal error during startup: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    let self_exe = std::fs::read_link("/proc/self/exe").unwrap_or_else(|_| PathBuf::from("wardend"));

    let store = Arc::new(Store::new(&config.store.db_path).await?);
    log::info!("running startup executable inventory scan");
    scan::scan_system(store.clone()).await;

    let scanner = yara_scan::build_scanner(std::path::Path::new(&config.store.rules_dir));
    if scanner.has_rules() {
        log::info!("yara rules loaded from {}", config.store.rules_dir);
    } else {
        log::info!("no yara rules loaded, malware scanning disabled");
    }

    let tasks = Arc::new(TaskTable::new());
    let metrics = Arc::new(Metrics::new());

    let event_mask = EventMask::parse(&cli.events);
    let stdout = cli.stdout || config.logging.stdout;
    let event_log = Arc::new(EventLog::open(&config.logging.events_file, stdout, event_mask).await?);
    let threat_log = Arc::new(ThreatLog::open(&config.logging.threats_file, stdout).await?);

    let cookie = Cookie::generate();
    let probe_paths = ProbePaths::under(std::path::Path::new(&config.runtime.tracing_dir));
    let mut probes = ProbeController::new(probe_paths, cookie);

    if let Err(e) = probes.install_all().await {
        anyhow::bail!("failed to install kernel probes: {e}");
    }

    let shutdown = Arc::new(tokio::sync::Notify::new());
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.notify_waiters();
        })?;
    }

    let (line_tx, mut line_rx) = mpsc::channel::<String>(config.runtime.line_queue_cap);
    let (event_tx, mut event_rx) = mpsc::channel::<wardend::event::Event>(config.runtime.event_queue_cap);

    let trace_pipe_path = probes.trace_pipe_path().to_path_buf();
    let line_reader = tokio::spawn(async move {
        if let Err(e) = read_trace_pipe(&trace_pipe_path, line_tx).await {
            log::error!("trace pipe reader stopped: {e}");
        }
    });

    let ttl = std::time::Duration::from_secs(config.runtime.correlation_ttl_secs);
    let decoder_metrics = metrics.clone();
    let decoder_task = tokio::spawn(async move {
        let mut correlation = CorrelationTable::new(ttl);
        while let Some(line) = line_rx.recv().await {
            decoder_metrics.line_read();
            let Some(split) = decoder::split_fields(&line) else {
                decoder_metrics.line_malformed();
                continue;
            };
            let Some(args) = decoder::decode_args(&split, &cookie) else {
                continue;
            };
            let event = decoder::build_event(split, args);
            match correlation.step(event) {
                Some(correlated) => {
                    decoder_metrics.correlation_paired();
                    if event_tx.send(correlated).await.is_err() {
                        break;
                    }
                }
                None => decoder_metrics.correlation_pending_inserted(),
            }
        }
    });

    let engine_tasks = tasks.clone();
    let engine_store = store.clone();
    let engine_metrics = metrics.clone();
    let engine_event_log = event_log.clone();
    let engine_threat_log = threat_log.clone();
    let files_dir = PathBuf::from(&config.store.files_dir);
    let engine_shutdown = shutdown.clone();
    let engine_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                maybe_event = event_rx.recv() => {
                    let Some(event) = maybe_event else { break };
                    let engine = RuleEngine {
                        tasks: engine_tasks.as_ref(),
                        store: engine_store.as_ref(),
                        scanner: scanner.as_ref(),
                        files_dir: &files_dir,
                        self_exe: &self_exe,
                        metrics: engine_metrics.as_ref(),
                        event_log: engine_event_log.as_ref(),
                        threat_log: engine_threat_log.as_ref(),
                    };
                    engine.dispatch(event).await;
                }
                _ = engine_shutdown.notified() => break,
            }
        }
    });

    shutdown.notified().await;
    log::info!("shutdown signal received, tearing down probes");
    probes.teardown().await;
    line_reader.abort();
    decoder_task.abort();
    engine_task.abort();
    metrics.log_snapshot();

    Ok(())
}

async fn read_trace_pipe(path: &std::path::Path, tx: mpsc::Sender<String>) -> std::io::Result<()> {
    use tokio::io::{AsyncBufReadExt, BufReader};

    let file = tokio::fs::File::open(path).await?;
    let mut lines = BufReader::new(file).lines();
    while let Some(line) = lines.next_line().await? {
        if tx.send(line).await.is_err() {
            break;
        }
    }
    Ok(())
}
