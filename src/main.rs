use std::path::PathBuf;
use std::process::Command;

use eyre::{Result, WrapErr};
use log::{info, warn};

mod cli;

use cli::Cli;
use ytxd::config::{self, Config};
use ytxd::server::{self, AppState};
use ytxd::service::TranscriptService;

fn setup_logging(stderr: bool) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));

    if stderr {
        builder.target(env_logger::Target::Stderr).init();
        return Ok(());
    }

    let log_dir = log_dir();
    std::fs::create_dir_all(&log_dir)?;
    let log_file = log_dir.join("ytxd.log");

    let target = Box::new(std::fs::OpenOptions::new().create(true).append(true).open(&log_file)?);
    builder.target(env_logger::Target::Pipe(target)).init();

    info!("Logging initialized: {}", log_file.display());
    Ok(())
}

fn log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ytxd")
        .join("logs")
}

fn tool_version(name: &str) -> Option<String> {
    Command::new(name)
        .arg("--version")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| {
            String::from_utf8_lossy(&o.stdout)
                .trim()
                .lines()
                .next()
                .unwrap_or("")
                .to_string()
        })
}

fn build_after_help() -> String {
    let yt_dlp_line = match tool_version("yt-dlp") {
        Some(v) => format!("  \x1b[32m✅\x1b[0m yt-dlp     {v}"),
        None => "  \x1b[31m❌\x1b[0m yt-dlp     (not found, needed for --source media-extractor)".to_string(),
    };

    format!(
        "\nOPTIONAL TOOLS:\n{yt_dlp_line}\n\nConfig is read from: {}\nLogs are written to: {}",
        config::config_path().display(),
        log_dir().join("ytxd.log").display()
    )
}

/// File, then environment, then command line
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.apply_env()?;

    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(source) = cli.source {
        config.source = source;
    }
    Ok(config)
}

/// Resolves once `signal` fires; if the handler cannot be installed the
/// server runs until killed
async fn shutdown_on<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => {
            warn!("Could not listen for Ctrl-C, graceful shutdown disabled: {e}");
            std::future::pending::<()>().await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = <Cli as clap::CommandFactory>::command().after_help(build_after_help());
    let matches = cmd.get_matches();
    let cli = <Cli as clap::FromArgMatches>::from_arg_matches(&matches)?;

    setup_logging(cli.stderr)?;

    let config = load_config(&cli)?;
    let service = TranscriptService::from_config(&config).await?;
    let state = AppState::new(service, &config.default_language);
    let app = server::router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("binding {addr}"))?;
    info!("ytxd {} listening on http://{addr}", env!("GIT_DESCRIBE"));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_on(tokio::signal::ctrl_c()))
        .await
        .wrap_err("serving HTTP")?;
    Ok(())
}
