use clap::Parser;
use std::path::PathBuf;

use ytxd::source::SourceKind;

#[derive(Parser)]
#[command(
    name = "ytxd",
    about = "YouTube caption listing and transcript download service",
    version = env!("GIT_DESCRIBE"),
)]
pub struct Cli {
    /// Config file (defaults to ~/.config/ytxd/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Caption backend
    #[arg(short, long, value_enum)]
    pub source: Option<SourceKind>,

    /// Log to stderr instead of the log file
    #[arg(long)]
    pub stderr: bool,
}
