use std::path::PathBuf;

use clap::Parser;
use providers::ProviderKind;

#[derive(Debug, Parser)]
#[command(
    name = "trackfetch",
    version,
    about = "Resolve and download lossless tracks through unreliable third-party backends"
)]
pub struct Args {
    /// Backend to resolve through: amazon, qobuz or tidal
    #[arg(value_parser = parse_provider)]
    pub provider: ProviderKind,

    /// Reference catalog track id
    pub track_id: String,

    /// ISRC of the recording (required by the qobuz backend)
    #[arg(long)]
    pub isrc: Option<String>,

    /// Backend-specific quality code (qobuz: 6/7/27, tidal: LOSSLESS/HI_RES)
    #[arg(long)]
    pub quality: Option<String>,

    /// Directory the file is written to
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Output filename; defaults to "<track_id>.flac"
    #[arg(long)]
    pub file_name: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

fn parse_provider(s: &str) -> Result<ProviderKind, String> {
    s.parse()
}
