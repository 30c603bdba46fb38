use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use mcall_core::{Encoding, Format, WorkKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Cmd,
    Get,
    Post,
}

impl From<KindArg> for WorkKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Cmd => WorkKind::Command,
            KindArg::Get => WorkKind::HttpGet,
            KindArg::Post => WorkKind::HttpPost,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Json,
    Plain,
}

impl From<FormatArg> for Format {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Json => Format::Json,
            FormatArg::Plain => Format::Plain,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EncodingArg {
    Std,
    Url,
}

impl From<EncodingArg> for Encoding {
    fn from(encoding: EncodingArg) -> Self {
        match encoding {
            EncodingArg::Std => Encoding::Std,
            EncodingArg::Url => Encoding::Url,
        }
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "mcall", version, about = "Concurrent probe and command execution engine")]
pub struct Cli {
    /// Input; comma-separated for multiple items.
    #[arg(short = 'i', long = "input")]
    pub input: Option<String>,

    /// Request kind applied to URL inputs.
    #[arg(short = 't', long = "type", value_enum, default_value_t = KindArg::Cmd)]
    pub kind: KindArg,

    /// Name label applied to all items.
    #[arg(short = 'n', long = "name")]
    pub name: Option<String>,

    /// Output format.
    #[arg(short = 'f', long = "format", value_enum)]
    pub format: Option<FormatArg>,

    /// Base64-encode result content with the given alphabet.
    #[arg(short = 'e', long = "encoding", value_enum)]
    pub encoding: Option<EncodingArg>,

    /// Start the HTTP server instead of running one-shot.
    #[arg(
        short = 'w',
        long = "web",
        num_args = 0..=1,
        default_missing_value = "true",
        default_value_t = false
    )]
    pub web: bool,

    /// HTTP server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// YAML configuration path.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
}
