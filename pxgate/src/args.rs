use std::{net::SocketAddr, path::PathBuf};

use clap::{Parser, ValueEnum};

/// Multi-provider LLM API gateway.
#[derive(Debug, Parser)]
#[command(name = "pxgate", version)]
pub(crate) struct Args {
    /// Path to the pxgate.toml configuration file.
    #[arg(short, long, env = "PXGATE_CONFIG", default_value = "pxgate.toml")]
    pub config: PathBuf,

    /// Listen address, overriding the configuration file.
    #[arg(short, long, env = "PXGATE_LISTEN")]
    pub listen_address: Option<SocketAddr>,

    /// Log filter, e.g. "info" or "gateway=debug,server=info".
    #[arg(long, env = "PXGATE_LOG", default_value = "info")]
    pub log_filter: String,

    /// Generate a fresh API key, print it once, and exit.
    #[arg(long, value_enum)]
    pub generate_key: Option<KeyKindArg>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub(crate) enum KeyKindArg {
    /// Inference key (pxb_ prefix).
    Llm,
    /// Management key (pxm_ prefix).
    Management,
}

impl From<KeyKindArg> for store::KeyKind {
    fn from(kind: KeyKindArg) -> Self {
        match kind {
            KeyKindArg::Llm => store::KeyKind::Llm,
            KeyKindArg::Management => store::KeyKind::Management,
        }
    }
}
