use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "vigild", version, about)]
pub struct CliOpts {
    /// Path to the configuration file overlaying the built-in defaults.
    #[arg(short, long)]
    pub config: Option<String>,

    #[arg(long, value_enum, default_value = "compact")]
    pub log_format: LogFormat,

    /// Check a single trigger by id and exit.
    #[arg(short = 't', long)]
    pub trigger: Option<String>,
}
