use std::path::PathBuf;
use std::str::FromStr;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    about = "Exchanges ping messages between the coordinator and all workers of a run.",
    version = env!("CARGO_PKG_VERSION")
)]
pub struct MainOptions {
    /// Log level, scopable to different modules
    ///
    /// Levels: trace, debug, info, warn, error
    #[structopt(
        short,
        long,
        default_value = "info",
        env = "RUST_LOG",
        value_name = "level"
    )]
    pub log: String,

    /// Log output format
    ///
    /// Formats: text, compact
    #[structopt(long, default_value = "text", value_name = "format")]
    pub log_format: LogFormat,

    /// JSON configuration of this participant
    #[structopt(short, long, env = "FEDLINK_CONFIG", value_name = "path")]
    pub config: PathBuf,

    /// Number of ping rounds per worker
    #[structopt(long, default_value = "1")]
    pub rounds: u32,

    /// Size of the payload attached to each ping
    #[structopt(long, default_value = "0", value_name = "bytes")]
    pub payload_bytes: usize,
}

#[derive(Debug)]
pub enum LogFormat {
    Text,
    Compact,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(LogFormat::Text),
            "compact" => Ok(LogFormat::Compact),
            other => Err(format!("unknown log format {}", other)),
        }
    }
}
