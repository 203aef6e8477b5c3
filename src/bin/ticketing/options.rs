use std::str::FromStr;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    about = "Durable, load balanced consumption of ticketing events.",
    version = env!("CARGO_PKG_VERSION")
)]
pub struct MainOptions {
    /// Log level, scopable to different modules
    ///
    /// Levels: trace, debug, info, warn, error
    #[structopt(
        short,
        long,
        global = true,
        default_value = "info,redis=warn",
        env = "RUST_LOG",
        value_name = "level"
    )]
    pub log: String,

    /// Output format of log messages
    #[structopt(
        long,
        global = true,
        env,
        default_value = "text",
        possible_values = &["text", "compact", "json"],
        value_name = "format"
    )]
    pub log_format: LogFormat,

    #[structopt(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Text,
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err("unknown log format, expected one of text, compact or json"),
        }
    }
}

#[derive(Debug, StructOpt)]
pub enum Command {
    /// Consume ticket:created events as a member of a durable group
    Listen(ticketing::module::listen::Options),
    /// Publish ticket:created events
    Publish(ticketing::module::publish::Options),
}
