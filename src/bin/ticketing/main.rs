use anyhow::Result;
use options::{Command, LogFormat};
use structopt::StructOpt;
use ticketing::harness::ModuleRunner;
use ticketing::library::communication::implementation::redis::RedisTransport;
use ticketing::module::listen::Listen;
use ticketing::module::publish::Publish;
use tracing::{error, info};

mod options;

#[tokio::main]
async fn main() -> Result<()> {
    let (command, runner) = init()?;

    let termination_reason = match command {
        Command::Listen(options) => runner.run(Listen::<RedisTransport>::new(options)).await,
        Command::Publish(options) => runner.run(Publish::<RedisTransport>::new(options)).await,
    };

    if termination_reason.is_failure() {
        error!(%termination_reason, "Exiting with failure");
        std::process::exit(1);
    }

    Ok(())
}

fn init() -> Result<(Command, ModuleRunner)> {
    let options = options::MainOptions::from_args();

    let formatter = tracing_subscriber::fmt().with_env_filter(options.log);

    match options.log_format {
        LogFormat::Text => formatter.init(),
        LogFormat::Compact => formatter.compact().init(),
        LogFormat::Json => formatter.json().init(),
    };

    info!("Ticketing {}", env!("CARGO_PKG_VERSION"));

    Ok((options.command, ModuleRunner::default()))
}
