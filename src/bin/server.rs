use clap::Parser;
use dotenv::dotenv;
use stonechat::{server, setup_server_tracing, AppResult, ChatConfig, Shutdown};
use tokio::runtime;
use tokio::sync::broadcast;
use tracing::{error, info};

#[derive(Parser)]
#[command(version, about = "stonechat server")]
pub struct CommandLine {
    /// port of the user listener
    pub port: u16,
    /// separate port for private relay connections
    #[arg(long)]
    pub private_port: Option<u16>,
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    /// directory of the rolling log files
    #[arg(long, default_value = "logs")]
    pub log_dir: String,
    #[command(subcommand)]
    pub command: Option<Command>,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Parser)]
pub enum Command {
    PrintConfig,
}

fn main() -> AppResult<()> {
    dotenv().ok();
    let commandline = CommandLine::parse();
    let _guard = setup_server_tracing(&commandline.log_dir, commandline.verbose);

    let mut config = ChatConfig::set_up_config(commandline.conf.as_ref())?;
    config.network.port = commandline.port;
    if commandline.private_port.is_some() {
        config.network.private_port = commandline.private_port;
    }
    config.validate()?;

    if let Some(Command::PrintConfig) = commandline.command {
        println!("{:#?}", config);
        return Ok(());
    }

    // one thread drives every connection
    let rt = runtime::Builder::new_current_thread().enable_all().build()?;
    rt.block_on(async {
        let (notify_shutdown, _) = broadcast::channel(1);
        let shutdown = Shutdown::new(notify_shutdown.subscribe());
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("ctrl-c received, shutting down");
                let _ = notify_shutdown.send(());
            }
        });

        if let Err(err) = server::serve(&config, shutdown).await {
            error!("server stopped with error: {}", err);
            return Err(err);
        }
        Ok(())
    })
}
