use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use dotenv::dotenv;
use stonechat::client::{self, spawn_console, ClientOptions};
use stonechat::{setup_client_tracing, AppError, AppResult, ChatConfig, Shutdown};
use tokio::net::lookup_host;
use tokio::runtime;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};

#[derive(Parser)]
#[command(version, about = "stonechat client")]
pub struct CommandLine {
    pub host: String,
    pub port: u16,
    pub login: String,
    /// directory shared with private connection peers
    pub directory: Option<PathBuf>,
    /// port of the server's private relay listener, defaults to `port`
    #[arg(long)]
    pub private_port: Option<u16>,
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    /// directory of the log files
    #[arg(long, default_value = "logs")]
    pub log_dir: String,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

async fn resolve(host: &str, port: u16) -> AppResult<SocketAddr> {
    lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| AppError::InvalidValue(format!("unknown host {}", host)))
}

fn main() -> AppResult<()> {
    dotenv().ok();
    let commandline = CommandLine::parse();
    let _guard = setup_client_tracing(&commandline.log_dir, commandline.verbose);
    let config = ChatConfig::set_up_config(commandline.conf.as_ref())?;

    let rt = runtime::Builder::new_current_thread().enable_all().build()?;
    rt.block_on(async {
        let options = ClientOptions {
            server: resolve(&commandline.host, commandline.port).await?,
            relay: resolve(
                &commandline.host,
                commandline.private_port.unwrap_or(commandline.port),
            )
            .await?,
            login: commandline.login.clone(),
            shared_dir: commandline.directory.clone(),
        };

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let printer = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                println!("{}", event);
            }
        });

        let (notify_shutdown, _) = broadcast::channel(1);
        let shutdown = Shutdown::new(notify_shutdown.subscribe());
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("ctrl-c received, shutting down");
                let _ = notify_shutdown.send(());
            }
        });

        let (reactor, lines) = client::connect(options, &config, events_tx, shutdown).await?;
        // the console thread ends with stdin, or on its next line once the reactor is gone
        spawn_console(lines)?;
        // dropping the session logic closes the event channel and ends the printer
        let result = reactor.run().await.map(drop);
        let _ = printer.await;
        if let Err(err) = &result {
            error!("client stopped with error: {}", err);
        }
        result
    })
}
