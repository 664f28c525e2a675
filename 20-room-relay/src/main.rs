use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use room_relay::{
    adaptor::{self, Adaptor},
    cli::{Cli, Command, NodeArgs},
    client,
    node::Node,
    transport::memory::MemoryBus,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

async fn start_adaptor(args: &NodeArgs) -> Result<Adaptor> {
    if args.standalone {
        let bus = MemoryBus::new();
        let uid = adaptor::generate_uid();
        return Adaptor::start(&args.prefix, uid, bus.publisher(), bus.subscriber()).await;
    }
    Adaptor::connect(args.relay_options()).await
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Node(args) => {
            let adaptor = start_adaptor(&args).await?;
            let listener = TcpListener::bind(args.listen).await?;
            let node = Node::new(listener, Arc::new(adaptor));
            let addr = node.local_addr()?;
            info!("node listening on {}", addr);
            if let Err(err) = node.run_until_ctrl_c().await {
                warn!("node exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}
