use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

use crate::config::{DEFAULT_HOST, DEFAULT_PORT, DEFAULT_PREFIX, RelayOptions};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a relay node that shares its rooms with every node on the same Redis.
    Node(NodeArgs),
    /// Connect to a node and chat in a room.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct NodeArgs {
    /// Socket address the node should bind to. Use 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub listen: SocketAddr,

    /// Redis host used for the relay.
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Redis port used for the relay.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Redis password, if the server requires one.
    #[arg(long)]
    pub password: Option<String>,

    /// Channel prefix shared by every node in the cluster.
    #[arg(long, default_value = DEFAULT_PREFIX)]
    pub prefix: String,

    /// Relay over an in-process bus instead of Redis. Rooms are then local to
    /// this node.
    #[arg(long)]
    pub standalone: bool,
}

impl NodeArgs {
    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            host: self.host.clone(),
            port: self.port,
            password: self.password.clone(),
            prefix: self.prefix.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of the node to connect to.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub server: SocketAddr,

    /// Room joined on connect; plain lines are sent here.
    #[arg(long, default_value = "lobby")]
    pub room: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_defaults_match_relay_defaults() {
        let cli = Cli::parse_from(["room_relay", "node"]);
        let Command::Node(args) = cli.command else {
            panic!("expected node command");
        };
        assert_eq!(args.relay_options(), RelayOptions::default());
        assert!(!args.standalone);
    }

    #[test]
    fn node_accepts_redis_options() {
        let cli = Cli::parse_from([
            "room_relay",
            "node",
            "--host",
            "redis.internal",
            "--port",
            "6380",
            "--password",
            "secret",
            "--prefix",
            "chat",
        ]);
        let Command::Node(args) = cli.command else {
            panic!("expected node command");
        };
        let options = args.relay_options();
        assert_eq!(options.host, "redis.internal");
        assert_eq!(options.port, 6380);
        assert_eq!(options.password.as_deref(), Some("secret"));
        assert_eq!(options.prefix, "chat");
    }
}
