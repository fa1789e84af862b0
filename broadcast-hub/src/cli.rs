use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

use crate::{
    connection::ConnectionConfig,
    hub::{HubConfig, OverflowPolicy},
    message::DEFAULT_MAX_LINE_BYTES,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the broadcast hub, accepting TCP connections.
    Serve(ServeArgs),
    /// Connect to a hub, relaying stdin lines to it and its lines to stdout.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address to bind. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub listen: SocketAddr,

    /// Lines each peer may have waiting before the overflow policy applies.
    #[arg(long, default_value_t = 256, value_parser = parse_positive)]
    pub queue_capacity: usize,

    /// What to do with a peer whose queue is full.
    #[arg(long, value_enum, default_value_t = OverflowPolicy::Drop)]
    pub overflow: OverflowPolicy,

    /// Longest accepted inbound line, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_LINE_BYTES, value_parser = parse_positive)]
    pub max_line_bytes: usize,

    /// Do not greet peers with their identifier when they join.
    #[arg(long)]
    pub no_greeting: bool,
}

impl ServeArgs {
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            greeting: !self.no_greeting,
            overflow: self.overflow,
            ..HubConfig::default()
        }
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            outbound_capacity: self.queue_capacity,
            max_line_bytes: self.max_line_bytes,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of the hub to connect to.
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub server: SocketAddr,
}

fn parse_positive(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(err) => Err(err.to_string()),
    }
}
