// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines the subcommands and the runtime override flags of `connect`.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sshmux")]
#[command(about = "SSH sessions with port forwarding from OpenSSH-style host configuration")]
#[command(version)]
pub struct Cli {
    /// Application config file (default: ~/.sshmux.yml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List configured servers
    List,

    /// Connect to a server
    Connect(ConnectArgs),
}

#[derive(Args)]
pub struct ConnectArgs {
    /// Registry key or host name
    pub server: String,

    /// Hold the connection and forwards open without a shell
    #[arg(short = 'N', long)]
    pub not_execute: bool,

    /// Forward the local SSH agent
    #[arg(short = 'A', long)]
    pub forward_agent: bool,

    /// Local forward, [bind_address:]port:host:hostport
    #[arg(short = 'L', value_name = "SPEC")]
    pub local_forward: Vec<String>,

    /// Remote forward, [bind_address:]port:host:hostport
    #[arg(short = 'R', value_name = "SPEC")]
    pub remote_forward: Vec<String>,

    /// Local SOCKS5 proxy port
    #[arg(short = 'D', long, value_name = "PORT")]
    pub dynamic_forward: Option<String>,

    /// Remote SOCKS5 proxy port, dialing from this host
    #[arg(long, value_name = "PORT")]
    pub reverse_dynamic_forward: Option<String>,

    /// Local HTTP proxy port
    #[arg(long, value_name = "PORT")]
    pub http_dynamic_forward: Option<String>,

    /// Remote HTTP proxy port, dialing from this host
    #[arg(long, value_name = "PORT")]
    pub http_reverse_dynamic_forward: Option<String>,

    /// NFS forward port
    #[arg(long, value_name = "PORT")]
    pub nfs_forward_port: Option<String>,

    /// NFS forward remote path
    #[arg(long, value_name = "PATH")]
    pub nfs_forward_path: Option<String>,

    /// NFS reverse forward port
    #[arg(long, value_name = "PORT")]
    pub nfs_reverse_forward_port: Option<String>,

    /// NFS reverse forward local path
    #[arg(long, value_name = "PATH")]
    pub nfs_reverse_forward_path: Option<String>,

    /// Start the shell with the local rc file
    #[arg(long)]
    pub local_rc: bool,

    /// Start the shell without the local rc file
    #[arg(long, conflicts_with = "local_rc")]
    pub no_local_rc: bool,
}
