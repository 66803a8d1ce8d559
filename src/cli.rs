// 命令行参数解析
use crate::ssh::MethodType;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ssh-session")]
#[command(about = "Open an SSH session and inspect or drive it")]
#[command(version)]
pub struct Cli {
    /// SSH server hostname or IP address
    #[arg(short = 'H', long)]
    pub host: String,

    /// SSH server port
    #[arg(short, long, default_value = "22")]
    pub port: u16,

    /// SSH username
    #[arg(short, long)]
    pub username: String,

    /// SSH password (if not provided, will prompt for input)
    #[arg(short = 'P', long)]
    pub password: Option<String>,

    /// SSH private key file path
    #[arg(short, long)]
    pub key_file: Option<PathBuf>,

    /// Use SSH agent for authentication
    #[arg(long)]
    pub use_agent: bool,

    /// Public key matching --key-file (derived from the private key if omitted)
    #[arg(long)]
    pub public_key: Option<PathBuf>,

    /// Passphrase for an encrypted private key
    #[arg(long)]
    pub passphrase: Option<String>,

    /// Try "none" authentication instead of a password or key
    #[arg(long)]
    pub no_auth: bool,

    /// known_hosts file to verify the server against (default: ~/.ssh/known_hosts)
    #[arg(long)]
    pub known_hosts: Option<PathBuf>,

    /// Skip host key verification
    #[arg(long)]
    pub no_host_check: bool,

    /// Reject hosts missing from known_hosts instead of learning them
    #[arg(long)]
    pub strict_host_key: bool,

    /// Timeout for blocking operations in seconds (0 waits forever)
    #[arg(short, long, default_value = "30")]
    pub timeout: u64,

    /// Enable transport compression
    #[arg(long)]
    pub compress: bool,

    /// Custom identification banner
    #[arg(long)]
    pub banner: Option<String>,

    /// Keepalive interval in seconds (0 disables)
    #[arg(long, default_value = "0")]
    pub keepalive: u32,

    /// Key exchange preference list
    #[arg(long)]
    pub kex: Option<String>,

    /// Host key algorithm preference list
    #[arg(long)]
    pub hostkey_algs: Option<String>,

    /// Cipher preference list (both directions)
    #[arg(long)]
    pub ciphers: Option<String>,

    /// MAC preference list (both directions)
    #[arg(long)]
    pub macs: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
#[derive(Debug)]
pub enum Commands {
    /// Run a command on the remote host
    Exec {
        /// Command and arguments
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Print the server's host key fingerprints
    Fingerprint,
    /// List the authentication methods the server accepts
    Methods,
    /// List algorithms supported locally for a method type
    Algs {
        /// kex, hostkey, crypt-cs, crypt-sc, mac-cs, mac-sc, comp-cs, comp-sc, lang-cs, lang-sc
        method: MethodType,
    },
    /// Ask the server to forward a remote port and print the first connection
    Forward {
        /// Remote port to listen on (0 lets the server choose)
        #[arg(default_value = "0")]
        port: u16,
        /// Remote address to bind (empty means all interfaces)
        #[arg(long, default_value = "")]
        bind: String,
    },
}
