use anyhow::Result;
use clap::Parser;
use ssh_session::{cli::Cli, config::Config, run};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if cli.verbose {
        eprintln!("ssh-session v{}", env!("CARGO_PKG_VERSION"));
        eprintln!("Target: {}@{}:{}", cli.username, cli.host, cli.port);
    }

    let config = Config::from_cli(&cli)?;

    match run(config) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("\n❌ {:#}\n", e);
            std::process::exit(1);
        }
    }
}
