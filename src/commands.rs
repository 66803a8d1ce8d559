// 子命令实现
use crate::config::{Config, Operation};
use crate::ssh::{HashType, Session, SshClient};
use anyhow::{Context, Result};
use std::io::{self, Write};

/// Runs the configured operation and returns the process exit code.
pub fn run(config: &Config) -> Result<i32> {
    match &config.operation {
        Operation::Exec { command } => exec(config, command),
        Operation::Fingerprint => fingerprint(config),
        Operation::Methods => methods(config),
        Operation::Algs { method } => {
            let session = Session::new().context("Failed to create SSH session")?;
            for alg in session.supported_algs(*method)? {
                println!("{}", alg);
            }
            Ok(0)
        }
        Operation::Forward { bind, port } => forward(config, bind, *port),
    }
}

fn exec(config: &Config, command: &str) -> Result<i32> {
    let client = SshClient::connect(config)?;
    let output = client.exec(command)?;

    print!("{}", output.stdout);
    eprint!("{}", output.stderr);
    io::stdout().flush()?;

    client.disconnect()?;
    Ok(output.exit_code)
}

fn fingerprint(config: &Config) -> Result<i32> {
    let client = SshClient::handshake(config)?;
    let session = &client.session;

    let host_key = session
        .hostkey()
        .context("Server did not present a host key")?;
    if let Some(banner) = session.banner() {
        println!("Banner:   {}", banner);
    }
    println!("Key type: {}", host_key.key_type.name());
    println!("MD5:      {}", session.hashkey(HashType::Md5));
    println!("SHA1:     {}", session.hashkey(HashType::Sha1));
    println!("SHA256:   {}", session.hashkey(HashType::Sha256));

    if let Some(path) = &config.known_hosts {
        let mut known_hosts = session.known_hosts()?;
        if path.exists() {
            known_hosts.read_file(path)?;
        }
        let result = known_hosts.check_session_host(&config.host, config.port)?;
        println!("known_hosts ({}): {:?}", path.display(), result);
    }

    client.disconnect()?;
    Ok(0)
}

fn methods(config: &Config) -> Result<i32> {
    let client = SshClient::handshake(config)?;
    let session = &client.session;

    match session.login_with_noauth(&config.username)? {
        Some(methods) => println!("{}", methods),
        None if session.is_authenticated() => println!("Server accepted \"none\" authentication"),
        None => println!("Server listed no authentication methods"),
    }

    client.disconnect()?;
    Ok(0)
}

fn forward(config: &Config, bind: &str, port: u16) -> Result<i32> {
    let client = SshClient::connect(config)?;
    {
        let mut listener = client.session.forward_listen(bind, port)?;
        println!("Remote port {} forwarded, waiting for a connection...", listener.bound_port());

        let mut channel = listener.accept().context("Failed to accept forwarded connection")?;
        let copied = io::copy(&mut channel, &mut io::stdout())?;
        channel.close()?;
        println!("\nConnection closed after {} bytes", copied);
    }
    client.disconnect()?;
    Ok(0)
}
