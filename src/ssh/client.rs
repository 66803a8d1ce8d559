// SSH客户端封装
use super::channel::Channel;
use super::session::Session;
use super::transport::{CheckResult, DisconnectReason, Transport};
use crate::config::{AuthMethod, Config};
use crate::utils::error::{Error, Result as SshResult};
use anyhow::{bail, Context, Result};
use log::{info, warn};
use std::net::TcpStream;
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Output from a remote command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

pub struct SshClient {
    pub session: Session,
}

impl SshClient {
    /// Connects and negotiates the transport without authenticating.
    pub fn handshake(config: &Config) -> Result<Self> {
        let tcp = TcpStream::connect((config.host.as_str(), config.port))
            .context("Failed to connect to SSH server")?;

        let session = Session::new().context("Failed to create SSH session")?;
        config
            .options
            .apply(&session)
            .context("Failed to configure SSH session")?;
        session.handshake(tcp).context("SSH handshake failed")?;

        Ok(SshClient { session })
    }

    /// Connects, verifies the host key and authenticates.
    pub fn connect(config: &Config) -> Result<Self> {
        let client = Self::handshake(config)?;
        let session = &client.session;

        if let Some(path) = &config.known_hosts {
            verify_host_key(session, &config.host, config.port, path, config.strict_host_key)?;
        }

        match &config.auth {
            AuthMethod::Password(password) => {
                session
                    .login(&config.username, password)
                    .context("Password authentication failed")?;
            }
            AuthMethod::PublicKey {
                private_key,
                public_key,
                passphrase,
            } => {
                session
                    .login_with_pubkey(
                        &config.username,
                        private_key,
                        public_key.as_deref(),
                        passphrase.as_deref(),
                    )
                    .context("Public key authentication failed")?;
            }
            AuthMethod::Agent => {
                session
                    .login_with_agent(&config.username)
                    .context("SSH agent authentication failed")?;
            }
            AuthMethod::None => {
                let methods = session
                    .login_with_noauth(&config.username)
                    .context("\"none\" authentication request failed")?;
                // 服务器可能直接接受 none, 只能通过认证状态判断
                if !session.is_authenticated() {
                    bail!(
                        "server requires authentication (accepted methods: {})",
                        methods.as_deref().unwrap_or("unknown")
                    );
                }
            }
        }

        if !session.is_authenticated() {
            return Err(Error::Auth {
                code: 0,
                message: Some("server did not confirm authentication".to_string()),
            }
            .into());
        }

        Ok(client)
    }

    pub fn exec(&self, command: &str) -> Result<CommandOutput> {
        exec(&self.session, command).with_context(|| format!("Failed to execute '{}'", command))
    }

    pub fn disconnect(&self) -> Result<()> {
        self.session
            .disconnect(DisconnectReason::ByApplication, "client exit")
            .context("Failed to disconnect")
    }
}

/// Runs `command` on a fresh session channel and collects its output.
/// The channel is closed whether or not the command succeeds, and the
/// session's blocking mode is restored afterwards.
pub fn exec<T: Transport>(session: &Session<T>, command: &str) -> SshResult<CommandOutput> {
    let was_blocking = session.is_blocking();
    session.set_blocking(true);
    let result = session.with_session(|channel| {
        let output = run_command(session, channel, command);
        // 关闭通道需要阻塞模式
        session.set_blocking(true);
        output
    });
    session.set_blocking(was_blocking);
    result
}

fn run_command<T: Transport>(
    session: &Session<T>,
    channel: &mut Channel<'_, T>,
    command: &str,
) -> SshResult<CommandOutput> {
    channel.exec(command)?;

    // 两个流必须交替读取, 否则一侧写满窗口后远端会停住
    session.set_blocking(false);
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    drain_streams(channel, &mut stdout, &mut stderr)?;
    session.set_blocking(true);

    channel.wait_close()?;
    let exit_code = channel.exit_status()?;

    Ok(CommandOutput {
        exit_code,
        stdout: String::from_utf8_lossy(&stdout).to_string(),
        stderr: String::from_utf8_lossy(&stderr).to_string(),
    })
}

/// Reads stdout and stderr alternately until both reach end of file.
/// Expects a non-blocking session.
fn drain_streams<T: Transport>(
    channel: &mut Channel<'_, T>,
    stdout: &mut Vec<u8>,
    stderr: &mut Vec<u8>,
) -> SshResult<()> {
    let mut buf = [0u8; 8192];
    let mut stdout_open = true;
    let mut stderr_open = true;

    while stdout_open || stderr_open {
        let mut progressed = false;
        if stdout_open {
            match channel.read(&mut buf)? {
                Some(0) => stdout_open = false,
                Some(n) => {
                    stdout.extend_from_slice(&buf[..n]);
                    progressed = true;
                }
                None => {}
            }
        }
        if stderr_open {
            match channel.read_stderr(&mut buf)? {
                Some(0) => stderr_open = false,
                Some(n) => {
                    stderr.extend_from_slice(&buf[..n]);
                    progressed = true;
                }
                None => {}
            }
        }
        if !progressed && (stdout_open || stderr_open) {
            thread::sleep(Duration::from_millis(10));
        }
    }
    Ok(())
}

fn known_hosts_name(host: &str, port: u16) -> String {
    if port == 22 {
        host.to_string()
    } else {
        format!("[{}]:{}", host, port)
    }
}

/// Checks the server's host key against a known_hosts file.
///
/// Unknown hosts are rejected when `strict` is set; otherwise the key is
/// learned and the file rewritten (trust on first use).
pub fn verify_host_key<T: Transport>(
    session: &Session<T>,
    host: &str,
    port: u16,
    path: &Path,
    strict: bool,
) -> Result<()> {
    let mut known_hosts = session.known_hosts()?;
    if path.exists() {
        known_hosts
            .read_file(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
    }

    match known_hosts.check_session_host(host, port)? {
        CheckResult::Match => Ok(()),
        CheckResult::Mismatch => bail!(
            "host key for {}:{} does not match the entry in {}",
            host,
            port,
            path.display()
        ),
        CheckResult::NotFound if strict => bail!(
            "host {}:{} is not listed in {}",
            host,
            port,
            path.display()
        ),
        CheckResult::NotFound => {
            let host_key = session
                .hostkey()
                .context("server did not present a host key")?;
            warn!(
                "Trust-On-First-Use: accepting unknown host key for {}:{}",
                host, port
            );
            known_hosts.add_host_key(&known_hosts_name(host, port), &host_key, "added by ssh-session")?;
            if let Err(e) = known_hosts.write_file(path) {
                warn!("Failed to save host key to {}: {}", path.display(), e);
            } else {
                info!("Saved host key for {}:{} to {}", host, port, path.display());
            }
            Ok(())
        }
        CheckResult::Failure => bail!("failed to check host key for {}:{}", host, port),
    }
}
