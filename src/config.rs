// 配置管理
use crate::cli::{Cli, Commands};
use crate::ssh::{MethodType, SessionOptions};
use anyhow::{Context, Result};
use dialoguer::{Confirm, Password};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: AuthMethod,
    pub options: SessionOptions,
    /// known_hosts file to verify against; `None` skips verification.
    pub known_hosts: Option<PathBuf>,
    pub strict_host_key: bool,
    pub verbose: bool,
    pub operation: Operation,
}

#[derive(Debug, Clone)]
pub enum AuthMethod {
    Password(String),
    PublicKey {
        private_key: PathBuf,
        public_key: Option<PathBuf>,
        passphrase: Option<String>,
    },
    Agent,
    None,
}

#[derive(Debug, Clone)]
pub enum Operation {
    Exec { command: String },
    Fingerprint,
    Methods,
    Algs { method: MethodType },
    Forward { bind: String, port: u16 },
}

impl Operation {
    /// Whether the operation needs an authenticated session.
    pub fn needs_login(&self) -> bool {
        matches!(self, Operation::Exec { .. } | Operation::Forward { .. })
    }
}

const DEFAULT_KEYS: [&str; 3] = ["id_ed25519", "id_rsa", "id_ecdsa"];

impl Config {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let operation = match &cli.command {
            Commands::Exec { command } => Operation::Exec {
                command: command.join(" "),
            },
            Commands::Fingerprint => Operation::Fingerprint,
            Commands::Methods => Operation::Methods,
            Commands::Algs { method } => Operation::Algs { method: *method },
            Commands::Forward { port, bind } => Operation::Forward {
                bind: bind.clone(),
                port: *port,
            },
        };

        // 只有需要登录的操作才询问凭据
        let auth = if operation.needs_login() {
            Self::determine_auth_method(cli)?
        } else {
            AuthMethod::None
        };

        let known_hosts = if cli.no_host_check {
            None
        } else {
            match &cli.known_hosts {
                Some(path) => Some(path.clone()),
                None => home::home_dir().map(|home| home.join(".ssh").join("known_hosts")),
            }
        };

        Ok(Config {
            host: cli.host.clone(),
            port: cli.port,
            username: cli.username.clone(),
            auth,
            options: Self::session_options(cli),
            known_hosts,
            strict_host_key: cli.strict_host_key,
            verbose: cli.verbose,
            operation,
        })
    }

    fn session_options(cli: &Cli) -> SessionOptions {
        let mut options = SessionOptions::default().compression(cli.compress);
        if cli.timeout > 0 {
            options = options.timeout(Duration::from_secs(cli.timeout));
        }
        if let Some(banner) = &cli.banner {
            options = options.banner(banner.clone());
        }
        if cli.keepalive > 0 {
            options = options.keepalive(false, cli.keepalive);
        }
        if let Some(kex) = &cli.kex {
            options = options.method_pref(MethodType::Kex, kex.clone());
        }
        if let Some(algs) = &cli.hostkey_algs {
            options = options.method_pref(MethodType::HostKey, algs.clone());
        }
        if let Some(ciphers) = &cli.ciphers {
            options = options
                .method_pref(MethodType::CryptCs, ciphers.clone())
                .method_pref(MethodType::CryptSc, ciphers.clone());
        }
        if let Some(macs) = &cli.macs {
            options = options
                .method_pref(MethodType::MacCs, macs.clone())
                .method_pref(MethodType::MacSc, macs.clone());
        }
        options
    }

    fn determine_auth_method(cli: &Cli) -> Result<AuthMethod> {
        // 如果命令行提供了密码，直接使用
        if let Some(password) = &cli.password {
            return Ok(AuthMethod::Password(password.clone()));
        }

        // 如果指定了使用 SSH Agent
        if cli.use_agent {
            return Ok(AuthMethod::Agent);
        }

        if cli.no_auth {
            return Ok(AuthMethod::None);
        }

        // 如果提供了密钥文件路径
        if let Some(key_file) = &cli.key_file {
            return Ok(AuthMethod::PublicKey {
                private_key: key_file.clone(),
                public_key: cli.public_key.clone(),
                passphrase: cli.passphrase.clone(),
            });
        }

        // 尝试查找默认的SSH密钥
        let home = home::home_dir().context("Cannot determine home directory")?;
        for key_path in find_default_keys(&home.join(".ssh")) {
            println!("Found SSH key: {}", key_path.display());
            let use_key = Confirm::new()
                .with_prompt(format!("Use SSH key {} for authentication?", key_path.display()))
                .default(true)
                .interact()?;

            if use_key {
                return Ok(AuthMethod::PublicKey {
                    private_key: key_path,
                    public_key: None,
                    passphrase: cli.passphrase.clone(),
                });
            }
        }

        // 如果没有找到密钥或用户不想使用密钥，提示输入密码
        println!("No SSH key found or selected.");
        let password = Password::new()
            .with_prompt(format!("Enter password for {}@{}", cli.username, cli.host))
            .interact()?;

        Ok(AuthMethod::Password(password))
    }
}

/// Default private keys present in `ssh_dir`, in preference order.
pub fn find_default_keys(ssh_dir: &Path) -> Vec<PathBuf> {
    DEFAULT_KEYS
        .iter()
        .map(|name| ssh_dir.join(name))
        .filter(|path| path.is_file())
        .collect()
}
