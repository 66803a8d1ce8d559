// 库文件，导出模块
pub mod cli;
pub mod commands;
pub mod config;
pub mod ssh;
pub mod utils;

use anyhow::Result;
use config::Config;

pub use ssh::{Channel, KnownHosts, Listener, Session, SessionState, Transport};
pub use utils::error::{check_error, Error, ErrorContext, StateError};

/// Runs the configured operation, returning the exit code for the process.
pub fn run(config: Config) -> Result<i32> {
    commands::run(&config)
}
