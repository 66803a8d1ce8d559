// 错误类型与错误码映射
use thiserror::Error;

/// Status codes reported by the transport engine (libssh2 numbering).
pub mod codes {
    pub const SOCKET_NONE: i32 = -1;
    pub const BANNER_RECV: i32 = -2;
    pub const BANNER_SEND: i32 = -3;
    pub const INVALID_MAC: i32 = -4;
    pub const KEX_FAILURE: i32 = -5;
    pub const ALLOC: i32 = -6;
    pub const SOCKET_SEND: i32 = -7;
    pub const KEY_EXCHANGE_FAILURE: i32 = -8;
    pub const TIMEOUT: i32 = -9;
    pub const DECRYPT: i32 = -12;
    pub const SOCKET_DISCONNECT: i32 = -13;
    pub const PROTO: i32 = -14;
    pub const PASSWORD_EXPIRED: i32 = -15;
    pub const FILE: i32 = -16;
    pub const METHOD_NONE: i32 = -17;
    pub const AUTHENTICATION_FAILED: i32 = -18;
    pub const PUBLICKEY_UNVERIFIED: i32 = -19;
    pub const CHANNEL_FAILURE: i32 = -21;
    pub const CHANNEL_REQUEST_DENIED: i32 = -22;
    pub const CHANNEL_UNKNOWN: i32 = -23;
    pub const CHANNEL_CLOSED: i32 = -26;
    pub const SOCKET_TIMEOUT: i32 = -30;
    pub const REQUEST_DENIED: i32 = -32;
    pub const METHOD_NOT_SUPPORTED: i32 = -33;
    pub const INVAL: i32 = -34;
    pub const EAGAIN: i32 = -37;
    pub const BAD_USE: i32 = -39;
    pub const SOCKET_RECV: i32 = -43;
    pub const ENCRYPT: i32 = -44;
    pub const BAD_SOCKET: i32 = -45;
    pub const KNOWN_HOSTS: i32 = -46;
    pub const KEYFILE_AUTH_FAILED: i32 = -48;
    pub const ALGO_UNSUPPORTED: i32 = -51;
}

/// Lifecycle violations detected before the transport is ever called.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("handshake has already been performed on this session")]
    AlreadyHandshaken,

    #[error("session is not connected")]
    NotConnected,

    #[error("session is already authenticated")]
    AlreadyAuthenticated,

    #[error("{0} must be configured before the handshake")]
    AfterHandshake(&'static str),

    #[error("handle is no longer valid: the session was disconnected")]
    Invalidated,

    #[error("channel is closed")]
    ChannelClosed,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to allocate SSH transport context")]
    InitFailure,

    #[error("SSH protocol error (code {code}){}", detail(.message))]
    Protocol { code: i32, message: Option<String> },

    #[error("authentication failed (code {code}){}", detail(.message))]
    Auth { code: i32, message: Option<String> },

    #[error("I/O error (code {code}){}", detail(.message))]
    Io { code: i32, message: Option<String> },

    #[error("invalid session state: {0}")]
    State(#[from] StateError),

    #[error("failed to connect: {0}")]
    Connect(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

fn detail(message: &Option<String>) -> String {
    match message {
        Some(message) if !message.is_empty() => format!(": {}", message),
        _ => String::new(),
    }
}

/// Which operation produced a status code. Handshake and login failures
/// have a fixed error kind regardless of the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorContext {
    General,
    Handshake,
    Auth,
}

impl Error {
    /// Native status code carried by the error, if any.
    pub fn code(&self) -> Option<i32> {
        match self {
            Error::Protocol { code, .. } | Error::Auth { code, .. } | Error::Io { code, .. } => {
                Some(*code)
            }
            _ => None,
        }
    }

    /// True when a non-blocking call could not make progress.
    pub fn is_would_block(&self) -> bool {
        matches!(self, Error::Io { code, .. } if *code == codes::EAGAIN)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Io { code, .. } if *code == codes::TIMEOUT || *code == codes::SOCKET_TIMEOUT
        )
    }

    fn from_code(code: i32, message: Option<String>, context: ErrorContext) -> Self {
        match context {
            ErrorContext::Handshake => Error::Protocol { code, message },
            ErrorContext::Auth => Error::Auth { code, message },
            ErrorContext::General => match classify(code) {
                ErrorKind::Io => Error::Io { code, message },
                ErrorKind::Auth => Error::Auth { code, message },
                ErrorKind::Protocol => Error::Protocol { code, message },
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorKind {
    Io,
    Auth,
    Protocol,
}

fn classify(code: i32) -> ErrorKind {
    match code {
        codes::SOCKET_NONE
        | codes::SOCKET_SEND
        | codes::TIMEOUT
        | codes::SOCKET_DISCONNECT
        | codes::SOCKET_TIMEOUT
        | codes::EAGAIN
        | codes::SOCKET_RECV
        | codes::BAD_SOCKET => ErrorKind::Io,
        codes::PASSWORD_EXPIRED
        | codes::FILE
        | codes::AUTHENTICATION_FAILED
        | codes::PUBLICKEY_UNVERIFIED
        | codes::KEYFILE_AUTH_FAILED => ErrorKind::Auth,
        _ => ErrorKind::Protocol,
    }
}

/// Translates a transport status code into a typed error.
///
/// Non-negative codes are success and produce nothing.
pub fn check_error(code: i32, message: Option<String>, context: ErrorContext) -> Result<()> {
    if code >= 0 {
        return Ok(());
    }
    Err(Error::from_code(code, message, context))
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        let kind = if err.is_would_block() {
            std::io::ErrorKind::WouldBlock
        } else if err.is_timeout() {
            std::io::ErrorKind::TimedOut
        } else {
            std::io::ErrorKind::Other
        };
        std::io::Error::new(kind, err)
    }
}
