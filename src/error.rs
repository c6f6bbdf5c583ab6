use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("syntax error: {message} (line {line}, column {column})")]
    Syntax {
        message: String,
        line: u32,
        column: u32,
    },
    #[error("runtime error: {message}")]
    Runtime { message: String },
    #[error("security error: {message}")]
    Security { message: String },
    #[error("timeout: execution exceeded {limit_ms}ms")]
    Timeout { limit_ms: u64 },
    #[error("quota exceeded: {message}")]
    QuotaExceeded { message: String },
}

impl Error {
    /// Stable kind name, used by hosts mapping failures to wire-level codes.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "IoError",
            Error::Syntax { .. } => "SyntaxError",
            Error::Runtime { .. } => "RuntimeError",
            Error::Security { .. } => "SecurityError",
            Error::Timeout { .. } => "TimeoutError",
            Error::QuotaExceeded { .. } => "QuotaExceededError",
        }
    }

    pub fn position(&self) -> Option<(u32, u32)> {
        match self {
            Error::Syntax { line, column, .. } => Some((*line, *column)),
            _ => None,
        }
    }
}

pub fn syntax_error<T>(message: impl Into<String>, line: u32, column: u32) -> Result<T> {
    Err(Error::Syntax {
        message: message.into(),
        line,
        column,
    })
}

pub fn runtime_error<T>(message: impl Into<String>) -> Result<T> {
    Err(Error::Runtime {
        message: message.into(),
    })
}

pub fn security_error<T>(message: impl Into<String>) -> Result<T> {
    Err(Error::Security {
        message: message.into(),
    })
}

pub type Result<T> = std::result::Result<T, Error>;
