use std::fmt::{Debug, Display, Formatter};

use config::ConfigError;
use sqlparser::parser::ParserError;
use tokio::task::JoinError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// A bug or broken invariant inside the engine.
    Internal(String),
    /// Invalid query: syntax errors and semantic errors such as unknown
    /// or ambiguous columns.
    Parse(String),
    /// A construct the engine has no translation or evaluation path for.
    Unimplemented(String),
    /// A data error raised while executing, e.g. integer divide by zero.
    Value(String),
    /// The query was cancelled through its context.
    Cancelled,
}

impl Error {
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Error::Parse(msg.into())
    }

    pub fn unimplemented(msg: impl Into<String>) -> Self {
        Error::Unimplemented(msg.into())
    }

    pub fn value(msg: impl Into<String>) -> Self {
        Error::Value(msg.into())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Internal(s) => write!(f, "Internal error: {}", s),
            Error::Parse(s) => write!(f, "Invalid query: {}", s),
            Error::Unimplemented(s) => write!(f, "Not implemented: {}", s),
            Error::Value(s) => write!(f, "Value error: {}", s),
            Error::Cancelled => write!(f, "Query cancelled"),
        }
    }
}

impl std::error::Error for Error {}

#[macro_export]
macro_rules! internal_err {
    ($($arg:tt)*) => {
        $crate::error::Error::Internal(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! parse_err {
    ($($arg:tt)*) => {
        $crate::error::Error::Parse(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! unimplemented_err {
    ($($arg:tt)*) => {
        $crate::error::Error::Unimplemented(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! value_err {
    ($($arg:tt)*) => {
        $crate::error::Error::Value(format!($($arg)*))
    };
}

impl From<ParserError> for Error {
    fn from(err: ParserError) -> Self {
        Error::Parse(err.to_string())
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<JoinError> for Error {
    fn from(err: JoinError) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<std::fmt::Error> for Error {
    fn from(err: std::fmt::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error::Value(err.to_string())
    }
}
