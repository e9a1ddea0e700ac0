use std::fmt;

use crate::validate::ValidationError;

#[derive(Debug)]
pub enum Error {
    Http(reqwest::Error),
    Auth(String),
    NotReady,
    MalformedSnapshot(String),
    Validation(ValidationError),
    Channel(String),
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Auth(msg) => write!(f, "authentication failed: {msg}"),
            Error::NotReady => write!(f, "no state received yet"),
            Error::MalformedSnapshot(msg) => write!(f, "malformed status snapshot: {msg}"),
            Error::Validation(e) => write!(f, "command rejected: {e}"),
            Error::Channel(msg) => write!(f, "channel error: {msg}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            Error::Validation(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Error::Validation(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
