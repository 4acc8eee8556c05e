//! Error types for the vigil crate.

use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, VigilError>;

#[derive(Debug)]
pub enum VigilError {
    /// A configuration value failed validation.
    InvalidConfiguration(String),
    /// No process with the given pid exists.
    ProcessNotFound(u32),
    /// A pid file could not be read or parsed.
    PidFile(String),
    /// An underlying I/O operation failed.
    Io(io::Error),
}

impl fmt::Display for VigilError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VigilError::InvalidConfiguration(msg) => {
                write!(f, "invalid configuration: {}", msg)
            }
            VigilError::ProcessNotFound(pid) => {
                write!(f, "process with pid {} not found", pid)
            }
            VigilError::PidFile(msg) => write!(f, "pid file error: {}", msg),
            VigilError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for VigilError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VigilError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for VigilError {
    fn from(err: io::Error) -> Self {
        VigilError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = VigilError::InvalidConfiguration("command cannot be empty".to_string());
        assert!(err.to_string().contains("command cannot be empty"));

        let err = VigilError::ProcessNotFound(4242);
        assert!(err.to_string().contains("4242"));
    }

    #[test]
    fn io_errors_convert() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "no such file");
        let err: VigilError = io_err.into();
        assert!(matches!(err, VigilError::Io(_)));
    }
}
