//! Error types for source readers

use std::path::PathBuf;

use thiserror::Error;

/// Error type for source readers
#[derive(Error, Debug)]
pub enum Error {
    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] rowflow_core::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The dataset location does not exist
    #[error("Dataset location not found: {0}")]
    NotFound(PathBuf),

    /// File content does not follow the expected layout
    #[error("Format error in {path}: {reason}")]
    Format {
        /// Offending file
        path: PathBuf,
        /// What was wrong
        reason: String,
    },

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    pub(crate) fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<Error> for rowflow_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Core(e) => e,
            Error::Io(e) => rowflow_core::Error::Io(e),
            Error::NotFound(path) => rowflow_core::Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("dataset location not found: {}", path.display()),
            )),
            Error::Format { path, reason } => rowflow_core::Error::malformed(path.display().to_string(), reason),
            Error::InvalidArgument(msg) => rowflow_core::Error::InvalidArgument(msg),
        }
    }
}

/// Result type for source readers
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use rowflow_core::ErrorKind;

    #[test]
    fn converts_into_core_tiers() {
        let io: rowflow_core::Error = Error::NotFound(PathBuf::from("/nope")).into();
        assert_eq!(io.kind(), ErrorKind::Io);

        let malformed: rowflow_core::Error = Error::format("a.bin", "short record").into();
        assert_eq!(malformed.kind(), ErrorKind::Io);
        assert!(malformed.to_string().contains("short record"));

        let arg: rowflow_core::Error = Error::InvalidArgument("usage".into()).into();
        assert_eq!(arg.kind(), ErrorKind::Config);
    }
}
