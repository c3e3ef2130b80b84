// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::fmt;
use std::process::ExitCode;

/// Server error type with exit code mapping
///
/// A supervisor restarts the server on any non-zero exit, the codes only
/// tell operators why.
#[derive(Debug)]
pub enum ServerError {
    /// Invalid command-line arguments
    InvalidArgs(String),
    /// Vendor module or buffer mapper could not be loaded
    ModuleLoad(String),
    /// Adapter failed to start or enumerate cameras
    Adapter(String),
    /// Registration with the dispatcher failed
    Dispatcher(String),
    /// The dispatcher channel was lost after registration
    DispatcherLost,
    /// Anything else
    General(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::InvalidArgs(msg) => write!(f, "Invalid arguments: {}", msg),
            ServerError::ModuleLoad(msg) => write!(f, "Module load failed: {}", msg),
            ServerError::Adapter(msg) => write!(f, "Camera HAL adapter error: {}", msg),
            ServerError::Dispatcher(msg) => write!(f, "Dispatcher error: {}", msg),
            ServerError::DispatcherLost => write!(f, "Dispatcher connection lost"),
            ServerError::General(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for ServerError {}

impl ServerError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> ExitCode {
        match self {
            ServerError::InvalidArgs(_) => ExitCode::from(2),
            ServerError::ModuleLoad(_) => ExitCode::from(3),
            ServerError::Adapter(_) => ExitCode::from(4),
            ServerError::Dispatcher(_) => ExitCode::from(5),
            ServerError::DispatcherLost => ExitCode::from(6),
            ServerError::General(_) => ExitCode::from(1),
        }
    }
}

/// Map camhal::Error to ServerError
impl From<camhal::Error> for ServerError {
    fn from(err: camhal::Error) -> Self {
        use camhal::Error;

        match err {
            Error::LibraryNotLoaded(lib_err) => {
                ServerError::ModuleLoad(format!("Failed to load library: {}", lib_err))
            }
            Error::Io(io_err) => ServerError::General(format!("I/O error: {}", io_err)),
            other => ServerError::Adapter(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::Dispatcher(format!("Malformed message: {}", err))
    }
}

/// Helper function to convert result to exit code
pub fn result_to_exit_code<T>(result: Result<T, ServerError>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            e.exit_code()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            ServerError::InvalidArgs("test".into()).exit_code(),
            ExitCode::from(2)
        );
        assert_eq!(
            ServerError::ModuleLoad("test".into()).exit_code(),
            ExitCode::from(3)
        );
        assert_eq!(
            ServerError::Adapter("test".into()).exit_code(),
            ExitCode::from(4)
        );
        assert_eq!(
            ServerError::Dispatcher("test".into()).exit_code(),
            ExitCode::from(5)
        );
        assert_eq!(ServerError::DispatcherLost.exit_code(), ExitCode::from(6));
        assert_eq!(
            ServerError::General("test".into()).exit_code(),
            ExitCode::from(1)
        );
    }

    #[test]
    fn test_camhal_error_mapping() {
        let err = ServerError::from(camhal::Error::Busy);
        assert!(matches!(err, ServerError::Adapter(_)));

        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = ServerError::from(camhal::Error::Io(io));
        assert_eq!(format!("{}", err), "Error: I/O error: boom");
    }
}
