use crate::guest::Exception;
use crate::typecheck::Diagnostic;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Compilation failed with {} diagnostic(s)", .0.len())]
    CompileDiagnostic(Vec<Diagnostic>),

    #[error("Discovery failure: {0}")]
    DiscoveryFailure(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Symbol '{name}' is exported by both {first} and {second}")]
    SymbolCollision {
        name: String,
        first: String,
        second: String,
    },

    #[error("Guest exception: {0}")]
    Guest(#[from] Exception),

    #[error("Trampoline has not been registered")]
    NotRegistered,

    #[error("Trampoline already registered for implementation {0}")]
    AlreadyRegistered(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Copyable classification of a [`BridgeError`], kept as the trampoline's
/// last error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    ModuleNotFound,
    CompileDiagnostic,
    DiscoveryFailure,
    NotImplemented,
    InvalidArgument,
    SymbolCollision,
    Guest,
    NotRegistered,
    AlreadyRegistered,
    Config,
    Io,
    Json,
    Toml,
    Panic,
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::ModuleNotFound(_) => ErrorKind::ModuleNotFound,
            BridgeError::CompileDiagnostic(_) => ErrorKind::CompileDiagnostic,
            BridgeError::DiscoveryFailure(_) => ErrorKind::DiscoveryFailure,
            BridgeError::NotImplemented(_) => ErrorKind::NotImplemented,
            BridgeError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            BridgeError::SymbolCollision { .. } => ErrorKind::SymbolCollision,
            BridgeError::Guest(_) => ErrorKind::Guest,
            BridgeError::NotRegistered => ErrorKind::NotRegistered,
            BridgeError::AlreadyRegistered(_) => ErrorKind::AlreadyRegistered,
            BridgeError::Config(_) => ErrorKind::Config,
            BridgeError::Io(_) => ErrorKind::Io,
            BridgeError::Json(_) => ErrorKind::Json,
            BridgeError::Toml(_) => ErrorKind::Toml,
        }
    }

    /// Diagnostics carried by the error, if any.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            BridgeError::CompileDiagnostic(diagnostics) => diagnostics,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            BridgeError::ModuleNotFound("x".into()).kind(),
            ErrorKind::ModuleNotFound
        );
        let err = BridgeError::CompileDiagnostic(vec![Diagnostic::global("a.ts", 1005, "';' expected.")]);
        assert_eq!(err.kind(), ErrorKind::CompileDiagnostic);
        assert_eq!(err.diagnostics().len(), 1);
        assert_eq!(err.to_string(), "Compilation failed with 1 diagnostic(s)");
    }

    #[test]
    fn test_guest_exception_converts() {
        let err: BridgeError = Exception::type_error("boom").into();
        assert_eq!(err.kind(), ErrorKind::Guest);
        assert_eq!(err.to_string(), "Guest exception: TypeError: boom");
    }
}
