//! Unified error handling for Astrohost.
//!
//! Every fallible operation of the compiler, the module loader, the thread
//! manager and the interpreter bridge returns this error type. The variants
//! follow the failure classes of the host: bad input, configuration, external
//! toolchain, dynamic loading, symbol resolution and name registry conflicts.

use std::fmt;

/// Compilation stage that produced a toolchain failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileStage {
    /// Syntax-only check of the source.
    Syntax,
    /// Build of the shared artifact.
    Build,
}

impl fmt::Display for CompileStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileStage::Syntax => write!(f, "syntax check"),
            CompileStage::Build => write!(f, "build"),
        }
    }
}

/// Unified error type for Astrohost.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Empty or otherwise invalid input.
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// Missing or malformed configuration document.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Output directory could not be created.
    #[error("Directory error: {0}")]
    Directory(String),

    /// External toolchain exited with a nonzero status.
    #[error("Toolchain {stage} failed (status {status}): {diagnostics}")]
    Toolchain {
        stage: CompileStage,
        status: i32,
        diagnostics: String,
    },

    /// Dynamic artifact could not be opened.
    #[error("Load error: {0}")]
    Load(String),

    /// Entry point could not be resolved inside a module.
    #[error("Symbol '{symbol}' not found in module '{module}': {cause}")]
    Symbol {
        module: String,
        symbol: String,
        cause: String,
    },

    /// Name already registered for a module or a running thread.
    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    /// Operation referenced an unknown name.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Call site type hint disagrees with the entry point's declared signature.
    #[error("Signature mismatch for '{function}': expected {expected}, found {found}")]
    SignatureMismatch {
        function: String,
        expected: String,
        found: String,
    },

    /// Maximum number of running threads reached.
    #[error("Thread capacity exceeded (limit {limit})")]
    CapacityExceeded { limit: usize },

    /// Script evaluation or call failed inside the interpreter.
    #[error("Script error: {0}")]
    Script(String),

    /// Result or request channel closed before a reply arrived.
    #[error("Channel disconnected: {0}")]
    Disconnected(String),

    /// Generic internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, Error>;

/// Convenience macros for creating errors.
#[macro_export]
macro_rules! argument_err {
    ($msg:expr) => {
        $crate::error::Error::Argument($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Argument(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! config_err {
    ($msg:expr) => {
        $crate::error::Error::Config($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! load_err {
    ($msg:expr) => {
        $crate::error::Error::Load($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Load(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! not_found_err {
    ($msg:expr) => {
        $crate::error::Error::NotFound($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::NotFound(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! script_err {
    ($msg:expr) => {
        $crate::error::Error::Script($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Script(format!($fmt, $($arg)*))
    };
}

// Error conversion helpers
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(format!("serialization: {}", e))
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

// Convenience constructors for common errors
impl Error {
    pub fn argument(msg: impl Into<String>) -> Self {
        Self::Argument(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn duplicate(name: impl Into<String>) -> Self {
        Self::DuplicateName(name.into())
    }

    pub fn symbol(
        module: impl Into<String>,
        symbol: impl Into<String>,
        cause: impl Into<String>,
    ) -> Self {
        Self::Symbol {
            module: module.into(),
            symbol: symbol.into(),
            cause: cause.into(),
        }
    }

    pub fn signature(
        function: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::SignatureMismatch {
            function: function.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::Disconnected(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
