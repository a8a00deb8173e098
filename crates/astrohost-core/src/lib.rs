//! Core of the astrohost runtime extensibility engine.
//!
//! A long-running host uses this crate to compile C++ snippets on demand,
//! load native artifacts and JavaScript modules without restarting, and run
//! their entry points on named worker threads.
//!
//! ```text
//! Compiler::compile ──► ModuleLoader::load_module ──► ModuleLoader::invoke
//!                                                          │
//!                                   ThreadManager::add_thread(name, unit of work)
//! ```

pub mod abi;
pub mod compiler;
pub mod config;
pub mod discovery;
pub mod error;
pub mod interpreter;
pub mod loader;
pub mod process;
pub mod runtime;
pub mod thread;

pub use abi::{AbiArgs, AbiType, Signature, ValueType};
pub use compiler::Compiler;
pub use config::{CompileOptions, RuntimeConfig};
pub use discovery::{discover_modules, DiscoveredModule};
pub use error::{CompileStage, Error, Result};
pub use interpreter::InterpreterBridge;
pub use loader::{InvocationHandle, ModuleHandle, ModuleInfo, ModuleKind, ModuleLoader};
pub use runtime::Runtime;
pub use thread::{ThreadInfo, ThreadManager, ThreadState};

/// Re-exports commonly used types.
pub mod prelude {
    // Configuration
    pub use crate::config::{
        defaults, env_vars, CompileOptions, CompilerConfig, LoaderConfig, RuntimeConfig,
        ThreadConfig,
    };

    // Error handling
    pub use crate::error::{Error, Result};

    // Components
    pub use crate::compiler::Compiler;
    pub use crate::interpreter::InterpreterBridge;
    pub use crate::loader::{InvocationHandle, ModuleKind, ModuleLoader};
    pub use crate::runtime::Runtime;
    pub use crate::thread::ThreadManager;

    // Typed invocation
    pub use crate::abi::{Signature, ValueType};
}
