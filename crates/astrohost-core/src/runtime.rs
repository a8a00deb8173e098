//! Application container wiring the compiler, loader, threads and script host.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::compiler::Compiler;
use crate::config::RuntimeConfig;
use crate::discovery::{discover_modules, DiscoveredModule};
use crate::error::Result;
use crate::interpreter::InterpreterBridge;
use crate::loader::ModuleLoader;
use crate::process::ProcessRunner;
use crate::thread::ThreadManager;

/// Owns every core component for the lifetime of the host process.
///
/// Construction starts the script host; [`shutdown`](Self::shutdown) waits
/// for all named threads and then stops it. Dropping the runtime does the
/// same.
pub struct Runtime {
    config: RuntimeConfig,
    threads: Arc<ThreadManager>,
    bridge: Arc<InterpreterBridge>,
    loader: ModuleLoader,
    compiler: Compiler,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let compiler = Compiler::new(config.compiler.clone());
        Self::with_compiler(config, compiler)
    }

    /// Runtime whose compiler runs toolchain stages through `runner`.
    pub fn with_runner(config: RuntimeConfig, runner: Arc<dyn ProcessRunner>) -> Result<Self> {
        let compiler = Compiler::with_runner(config.compiler.clone(), runner);
        Self::with_compiler(config, compiler)
    }

    fn with_compiler(config: RuntimeConfig, compiler: Compiler) -> Result<Self> {
        let threads = Arc::new(ThreadManager::with_max_threads(config.threads.max_threads));
        let bridge = Arc::new(InterpreterBridge::start()?);
        let loader = ModuleLoader::new(
            Arc::clone(&threads),
            Arc::clone(&bridge),
            config.loader.clone(),
        );
        info!(
            max_threads = config.threads.max_threads,
            toolchain = %config.compiler.toolchain,
            "Runtime started"
        );
        Ok(Self {
            config,
            threads,
            bridge,
            loader,
            compiler,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn threads(&self) -> &ThreadManager {
        &self.threads
    }

    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    pub fn interpreter(&self) -> &InterpreterBridge {
        &self.bridge
    }

    /// Compile `source` and register the artifact with the loader as `module`.
    ///
    /// A module already registered under that name is kept as is.
    pub fn compile_and_load(&self, source: &str, module: &str, function: &str) -> Result<PathBuf> {
        let artifact = self.compiler.compile(source, module, function)?;
        if self.loader.get_handle(module).is_none() {
            self.loader.load_module(&artifact, module)?;
        }
        Ok(artifact)
    }

    /// Modules present in the configured directories.
    pub fn discover(&self) -> Vec<DiscoveredModule> {
        discover_modules(&self.config.loader.modules_dir, &self.config.loader.scripts_dir)
    }

    /// Wait for every named thread, then stop the script host.
    pub fn shutdown(&self) {
        self.threads.join_all_threads();
        self.bridge.shutdown();
        info!("Runtime stopped");
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if self.bridge.is_running() {
            self.shutdown();
        }
    }
}
