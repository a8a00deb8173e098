//! On-demand compilation of source snippets into loadable artifacts.
//!
//! `compile` runs a fixed pipeline:
//! 1. argument check, then cache lookup by (module, function);
//! 2. output directory creation;
//! 3. flag resolution from the optional compile options document;
//! 4. syntax-only toolchain pass with the source on stdin;
//! 5. build of `<output_dir>/<module><DLL_SUFFIX>`;
//! 6. cache insertion.
//!
//! A cache hit returns the originally produced artifact without running
//! anything. Failures are logged and returned; nothing is retried.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{defaults, CompileOptions, CompilerConfig};
use crate::error::{CompileStage, Error, Result};
use crate::process::{ProcessRunner, ProcessSpec, SystemProcessRunner};

/// Identity of a compiled entry point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub module: String,
    pub function: String,
}

impl CacheKey {
    pub fn new(module: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            function: function.into(),
        }
    }
}

/// Shells out to an external C++ toolchain and caches what it produced.
pub struct Compiler {
    config: CompilerConfig,
    runner: Arc<dyn ProcessRunner>,
    cache: Mutex<HashMap<CacheKey, PathBuf>>,
}

impl Compiler {
    /// Compiler using the system toolchain.
    pub fn new(config: CompilerConfig) -> Self {
        Self::with_runner(config, Arc::new(SystemProcessRunner))
    }

    /// Compiler using a custom process runner.
    pub fn with_runner(config: CompilerConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            config,
            runner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Compile `source` into the artifact for `module`; returns its path.
    pub fn compile(&self, source: &str, module: &str, function: &str) -> Result<PathBuf> {
        debug!(module, function, "Compiling module");
        self.compile_uncached(source, module, function)
            .inspect_err(|e| error!(module, function, error = %e, "Compilation failed"))
    }

    fn compile_uncached(&self, source: &str, module: &str, function: &str) -> Result<PathBuf> {
        if source.is_empty() || module.is_empty() || function.is_empty() {
            return Err(Error::argument(
                "source, module and function must all be non-empty",
            ));
        }

        let key = CacheKey::new(module, function);
        if let Some(path) = self.cache.lock().get(&key) {
            warn!(module, function, path = %path.display(), "Module already compiled, returning cached artifact");
            return Ok(path.clone());
        }

        self.ensure_output_dir()?;
        let options = self.resolve_options()?;
        let output = self.artifact_path(module);

        // The syntax check parses under the same language standard as the build.
        let syntax = ProcessSpec::new(&self.config.toolchain)
            .args(["-fsyntax-only"])
            .args(options.as_ref().map(CompileOptions::standard_flags).unwrap_or_default())
            .args(["-x", "c++", "-"])
            .stdin(source);
        self.run_stage(CompileStage::Syntax, &syntax)?;

        let build = ProcessSpec::new(&self.config.toolchain)
            .args(defaults::ARTIFACT_FLAGS.iter().copied())
            .args(options.as_ref().map(CompileOptions::flags).unwrap_or_default())
            .args(["-x", "c++", "-", "-o"])
            .args([output.to_string_lossy().into_owned()])
            .stdin(source);
        self.run_stage(CompileStage::Build, &build)?;

        // A concurrent compile of the same key may have finished first; the
        // first inserted path stays authoritative.
        let path = self
            .cache
            .lock()
            .entry(key)
            .or_insert(output)
            .clone();
        info!(module, function, path = %path.display(), "Module compiled");
        Ok(path)
    }

    /// Where the artifact for `module` is written.
    pub fn artifact_path(&self, module: &str) -> PathBuf {
        self.config
            .output_dir
            .join(format!("{}{}", module, std::env::consts::DLL_SUFFIX))
    }

    /// Cached artifact for (module, function), if compiled in this process.
    pub fn cached_artifact(&self, module: &str, function: &str) -> Option<PathBuf> {
        self.cache
            .lock()
            .get(&CacheKey::new(module, function))
            .cloned()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    fn ensure_output_dir(&self) -> Result<()> {
        let dir = &self.config.output_dir;
        if dir.is_dir() {
            return Ok(());
        }
        warn!(dir = %dir.display(), "Output directory does not exist, creating it");
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::Directory(format!("cannot create {}: {}", dir.display(), e)))
    }

    /// The options document, or `None` when it is absent.
    fn resolve_options(&self) -> Result<Option<CompileOptions>> {
        let options = CompileOptions::load(&self.config.options_file)?;
        if options.is_some() {
            debug!(file = %self.config.options_file.display(), "Using compile options document");
        }
        Ok(options)
    }

    fn run_stage(&self, stage: CompileStage, spec: &ProcessSpec) -> Result<()> {
        debug!(%stage, command = %spec.command_line(), "Running toolchain");
        let output = self.runner.run(spec).map_err(|e| match e {
            Error::Toolchain {
                status,
                diagnostics,
                ..
            } => Error::Toolchain {
                stage,
                status,
                diagnostics,
            },
            other => other,
        })?;

        if output.success() {
            Ok(())
        } else {
            Err(Error::Toolchain {
                stage,
                status: output.status_code,
                diagnostics: output.output,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn config_in(dir: &Path) -> CompilerConfig {
        CompilerConfig {
            toolchain: "c++".to_string(),
            output_dir: dir.join("out"),
            options_file: dir.join("compile_options.json"),
        }
    }

    #[test]
    fn test_artifact_path_uses_platform_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = Compiler::new(config_in(dir.path()));
        let path = compiler.artifact_path("m1");
        assert_eq!(path.parent().unwrap(), dir.path().join("out"));
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            format!("m1{}", std::env::consts::DLL_SUFFIX)
        );
    }

    #[test]
    fn test_empty_arguments_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = Compiler::new(config_in(dir.path()));
        for (source, module, function) in [("", "m", "f"), ("int f();", "", "f"), ("int f();", "m", "")] {
            assert!(matches!(
                compiler.compile(source, module, function),
                Err(Error::Argument(_))
            ));
        }
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_resolve_options_absent_document() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = Compiler::new(config_in(dir.path()));
        assert!(compiler.resolve_options().unwrap().is_none());
    }
}
