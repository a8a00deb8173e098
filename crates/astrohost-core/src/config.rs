//! Runtime configuration.
//!
//! Defaults live in the [`defaults`] module, environment variable names in
//! [`env_vars`]. A [`RuntimeConfig`] is read from a TOML file where every
//! section and field is optional; the compiler's [`CompileOptions`] document is
//! a separate JSON file that is either absent or complete.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default values.
pub mod defaults {
    /// External C++ toolchain.
    pub const TOOLCHAIN: &str = "g++";
    /// Directory receiving compiled artifacts.
    pub const OUTPUT_DIR: &str = "modules/global";
    /// Compile options document.
    pub const OPTIONS_FILE: &str = "compile_options.json";
    /// Directory scanned for native artifacts.
    pub const MODULES_DIR: &str = "modules";
    /// Directory holding script modules.
    pub const SCRIPTS_DIR: &str = "scripts";
    /// Maximum number of concurrently running named threads.
    pub const MAX_THREADS: usize = 10;
    /// Flags that make the toolchain emit a loadable shared artifact.
    pub const ARTIFACT_FLAGS: &[&str] = &["-shared", "-fPIC"];
    /// Script file extension.
    pub const SCRIPT_EXTENSION: &str = "js";
}

/// Environment variable names.
pub mod env_vars {
    pub const TOOLCHAIN: &str = "ASTROHOST_TOOLCHAIN";
    pub const OUTPUT_DIR: &str = "ASTROHOST_OUTPUT_DIR";
    pub const MAX_THREADS: &str = "ASTROHOST_MAX_THREADS";
    pub const MODULES_DIR: &str = "ASTROHOST_MODULES_DIR";
    pub const SCRIPTS_DIR: &str = "ASTROHOST_SCRIPTS_DIR";
}

/// Compiler section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub toolchain: String,
    pub output_dir: PathBuf,
    pub options_file: PathBuf,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            toolchain: defaults::TOOLCHAIN.to_string(),
            output_dir: PathBuf::from(defaults::OUTPUT_DIR),
            options_file: PathBuf::from(defaults::OPTIONS_FILE),
        }
    }
}

/// Thread manager section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadConfig {
    pub max_threads: usize,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            max_threads: defaults::MAX_THREADS,
        }
    }
}

/// Module loader section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub modules_dir: PathBuf,
    pub scripts_dir: PathBuf,
    /// Refuse native calls whose entry point has no signature descriptor.
    pub require_signatures: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            modules_dir: PathBuf::from(defaults::MODULES_DIR),
            scripts_dir: PathBuf::from(defaults::SCRIPTS_DIR),
            require_signatures: false,
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub compiler: CompilerConfig,
    pub threads: ThreadConfig,
    pub loader: LoaderConfig,
}

impl RuntimeConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Apply `ASTROHOST_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(toolchain) = std::env::var(env_vars::TOOLCHAIN) {
            self.compiler.toolchain = toolchain;
        }
        if let Ok(dir) = std::env::var(env_vars::OUTPUT_DIR) {
            self.compiler.output_dir = PathBuf::from(dir);
        }
        if let Ok(max) = std::env::var(env_vars::MAX_THREADS) {
            self.threads.max_threads = max.parse().map_err(|_| {
                Error::config(format!("{} must be a positive integer", env_vars::MAX_THREADS))
            })?;
        }
        if let Ok(dir) = std::env::var(env_vars::MODULES_DIR) {
            self.loader.modules_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var(env_vars::SCRIPTS_DIR) {
            self.loader.scripts_dir = PathBuf::from(dir);
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.threads.max_threads == 0 {
            return Err(Error::config("threads.max_threads must be at least 1"));
        }
        if self.compiler.toolchain.trim().is_empty() {
            return Err(Error::config("compiler.toolchain must not be empty"));
        }
        Ok(())
    }
}

/// Compile options document.
///
/// All three fields are required once the document exists. A partial
/// document is rejected rather than merged with defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileOptions {
    pub optimization_level: Option<String>,
    pub cplus_version: Option<String>,
    pub warnings: Option<String>,
}

impl CompileOptions {
    /// Read the document at `path`. `Ok(None)` when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::config(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        Self::parse(&text).map(Some)
    }

    /// Parse and check a document.
    pub fn parse(text: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(text)
            .map_err(|e| Error::config(format!("invalid compile options: {}", e)))?;

        let missing: Vec<&str> = [
            ("optimization_level", &options.optimization_level),
            ("cplus_version", &options.cplus_version),
            ("warnings", &options.warnings),
        ]
        .iter()
        .filter(|(_, value)| value.is_none())
        .map(|(key, _)| *key)
        .collect();

        if !missing.is_empty() {
            return Err(Error::config(format!(
                "compile options missing required fields: {}",
                missing.join(", ")
            )));
        }
        Ok(options)
    }

    /// Toolchain flags contributed by the document, in field order.
    pub fn flags(&self) -> Vec<String> {
        [&self.optimization_level, &self.cplus_version, &self.warnings]
            .into_iter()
            .flatten()
            .flat_map(|value| value.split_whitespace().map(str::to_string))
            .collect()
    }

    /// Language standard flags only, for stages that do not optimize or link.
    pub fn standard_flags(&self) -> Vec<String> {
        self.cplus_version
            .iter()
            .flat_map(|value| value.split_whitespace().map(str::to_string))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_config_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.compiler.toolchain, defaults::TOOLCHAIN);
        assert_eq!(config.compiler.output_dir, PathBuf::from("modules/global"));
        assert_eq!(config.threads.max_threads, 10);
        assert!(!config.loader.require_signatures);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            [threads]
            max_threads = 4

            [compiler]
            toolchain = "clang++"
            "#,
        )
        .unwrap();
        assert_eq!(config.threads.max_threads, 4);
        assert_eq!(config.compiler.toolchain, "clang++");
        assert_eq!(
            config.compiler.options_file,
            PathBuf::from(defaults::OPTIONS_FILE)
        );
        assert_eq!(config.loader, LoaderConfig::default());
    }

    #[test]
    fn test_zero_threads_rejected() {
        let result = RuntimeConfig::from_toml_str("[threads]\nmax_threads = 0\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_compile_options_complete() {
        let options = CompileOptions::parse(
            r#"{"optimization_level": "-O2", "cplus_version": "-std=c++17", "warnings": "-Wall -Wextra"}"#,
        )
        .unwrap();
        assert_eq!(options.flags(), vec!["-O2", "-std=c++17", "-Wall", "-Wextra"]);
    }

    #[test]
    fn test_compile_options_partial_rejected() {
        let err = CompileOptions::parse(r#"{"optimization_level": "-O2"}"#).unwrap_err();
        match err {
            Error::Config(msg) => {
                assert!(msg.contains("cplus_version"));
                assert!(msg.contains("warnings"));
                assert!(!msg.contains("optimization_level"));
            }
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_compile_options_absent_file() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = CompileOptions::load(dir.path().join("compile_options.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_compile_options_malformed_json() {
        assert!(matches!(
            CompileOptions::parse("{not json"),
            Err(Error::Config(_))
        ));
    }
}
