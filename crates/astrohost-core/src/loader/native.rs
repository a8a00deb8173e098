//! Native artifacts opened through the platform dynamic loader.

use std::collections::BTreeMap;
use std::ffi::{c_char, CStr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::{Library, Symbol};
use tracing::debug;

use crate::abi::{signature_symbol, RawEntry, Signature};
use crate::error::{Error, Result};

/// An open shared library plus the signatures declared for its entry points.
pub(crate) struct NativeModule {
    path: PathBuf,
    library: Arc<Library>,
    declared: BTreeMap<String, Signature>,
}

impl NativeModule {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::Load(format!(
                "{}: no such artifact",
                path.display()
            )));
        }
        // Loading runs the library's initializers; artifacts are trusted.
        let library = unsafe { Library::new(path) }
            .map_err(|e| Error::Load(format!("{}: {}", path.display(), e)))?;
        Ok(Self {
            path: path.to_path_buf(),
            library: Arc::new(library),
            declared: BTreeMap::new(),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Shared reference that keeps the library mapped while a call runs.
    pub(crate) fn library(&self) -> Arc<Library> {
        Arc::clone(&self.library)
    }

    pub(crate) fn declare(&mut self, function: &str, signature: Signature) {
        self.declared.insert(function.to_string(), signature);
    }

    pub(crate) fn declared(&self) -> &BTreeMap<String, Signature> {
        &self.declared
    }

    /// Address of `function`.
    pub(crate) fn entry(&self, module: &str, function: &str) -> Result<RawEntry> {
        let symbol: Symbol<unsafe extern "C" fn()> = unsafe { self.library.get(function.as_bytes()) }
            .map_err(|e| Error::symbol(module, function, e.to_string()))?;
        Ok(RawEntry::new(*symbol))
    }

    /// Signature of `function`: declared first, then the exported descriptor.
    pub(crate) fn signature(&self, module: &str, function: &str) -> Result<Option<Signature>> {
        if let Some(signature) = self.declared.get(function) {
            return Ok(Some(signature.clone()));
        }

        let name = signature_symbol(function);
        // The descriptor symbol is the first byte of a NUL-terminated array.
        let descriptor: Symbol<*const c_char> = match unsafe { self.library.get(name.as_bytes()) } {
            Ok(symbol) => symbol,
            Err(_) => return Ok(None),
        };
        if descriptor.is_null() {
            return Ok(None);
        }
        let text = unsafe { CStr::from_ptr(*descriptor) }.to_string_lossy();
        let signature = text
            .parse::<Signature>()
            .map_err(|e| Error::symbol(module, &name, format!("malformed descriptor: {}", e)))?;
        debug!(module, function, %signature, "Read exported signature");
        Ok(Some(signature))
    }
}
