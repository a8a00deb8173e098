//! Module loader.
//!
//! The loader is the only owner of live module handles. Native artifacts and
//! script modules share one name registry; a name refers to at most one
//! loaded module of either kind.
//!
//! Invocation resolves the entry point on the caller's thread, so a missing
//! symbol or a signature mismatch is reported by `invoke` itself. The call
//! then runs on a named thread of the [`ThreadManager`] and its result is
//! delivered through an [`InvocationHandle`].
//!
//! The registry lock and the thread manager's lock are never held together,
//! and the registry lock is never held across `dlopen`, library finalizers or
//! a request to the interpreter thread. A load checks the name, does its work
//! unlocked, then registers; a racing load of the same name that registered
//! first wins and the late module is released again.
//! An `unload_module` racing an `invoke` of the same name is memory-safe:
//! the unit of work holds its own reference to the library, which stays
//! mapped until the call returns.

mod invocation;
mod native;

pub use invocation::InvocationHandle;

use std::collections::{BTreeMap, HashMap};
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use libloading::Library;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::abi::{check_signature, AbiArgs, AbiType, RawEntry, Signature};
use crate::config::{defaults, LoaderConfig};
use crate::error::{Error, Result};
use crate::interpreter::InterpreterBridge;
use crate::not_found_err;
use crate::thread::ThreadManager;

use native::NativeModule;

/// Origin of a loaded module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Native,
    Script,
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            ModuleKind::Native => "native",
            ModuleKind::Script => "script",
        })
    }
}

/// Read-only view of a registered module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleHandle {
    pub name: String,
    pub kind: ModuleKind,
    pub path: PathBuf,
    pub loaded_at: DateTime<Utc>,
}

/// Diagnostics for a registered module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleInfo {
    #[serde(flatten)]
    pub handle: ModuleHandle,
    /// Exported callables of a script module; empty for native modules.
    pub functions: Vec<String>,
    /// Signatures declared for native entry points, in text form.
    pub signatures: BTreeMap<String, String>,
}

enum Loaded {
    Native(NativeModule),
    Script { path: PathBuf, functions: Vec<String> },
}

struct Entry {
    loaded: Loaded,
    loaded_at: DateTime<Utc>,
}

impl Entry {
    fn kind(&self) -> ModuleKind {
        match self.loaded {
            Loaded::Native(_) => ModuleKind::Native,
            Loaded::Script { .. } => ModuleKind::Script,
        }
    }

    fn path(&self) -> &Path {
        match &self.loaded {
            Loaded::Native(module) => module.path(),
            Loaded::Script { path, .. } => path,
        }
    }

    fn handle(&self, name: &str) -> ModuleHandle {
        ModuleHandle {
            name: name.to_string(),
            kind: self.kind(),
            path: self.path().to_path_buf(),
            loaded_at: self.loaded_at,
        }
    }
}

/// What `invoke` resolved a (module, function) pair to.
enum Target {
    Native {
        library: Arc<Library>,
        entry: RawEntry,
    },
    Script,
}

pub struct ModuleLoader {
    threads: Arc<ThreadManager>,
    bridge: Arc<InterpreterBridge>,
    config: LoaderConfig,
    modules: Mutex<HashMap<String, Entry>>,
}

impl ModuleLoader {
    pub fn new(
        threads: Arc<ThreadManager>,
        bridge: Arc<InterpreterBridge>,
        config: LoaderConfig,
    ) -> Self {
        Self {
            threads,
            bridge,
            config,
            modules: Mutex::new(HashMap::new()),
        }
    }

    pub fn threads(&self) -> &Arc<ThreadManager> {
        &self.threads
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Open the native artifact at `path` and register it as `name`.
    pub fn load_module(&self, path: impl AsRef<Path>, name: &str) -> Result<()> {
        let path = path.as_ref();
        check_name(name)?;

        self.ensure_vacant(name)?;

        let module = NativeModule::open(path)
            .inspect_err(|e| error!(module = name, error = %e, "Failed to load module"))?;
        if let Err(late) = self.register(name, Loaded::Native(module)) {
            drop(late);
            return Err(Error::duplicate(format!("module '{}'", name)));
        }
        info!(module = name, path = %path.display(), "Native module loaded");
        Ok(())
    }

    /// Release the native module `name`.
    pub fn unload_module(&self, name: &str) -> Result<()> {
        let mut modules = self.modules.lock();
        match modules.get(name).map(Entry::kind) {
            None => Err(not_found_err!("module '{}'", name)),
            Some(ModuleKind::Script) => Err(Error::argument(format!(
                "'{}' is a script module, use unload_script",
                name
            ))),
            Some(ModuleKind::Native) => {
                let removed = modules.remove(name);
                drop(modules);
                drop(removed);
                info!(module = name, "Native module unloaded");
                Ok(())
            }
        }
    }

    /// Load `<scripts_dir>/<name>.js` as script module `name`.
    pub fn load_script(&self, name: &str) -> Result<Vec<String>> {
        let path = self
            .config
            .scripts_dir
            .join(format!("{}.{}", name, defaults::SCRIPT_EXTENSION));
        self.load_script_from_path(path, name)
    }

    /// Load the script at `path` as script module `name`; returns its functions.
    pub fn load_script_from_path(&self, path: impl AsRef<Path>, name: &str) -> Result<Vec<String>> {
        let path = path.as_ref();
        check_name(name)?;

        self.ensure_vacant(name)?;

        let functions = self
            .bridge
            .load_script(name, path)
            .inspect_err(|e| error!(module = name, error = %e, "Failed to load script"))?;
        let loaded = Loaded::Script {
            path: path.to_path_buf(),
            functions: functions.clone(),
        };
        if self.register(name, loaded).is_err() {
            // A native module took the name while the script was evaluating.
            if let Err(e) = self.bridge.unload_script(name) {
                warn!(module = name, error = %e, "Failed to release late script");
            }
            return Err(Error::duplicate(format!("module '{}'", name)));
        }
        Ok(functions)
    }

    /// Release the script module `name`.
    pub fn unload_script(&self, name: &str) -> Result<()> {
        match self.modules.lock().get(name).map(Entry::kind) {
            None => return Err(not_found_err!("script module '{}'", name)),
            Some(ModuleKind::Native) => {
                return Err(Error::argument(format!(
                    "'{}' is a native module, use unload_module",
                    name
                )))
            }
            Some(ModuleKind::Script) => {}
        }

        // The name stays registered until the context is gone, so no load can
        // claim it in between.
        self.bridge.unload_script(name)?;
        let mut modules = self.modules.lock();
        if modules.get(name).map(Entry::kind) == Some(ModuleKind::Script) {
            modules.remove(name);
        }
        info!(module = name, "Script module unloaded");
        Ok(())
    }

    /// The module registered as `name`, or `None`.
    pub fn get_handle(&self, name: &str) -> Option<ModuleHandle> {
        self.modules.lock().get(name).map(|entry| entry.handle(name))
    }

    /// Declare the signature of a native entry point.
    ///
    /// A declaration takes precedence over a descriptor exported by the
    /// artifact itself.
    pub fn declare_signature(&self, module: &str, function: &str, signature: Signature) -> Result<()> {
        let mut modules = self.modules.lock();
        match modules.get_mut(module).map(|entry| &mut entry.loaded) {
            None => Err(not_found_err!("module '{}'", module)),
            Some(Loaded::Script { .. }) => Err(Error::argument(format!(
                "'{}' is a script module; script calls are not signature-checked",
                module
            ))),
            Some(Loaded::Native(native)) => {
                debug!(module, function, %signature, "Signature declared");
                native.declare(function, signature);
                Ok(())
            }
        }
    }

    /// Call `function` of `module` on a new thread named `thread`.
    ///
    /// `R` and `A` describe the entry point. For native modules they are
    /// checked against its signature when one is known; for script modules
    /// the arguments travel as JSON and the result is converted into `R`.
    pub fn invoke<R, A>(&self, module: &str, function: &str, thread: &str, args: A) -> Result<InvocationHandle<R>>
    where
        R: AbiType,
        A: AbiArgs,
    {
        let requested = Signature::of::<R, A>();
        let target = self
            .resolve(module, function, &requested)
            .inspect_err(|e| error!(module, function, error = %e, "Cannot invoke"))?;

        let (sender, handle) = InvocationHandle::channel(thread);
        match target {
            Target::Native { library, entry } => {
                self.threads.add_thread(thread, move || {
                    let value = unsafe { args.call::<R>(entry) };
                    drop(library);
                    let _ = sender.send(Ok(value));
                })?;
            }
            Target::Script => {
                let json = args.to_json()?;
                let bridge = Arc::clone(&self.bridge);
                let module = module.to_string();
                let function = function.to_string();
                self.threads.add_thread(thread, move || {
                    let result = bridge
                        .call(&module, &function, json)
                        .and_then(|value| from_script_value::<R>(&function, value));
                    let _ = sender.send(result);
                })?;
            }
        }

        debug!(module, function, thread, "Invocation submitted");
        Ok(handle)
    }

    /// Call a native `function` with `instance` bound as its leading pointer
    /// argument, on a new thread named `thread`.
    pub fn invoke_with_instance<T, R, A>(
        &self,
        module: &str,
        function: &str,
        thread: &str,
        instance: Arc<T>,
        args: A,
    ) -> Result<InvocationHandle<R>>
    where
        T: Send + Sync + 'static,
        R: AbiType,
        A: AbiArgs,
    {
        let requested = Signature::with_context_of::<R, A>();
        let target = self
            .resolve(module, function, &requested)
            .inspect_err(|e| error!(module, function, error = %e, "Cannot invoke"))?;
        let Target::Native { library, entry } = target else {
            return Err(Error::argument(format!(
                "'{}' is a script module; instance binding needs a native module",
                module
            )));
        };

        let (sender, handle) = InvocationHandle::channel(thread);
        self.threads.add_thread(thread, move || {
            let context = Arc::as_ptr(&instance) as *mut c_void;
            let value = unsafe { args.call_with_context::<R>(entry, context) };
            drop(instance);
            drop(library);
            let _ = sender.send(Ok(value));
        })?;

        debug!(module, function, thread, "Instance invocation submitted");
        Ok(handle)
    }

    /// Registered module names, sorted.
    pub fn module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Exported callables of script module `name`.
    pub fn script_functions(&self, name: &str) -> Result<Vec<String>> {
        match self.modules.lock().get(name).map(|entry| &entry.loaded) {
            Some(Loaded::Script { functions, .. }) => Ok(functions.clone()),
            Some(Loaded::Native(_)) => Err(Error::argument(format!(
                "'{}' is a native module",
                name
            ))),
            None => Err(not_found_err!("script module '{}'", name)),
        }
    }

    pub fn module_info(&self, name: &str) -> Option<ModuleInfo> {
        let modules = self.modules.lock();
        let entry = modules.get(name)?;
        let (functions, signatures) = match &entry.loaded {
            Loaded::Script { functions, .. } => (functions.clone(), BTreeMap::new()),
            Loaded::Native(native) => (
                Vec::new(),
                native
                    .declared()
                    .iter()
                    .map(|(function, signature)| (function.clone(), signature.to_string()))
                    .collect(),
            ),
        };
        Some(ModuleInfo {
            handle: entry.handle(name),
            functions,
            signatures,
        })
    }

    fn ensure_vacant(&self, name: &str) -> Result<()> {
        if self.modules.lock().contains_key(name) {
            warn!(module = name, "Module name already registered");
            return Err(Error::duplicate(format!("module '{}'", name)));
        }
        Ok(())
    }

    /// Insert `loaded` as `name`. Hands it back when the name was taken.
    fn register(&self, name: &str, loaded: Loaded) -> std::result::Result<(), Loaded> {
        let mut modules = self.modules.lock();
        if modules.contains_key(name) {
            warn!(module = name, "Module name registered concurrently");
            return Err(loaded);
        }
        modules.insert(
            name.to_string(),
            Entry {
                loaded,
                loaded_at: Utc::now(),
            },
        );
        Ok(())
    }

    fn resolve(&self, module: &str, function: &str, requested: &Signature) -> Result<Target> {
        let modules = self.modules.lock();
        let entry = modules
            .get(module)
            .ok_or_else(|| not_found_err!("module '{}'", module))?;

        let native = match &entry.loaded {
            Loaded::Native(native) => native,
            Loaded::Script { functions, .. } => {
                if !functions.iter().any(|f| f == function) {
                    return Err(Error::symbol(module, function, "not an exported function"));
                }
                return Ok(Target::Script);
            }
        };

        let entry_point = native.entry(module, function)?;
        match native.signature(module, function)? {
            Some(declared) => check_signature(function, &declared, requested)?,
            None if self.config.require_signatures => {
                return Err(Error::signature(
                    function,
                    "a declared signature",
                    requested.to_string(),
                ));
            }
            None => debug!(module, function, %requested, "No signature known, calling unchecked"),
        }

        Ok(Target::Native {
            library: native.library(),
            entry: entry_point,
        })
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::argument("module name must not be empty"));
    }
    Ok(())
}

fn from_script_value<R: AbiType>(function: &str, value: serde_json::Value) -> Result<R> {
    serde_json::from_value::<R>(value.clone())
        .map_err(|e| Error::signature(function, R::TYPE.to_string(), format!("{} ({})", value, e)))
}
