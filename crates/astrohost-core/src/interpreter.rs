//! Embedded script host.
//!
//! One [`InterpreterBridge`] hosts every script module of the process. The
//! JavaScript engine (Boa) is not thread-safe, so all engine state lives on a
//! single host thread owned by the bridge; other threads talk to it through
//! a request channel and wait on a one-shot reply.
//!
//! Each script module is evaluated in its own context. Its exported callables
//! are the functions the script binds on the global object, that is top-level
//! `function` declarations and `var`-bound function values.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use boa_engine::{Context, JsValue, Source};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::{not_found_err, script_err};

const HOST_THREAD_NAME: &str = "astrohost-interpreter";

const FUNCTIONS_QUERY: &str = r#"Object.getOwnPropertyNames(globalThis).filter((key) => typeof globalThis[key] === "function")"#;

type Reply<T> = oneshot::Sender<Result<T>>;

enum Request {
    Load {
        name: String,
        path: PathBuf,
        source: String,
        reply: Reply<Vec<String>>,
    },
    Unload {
        name: String,
        reply: Reply<()>,
    },
    Functions {
        name: String,
        reply: Reply<Vec<String>>,
    },
    Call {
        module: String,
        function: String,
        args: Vec<Value>,
        reply: Reply<Value>,
    },
    Shutdown,
}

/// A loaded script and its evaluation context. Lives on the host thread only.
struct ScriptModule {
    path: PathBuf,
    context: Context<'static>,
    exports: Vec<String>,
}

/// Process-wide script host with an explicit start/shutdown lifecycle.
///
/// Every method blocks the calling thread until the host answers, so calls
/// must not be made from inside an async runtime worker.
pub struct InterpreterBridge {
    requests: mpsc::UnboundedSender<Request>,
    host: Mutex<Option<JoinHandle<()>>>,
}

impl InterpreterBridge {
    /// Spawn the host thread.
    pub fn start() -> Result<Self> {
        let (requests, inbox) = mpsc::unbounded_channel();
        let host = std::thread::Builder::new()
            .name(HOST_THREAD_NAME.to_string())
            .spawn(move || run_host(inbox))
            .map_err(|e| Error::internal(format!("failed to start interpreter: {}", e)))?;
        info!("Interpreter bridge started");
        Ok(Self {
            requests,
            host: Mutex::new(Some(host)),
        })
    }

    /// Whether the host thread is still accepting requests.
    pub fn is_running(&self) -> bool {
        !self.requests.is_closed()
    }

    /// Evaluate the script at `path` as module `name`; returns its exported callables.
    pub fn load_script(&self, name: &str, path: impl AsRef<Path>) -> Result<Vec<String>> {
        if name.trim().is_empty() {
            return Err(Error::argument("script name must not be empty"));
        }
        let path = path.as_ref().to_path_buf();
        let source = std::fs::read_to_string(&path)
            .map_err(|e| Error::Load(format!("cannot read script {}: {}", path.display(), e)))?;
        self.request(|reply| Request::Load {
            name: name.to_string(),
            path,
            source,
            reply,
        })
    }

    /// Drop module `name` and its context.
    pub fn unload_script(&self, name: &str) -> Result<()> {
        self.request(|reply| Request::Unload {
            name: name.to_string(),
            reply,
        })
    }

    /// Exported callables of module `name`.
    pub fn functions(&self, name: &str) -> Result<Vec<String>> {
        self.request(|reply| Request::Functions {
            name: name.to_string(),
            reply,
        })
    }

    /// Call `function` of `module` with JSON arguments; blocks until it returns.
    pub fn call(&self, module: &str, function: &str, args: Vec<Value>) -> Result<Value> {
        self.request(|reply| Request::Call {
            module: module.to_string(),
            function: function.to_string(),
            args,
            reply,
        })
    }

    /// Stop the host thread, dropping every script module. Idempotent.
    pub fn shutdown(&self) {
        let host = self.host.lock().take();
        if let Some(host) = host {
            let _ = self.requests.send(Request::Shutdown);
            if host.join().is_err() {
                warn!("Interpreter host thread panicked");
            }
            info!("Interpreter bridge stopped");
        }
    }

    fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Request) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(build(reply))
            .map_err(|_| Error::disconnected("interpreter is not running"))?;
        response
            .blocking_recv()
            .map_err(|_| Error::disconnected("interpreter dropped the request"))?
    }
}

impl Drop for InterpreterBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_host(mut inbox: mpsc::UnboundedReceiver<Request>) {
    let mut modules: HashMap<String, ScriptModule> = HashMap::new();

    while let Some(request) = inbox.blocking_recv() {
        match request {
            Request::Load {
                name,
                path,
                source,
                reply,
            } => {
                let _ = reply.send(load(&mut modules, name, path, &source));
            }
            Request::Unload { name, reply } => {
                let result = match modules.remove(&name) {
                    Some(module) => {
                        debug!(script = %name, path = %module.path.display(), "Script unloaded");
                        Ok(())
                    }
                    None => Err(not_found_err!("script module '{}'", name)),
                };
                let _ = reply.send(result);
            }
            Request::Functions { name, reply } => {
                let result = modules
                    .get(&name)
                    .map(|module| module.exports.clone())
                    .ok_or_else(|| not_found_err!("script module '{}'", name));
                let _ = reply.send(result);
            }
            Request::Call {
                module,
                function,
                args,
                reply,
            } => {
                let result = match modules.get_mut(&module) {
                    Some(script) => call(script, &module, &function, &args),
                    None => Err(not_found_err!("script module '{}'", module)),
                };
                let _ = reply.send(result);
            }
            Request::Shutdown => break,
        }
    }

    debug!(count = modules.len(), "Releasing script modules");
}

fn load(
    modules: &mut HashMap<String, ScriptModule>,
    name: String,
    path: PathBuf,
    source: &str,
) -> Result<Vec<String>> {
    if modules.contains_key(&name) {
        return Err(Error::duplicate(format!("script module '{}'", name)));
    }

    let mut context = Context::default();
    let builtins = global_functions(&mut context)
        .map_err(|e| script_err!("inspecting fresh context: {}", e))?;

    context
        .eval(Source::from_bytes(source))
        .map_err(|e| script_err!("evaluating {}: {}", path.display(), e))?;

    let exports: Vec<String> = global_functions(&mut context)
        .map_err(|e| script_err!("listing exports of {}: {}", path.display(), e))?
        .into_iter()
        .filter(|f| !builtins.contains(f))
        .collect();

    info!(script = %name, path = %path.display(), exports = exports.len(), "Script loaded");
    modules.insert(
        name,
        ScriptModule {
            path,
            context,
            exports: exports.clone(),
        },
    );
    Ok(exports)
}

/// Names of the functions bound on the global object.
fn global_functions(context: &mut Context<'static>) -> Result<Vec<String>> {
    let names = context
        .eval(Source::from_bytes(FUNCTIONS_QUERY))
        .and_then(|names| names.to_json(context))
        .map_err(|e| script_err!("{}", e))?;
    Ok(serde_json::from_value(names)?)
}

fn call(script: &mut ScriptModule, module: &str, function: &str, args: &[Value]) -> Result<Value> {
    if !script.exports.iter().any(|f| f == function) {
        return Err(Error::symbol(module, function, "not an exported function"));
    }
    let context = &mut script.context;

    // The name goes through JSON so it is always a well-formed string literal.
    let lookup = format!("globalThis[{}]", serde_json::to_string(function)?);
    let callee = context
        .eval(Source::from_bytes(&lookup))
        .map_err(|e| script_err!("resolving {}.{}: {}", module, function, e))?;
    let callee = callee
        .as_callable()
        .cloned()
        .ok_or_else(|| Error::symbol(module, function, "no longer callable"))?;

    let mut js_args = Vec::with_capacity(args.len());
    for arg in args {
        let value = JsValue::from_json(arg, context)
            .map_err(|e| script_err!("converting argument for {}.{}: {}", module, function, e))?;
        js_args.push(value);
    }

    let result = callee
        .call(&JsValue::undefined(), &js_args, context)
        .map_err(|e| script_err!("{}.{} threw: {}", module, function, e))?;

    if result.is_undefined() {
        return Ok(Value::Null);
    }
    result
        .to_json(context)
        .map_err(|e| script_err!("converting result of {}.{}: {}", module, function, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn script(dir: &tempfile::TempDir, file: &str, body: &str) -> PathBuf {
        let path = dir.path().join(file);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_lists_functions() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(
            &dir,
            "math.js",
            "function add(a, b) { return a + b; }\nvar twice = function (x) { return 2 * x; };\nvar answer = 42;\n",
        );
        let bridge = InterpreterBridge::start().unwrap();
        let mut exports = bridge.load_script("math", &path).unwrap();
        exports.sort();
        assert_eq!(exports, vec!["add".to_string(), "twice".to_string()]);
    }

    #[test]
    fn test_call_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(&dir, "math.js", "function add(a, b) { return a + b; }\nfunction nothing() {}\n");
        let bridge = InterpreterBridge::start().unwrap();
        bridge.load_script("math", &path).unwrap();

        let sum = bridge
            .call("math", "add", vec![Value::from(40), Value::from(2)])
            .unwrap();
        assert_eq!(sum.as_f64(), Some(42.0));

        let none = bridge.call("math", "nothing", vec![]).unwrap();
        assert!(none.is_null());
    }

    #[test]
    fn test_modules_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let a = script(&dir, "a.js", "function name() { return 'a'; }\n");
        let b = script(&dir, "b.js", "function name() { return 'b'; }\n");
        let bridge = InterpreterBridge::start().unwrap();
        bridge.load_script("a", &a).unwrap();
        bridge.load_script("b", &b).unwrap();
        assert_eq!(bridge.call("a", "name", vec![]).unwrap(), Value::from("a"));
        assert_eq!(bridge.call("b", "name", vec![]).unwrap(), Value::from("b"));
    }

    #[test]
    fn test_errors() {
        let dir = tempfile::tempdir().unwrap();
        let broken = script(&dir, "broken.js", "function (\n");
        let thrower = script(&dir, "thrower.js", "function fail() { throw new Error('nope'); }\n");
        let bridge = InterpreterBridge::start().unwrap();

        assert!(matches!(
            bridge.load_script("broken", &broken),
            Err(Error::Script(_))
        ));
        assert!(matches!(
            bridge.load_script("missing", dir.path().join("missing.js")),
            Err(Error::Load(_))
        ));

        bridge.load_script("thrower", &thrower).unwrap();
        assert!(matches!(
            bridge.load_script("thrower", &thrower),
            Err(Error::DuplicateName(_))
        ));
        assert!(matches!(
            bridge.call("thrower", "fail", vec![]),
            Err(Error::Script(_))
        ));
        assert!(matches!(
            bridge.call("thrower", "absent", vec![]),
            Err(Error::Symbol { .. })
        ));
        assert!(matches!(
            bridge.call("ghost", "fail", vec![]),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_unload_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(&dir, "m.js", "function f() { return 1; }\n");
        let bridge = InterpreterBridge::start().unwrap();
        bridge.load_script("m", &path).unwrap();
        bridge.unload_script("m").unwrap();
        assert!(matches!(bridge.functions("m"), Err(Error::NotFound(_))));
        assert!(matches!(bridge.unload_script("m"), Err(Error::NotFound(_))));

        bridge.shutdown();
        assert!(!bridge.is_running());
        assert!(matches!(
            bridge.functions("m"),
            Err(Error::Disconnected(_))
        ));
    }
}
