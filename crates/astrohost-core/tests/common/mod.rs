//! Shared helpers for tests that need a real C++ toolchain.

#![allow(dead_code)]

use std::path::Path;
use std::process::{Command, Stdio};

use astrohost_core::config::{CompilerConfig, LoaderConfig, RuntimeConfig, ThreadConfig};

pub const TOOLCHAIN: &str = "g++";

/// Entry points used by the native module tests.
pub const WORKER_SOURCE: &str = r#"
#include <atomic>
#include <unistd.h>

static std::atomic<int> last_value{0};

extern "C" void doWork(int value) {
    usleep(200 * 1000);
    last_value.store(value);
}
extern "C" const char doWork__signature[] = "i32->void";

extern "C" int lastValue() { return last_value.load(); }

extern "C" long long add(int a, long long b) { return a + b; }

extern "C" double scale(void* context, double x) {
    return *static_cast<double*>(context) * x;
}
"#;

/// Whether the toolchain can be run; tests needing it skip otherwise.
pub fn toolchain_available() -> bool {
    let available = Command::new(TOOLCHAIN)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false);
    if !available {
        eprintln!("{} not available, skipping", TOOLCHAIN);
    }
    available
}

pub fn runtime_config(dir: &Path) -> RuntimeConfig {
    RuntimeConfig {
        compiler: CompilerConfig {
            toolchain: TOOLCHAIN.to_string(),
            output_dir: dir.join("modules").join("global"),
            options_file: dir.join("compile_options.json"),
        },
        threads: ThreadConfig { max_threads: 4 },
        loader: LoaderConfig {
            modules_dir: dir.join("modules"),
            scripts_dir: dir.join("scripts"),
            require_signatures: false,
        },
    }
}

pub fn write_file(path: &Path, body: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, body).unwrap();
}
