//! Helpers shared by unit and integration tests.

use std::env;
use std::ffi::OsStr;
use std::sync::Mutex;

// Serializes tests that touch process-wide environment variables.
pub static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Runs `f` with `key` set to `value`, restoring the previous value after.
pub fn with_env_var<T>(key: &str, value: impl AsRef<OsStr>, f: impl FnOnce() -> T) -> T {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let prev = env::var_os(key);
    env::set_var(key, value);
    let out = f();
    match prev {
        Some(prev) => env::set_var(key, prev),
        None => env::remove_var(key),
    }
    out
}
