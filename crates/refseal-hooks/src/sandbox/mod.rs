//! Restricted Lua environment for hook scripts.
//!
//! Each hook invocation gets its own interpreter, created with only the
//! `string`, `table`, `math`, and `utf8` libraries and torn down when the
//! sandbox is dropped. Scripts interact with the repository exclusively
//! through the host functions registered in [`api`]; `os`, `io`,
//! `require`, and the load functions are not present. Two globals are
//! injected per run: `hookParameters` (a table of stage parameters) and
//! `hookExitCode` (an integer the script sets, 0 for success).
//!
//! Scripts run under a wall-clock timeout enforced from an instruction
//! hook; on expiry the interpreter is destroyed and the run reports
//! [`SandboxError::Timeout`].

mod api;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mlua::{Lua, LuaOptions, StdLib, Value, VmState};
use thiserror::Error;

pub(crate) use api::GitContext;

/// Default wall-clock bound for a single script run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How many VM instructions run between timeout checks.
const TIMEOUT_CHECK_INTERVAL: u32 = 4096;

/// Errors that can occur building or running a sandbox.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SandboxError {
    /// Interpreter construction or script execution failed.
    #[error("lua error: {0}")]
    Lua(#[from] mlua::Error),

    /// The script exceeded its wall-clock bound.
    #[error("hook script exceeded its {limit:?} timeout")]
    Timeout {
        /// The bound that was exceeded.
        limit: Duration,
    },

    /// The script blob is not valid UTF-8.
    #[error("hook script is not valid UTF-8")]
    InvalidScript,
}

/// Configuration injected into every sandbox.
///
/// The allowed directory and timeout are explicit values owned by the
/// caller; nothing here is read from process-global state.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Repository root; `readFile` rejects paths outside it and the
    /// version-control binary runs with it as working directory.
    pub allowed_dir: PathBuf,

    /// Wall-clock bound per script run.
    pub timeout: Duration,
}

impl SandboxConfig {
    /// Creates a configuration rooted at `allowed_dir` with the default
    /// timeout.
    pub fn new(allowed_dir: impl Into<PathBuf>) -> Self {
        Self {
            allowed_dir: allowed_dir.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Overrides the script timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Stage parameters handed to a script as the `hookParameters` table.
///
/// Named parameters become string-keyed fields; lines become the array
/// part, 1-indexed as Lua expects.
#[derive(Debug, Clone, Default)]
pub struct HookParameters {
    named: BTreeMap<String, String>,
    lines: Vec<String>,
}

impl HookParameters {
    /// Creates an empty parameter table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a named parameter.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.named.insert(key.into(), value.into());
    }

    /// Appends a positional line.
    pub fn push_line(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }
}

/// A single-use restricted interpreter.
pub struct LuaSandbox {
    lua: Lua,
    config: SandboxConfig,
}

impl LuaSandbox {
    /// Builds a fresh sandbox: restricted stdlib, host API registered,
    /// load functions removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the interpreter cannot be constructed.
    pub fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        let lua = Lua::new_with(
            StdLib::STRING | StdLib::TABLE | StdLib::MATH | StdLib::UTF8,
            LuaOptions::default(),
        )?;

        let context = Arc::new(GitContext::new(config.allowed_dir.clone()));
        api::register(&lua, &context)?;

        // Base functions that escape the sandbox are stripped even though
        // their libraries were never opened.
        let globals = lua.globals();
        for name in ["dofile", "loadfile", "load", "require", "collectgarbage"] {
            globals.set(name, Value::Nil)?;
        }

        Ok(Self { lua, config })
    }

    /// Runs a hook script with the given parameters and returns the exit
    /// code it set in `hookExitCode`.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Timeout`] when the wall-clock bound is
    /// exceeded and [`SandboxError::Lua`] for script failures.
    pub fn run_script(
        &self,
        source: &str,
        parameters: &HookParameters,
    ) -> Result<i32, SandboxError> {
        let globals = self.lua.globals();

        let parameter_table = self.lua.create_table()?;
        for (key, value) in &parameters.named {
            parameter_table.set(key.as_str(), value.as_str())?;
        }
        for (index, line) in parameters.lines.iter().enumerate() {
            parameter_table.set(index + 1, line.as_str())?;
        }
        globals.set("hookParameters", parameter_table)?;
        globals.set("hookExitCode", 0)?;

        let timed_out = Arc::new(AtomicBool::new(false));
        let deadline = Instant::now() + self.config.timeout;
        let flag = Arc::clone(&timed_out);
        self.lua.set_hook(
            mlua::HookTriggers::new().every_nth_instruction(TIMEOUT_CHECK_INTERVAL),
            move |_lua, _debug| {
                if Instant::now() >= deadline {
                    flag.store(true, Ordering::SeqCst);
                    return Err(mlua::Error::external("hook timeout exceeded"));
                }
                Ok(VmState::Continue)
            },
        );

        let result = self.lua.load(source).set_name("hook").exec();
        self.lua.remove_hook();

        match result {
            Ok(()) => {},
            Err(err) => {
                if timed_out.load(Ordering::SeqCst) {
                    return Err(SandboxError::Timeout {
                        limit: self.config.timeout,
                    });
                }
                return Err(err.into());
            },
        }

        let exit_code: i32 = globals.get("hookExitCode")?;
        Ok(exit_code)
    }
}
