//! # refseal-hooks
//!
//! Sandboxed execution of policy-defined hooks.
//!
//! Hooks are Lua scripts stored in the object store and declared in Root
//! metadata per lifecycle stage. The executor selects the hooks that apply
//! to the calling principal, assembles stage-specific parameters, and runs
//! each script in a fresh, restricted interpreter with a curated host API:
//! no filesystem writes, no process spawning beyond the version-control
//! binary, no network, and file reads confined to the repository root.
//!
//! ## Example
//!
//! ```rust,no_run
//! use refseal_core::metadata::HookStage;
//! use refseal_core::policy::{State, StateLoadOptions};
//! use refseal_core::store::MemoryObjectStore;
//! use refseal_hooks::{HookExecutor, InvokeOptions, SandboxConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryObjectStore::new();
//! let state = State::load_current(&store, &StateLoadOptions::default())?;
//!
//! let executor = HookExecutor::new(&store, SandboxConfig::new("/path/to/repo"));
//! let exit_codes = executor.invoke_hooks_for_stage(
//!     &state,
//!     HookStage::PreCommit,
//!     None,
//!     &InvokeOptions::default(),
//! )?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod executor;
pub mod sandbox;

pub use executor::{
    update_hook, HookError, HookExecutor, InvokeOptions, PrePushOptions, RefSpec,
    ACTING_PRINCIPAL_ENV, TIMEOUT_EXIT_CODE,
};
pub use sandbox::{HookParameters, LuaSandbox, SandboxConfig, SandboxError};
