//! Developer-mode gating.
//!
//! Some operations (cache population, experimental global rule types) are
//! only available when developer mode is enabled. The flag is an explicit
//! value injected into the operations that consume it; tests construct it
//! directly instead of mutating the process environment.

use std::env;

/// Environment variable that unlocks developer-only operations.
pub const DEV_MODE_ENV: &str = "REFSEAL_DEV";

/// Whether developer-only operations are unlocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DevMode {
    enabled: bool,
}

impl DevMode {
    /// Returns a `DevMode` with developer operations unlocked.
    #[must_use]
    pub const fn enabled() -> Self {
        Self { enabled: true }
    }

    /// Returns a `DevMode` with developer operations locked.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { enabled: false }
    }

    /// Reads the flag from the process environment (`REFSEAL_DEV=1`).
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            enabled: env::var(DEV_MODE_ENV).is_ok_and(|v| v == "1"),
        }
    }

    /// Returns `true` if developer operations are unlocked.
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        self.enabled
    }

    /// Returns an error unless developer mode is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`NotInDevMode`] when the flag is not set.
    pub const fn require(self) -> Result<(), NotInDevMode> {
        if self.enabled {
            Ok(())
        } else {
            Err(NotInDevMode)
        }
    }
}

/// A developer-gated operation was invoked without the flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("this operation is only available in developer mode (set {DEV_MODE_ENV}=1)")]
pub struct NotInDevMode;
