//! Hook selection and invocation.
//!
//! Hooks are declared in Root metadata per lifecycle stage; the executor
//! resolves the calling principal, selects the hooks that name it, and
//! runs each one in a fresh sandbox. Infrastructure failures abort the
//! stage; script exit codes are returned for the caller to interpret per
//! stage policy.

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use thiserror::Error;

use refseal_core::crypto::{Signer, SignerError};
use refseal_core::envelope::{Envelope, EnvelopeError};
use refseal_core::hash::Hash;
use refseal_core::metadata::HookStage;
use refseal_core::policy::{PolicyError, State};
use refseal_core::store::{ObjectStore, StoreError};

use crate::sandbox::{HookParameters, LuaSandbox, SandboxConfig, SandboxError};

/// Exit code reported for a hook destroyed by its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Environment variable naming the acting principal when no signer is
/// supplied.
pub const ACTING_PRINCIPAL_ENV: &str = "REFSEAL_GIT_PRINCIPAL_ID";

/// Errors that can occur selecting or running hooks.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HookError {
    /// The operation requires a signer and none was supplied.
    #[error("no signer supplied and {ACTING_PRINCIPAL_ENV} is not set")]
    NoSigner,

    /// The signing key does not belong to any principal in the policy.
    #[error("key '{key_id}' does not resolve to any principal")]
    PrincipalNotFound {
        /// The unresolved key identifier.
        key_id: String,
    },

    /// The named principal does not exist in the policy.
    #[error("principal '{principal_id}' not found in policy")]
    UnknownPrincipal {
        /// The unresolved principal identifier.
        principal_id: String,
    },

    /// No hooks at this stage apply to the principal.
    #[error("no hooks found for principal '{principal_id}' at stage '{stage}'")]
    NoHooksFound {
        /// The stage searched.
        stage: HookStage,
        /// The resolved principal.
        principal_id: String,
    },

    /// Refusal to overwrite an installed hook without `force`.
    #[error("hook '{hook_type}' already exists")]
    HookExists {
        /// The hook file name.
        hook_type: String,
    },

    /// Policy failure while consulting state.
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// Object store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Signer failure during attestation.
    #[error(transparent)]
    Signer(#[from] SignerError),

    /// Envelope failure during attestation.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// Sandbox failure.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// Filesystem failure placing an installed hook.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HookError {
    /// Maps the error to the process exit code contract: `4` principal
    /// not found, `5` hook denied, policy codes pass through, `1`
    /// anything else.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::PrincipalNotFound { .. } | Self::UnknownPrincipal { .. } => 4,
            Self::NoHooksFound { .. } => 5,
            Self::Policy(err) => err.exit_code(),
            _ => 1,
        }
    }
}

/// One `<local>:<remote>` refspec being pushed.
#[derive(Debug, Clone)]
pub struct RefSpec {
    /// The local reference being pushed.
    pub local_ref: String,

    /// The remote reference it updates.
    pub remote_ref: String,
}

/// Parameters for pre-push hook invocation.
#[derive(Debug, Clone)]
pub struct PrePushOptions {
    /// Name of the remote being pushed to.
    pub remote_name: String,

    /// URL of the remote being pushed to.
    pub remote_url: String,

    /// The refspecs being pushed.
    pub ref_specs: Vec<RefSpec>,
}

/// Options for a hook invocation.
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    /// Prove the signer is functional with a trial signature before any
    /// hook runs.
    pub attest: bool,

    /// Pre-push parameters; required when invoking the pre-push stage.
    pub pre_push: Option<PrePushOptions>,
}

/// Runs policy-defined hooks against an object store.
pub struct HookExecutor<'a> {
    store: &'a dyn ObjectStore,
    sandbox_config: SandboxConfig,
}

impl<'a> HookExecutor<'a> {
    /// Creates an executor over `store` with the given sandbox
    /// configuration.
    #[must_use]
    pub const fn new(store: &'a dyn ObjectStore, sandbox_config: SandboxConfig) -> Self {
        Self {
            store,
            sandbox_config,
        }
    }

    /// Runs the hooks declared for `stage` that apply to the calling
    /// principal and returns their exit codes keyed by hook id.
    ///
    /// The principal is resolved from the signer's key; when no signer is
    /// supplied, the `REFSEAL_GIT_PRINCIPAL_ID` environment variable
    /// selects the acting principal instead.
    ///
    /// A hook destroyed by its timeout reports [`TIMEOUT_EXIT_CODE`] and
    /// aborts the stage: later hooks do not run.
    ///
    /// # Errors
    ///
    /// - [`HookError::NoSigner`] when neither a signer nor the
    ///   environment selects a principal
    /// - [`HookError::PrincipalNotFound`] when the key resolves to no
    ///   principal
    /// - [`HookError::NoHooksFound`] when no hooks apply
    /// - infrastructure failures abort the stage
    pub fn invoke_hooks_for_stage(
        &self,
        state: &State,
        stage: HookStage,
        signer: Option<&dyn Signer>,
        options: &InvokeOptions,
    ) -> Result<BTreeMap<String, i32>, HookError> {
        let principal_id = self.resolve_principal(state, signer)?;
        tracing::debug!(%principal_id, %stage, "resolved acting principal");

        if options.attest {
            let signer = signer.ok_or(HookError::NoSigner)?;
            // A trial signature proves the signer works before any hook
            // observes side effects.
            let mut probe = Envelope::seal(state.root())?;
            probe.sign(signer)?;
        }

        let selected: Vec<_> = state
            .hooks(stage)
            .iter()
            .filter(|hook| hook.applies_to(&principal_id))
            .collect();

        if selected.is_empty() {
            return Err(HookError::NoHooksFound {
                stage,
                principal_id,
            });
        }

        let parameters = match (stage, &options.pre_push) {
            (HookStage::PrePush, Some(pre_push)) => self.pre_push_parameters(pre_push)?,
            _ => HookParameters::new(),
        };

        let mut exit_codes = BTreeMap::new();
        for hook in selected {
            let blob = self.store.read_blob(&hook.blob_id)?;
            let source = String::from_utf8(blob).map_err(|_| SandboxError::InvalidScript)?;

            let sandbox = LuaSandbox::new(self.sandbox_config.clone())?;
            match sandbox.run_script(&source, &parameters) {
                Ok(exit_code) => {
                    tracing::debug!(hook = %hook.id, exit_code, "hook completed");
                    exit_codes.insert(hook.id.clone(), exit_code);
                },
                Err(SandboxError::Timeout { limit }) => {
                    tracing::warn!(hook = %hook.id, ?limit, "hook timed out, aborting stage");
                    exit_codes.insert(hook.id.clone(), TIMEOUT_EXIT_CODE);
                    break;
                },
                Err(err) => return Err(err.into()),
            }
        }

        Ok(exit_codes)
    }

    /// Installs a hook script under the store's repository metadata
    /// directory. See [`update_hook`].
    ///
    /// # Errors
    ///
    /// Returns [`HookError::HookExists`] when the file is present and
    /// `force` is false, plus store and I/O failures.
    pub fn install_hook(
        &self,
        hook_type: &str,
        content: &[u8],
        force: bool,
    ) -> Result<(), HookError> {
        let git_dir = self.store.git_dir()?;
        update_hook(&git_dir, hook_type, content, force)
    }

    fn resolve_principal(
        &self,
        state: &State,
        signer: Option<&dyn Signer>,
    ) -> Result<String, HookError> {
        if let Some(signer) = signer {
            let key_id = signer.key_id();
            return state
                .find_principal_by_key_id(key_id)
                .map(|p| p.id().to_string())
                .ok_or_else(|| HookError::PrincipalNotFound {
                    key_id: key_id.to_string(),
                });
        }

        let Ok(principal_id) = std::env::var(ACTING_PRINCIPAL_ENV) else {
            return Err(HookError::NoSigner);
        };
        state
            .all_principals()
            .find(|p| p.id() == principal_id)
            .map(|p| p.id().to_string())
            .ok_or(HookError::UnknownPrincipal { principal_id })
    }

    /// Assembles pre-push parameters: the remote coordinates plus one
    /// line per refspec of the form
    /// `<local ref> <local hash> <remote ref> <remote hash>`, with the
    /// zero hash when the remote does not advertise the reference.
    fn pre_push_parameters(&self, options: &PrePushOptions) -> Result<HookParameters, HookError> {
        let mut parameters = HookParameters::new();
        parameters.set("remoteName", &options.remote_name);
        parameters.set("remoteURL", &options.remote_url);

        for spec in &options.ref_specs {
            let local_hash = self.store.get_reference(&spec.local_ref)?.ok_or_else(|| {
                StoreError::ReferenceNotFound {
                    name: spec.local_ref.clone(),
                }
            })?;

            let remote_hash = match self.store.fetch(&options.remote_name, &spec.remote_ref) {
                Ok(hash) => hash,
                Err(StoreError::RemoteReferenceNotFound { .. }) => Hash::ZERO,
                Err(err) => return Err(err.into()),
            };

            parameters.push_line(format!(
                "{} {} {} {}",
                spec.local_ref, local_hash, spec.remote_ref, remote_hash
            ));
        }

        Ok(parameters)
    }
}

/// Installs a hook script under `<git_dir>/hooks/`.
///
/// The hooks directory is created with mode `0750`; the script is written
/// with mode `0700`. An existing file is not overwritten unless `force`
/// is set.
///
/// # Errors
///
/// Returns [`HookError::HookExists`] when the file is present and `force`
/// is false, and I/O errors from the filesystem.
pub fn update_hook(
    git_dir: &Path,
    hook_type: &str,
    content: &[u8],
    force: bool,
) -> Result<(), HookError> {
    let hooks_dir = git_dir.join("hooks");
    fs::create_dir_all(&hooks_dir)?;
    fs::set_permissions(&hooks_dir, fs::Permissions::from_mode(0o750))?;

    let hook_file = hooks_dir.join(hook_type);
    if hook_file.exists() && !force {
        return Err(HookError::HookExists {
            hook_type: hook_type.to_string(),
        });
    }

    tracing::debug!(hook_type, path = %hook_file.display(), "writing hook");
    fs::write(&hook_file, content)?;
    fs::set_permissions(&hook_file, fs::Permissions::from_mode(0o700))?;
    Ok(())
}
