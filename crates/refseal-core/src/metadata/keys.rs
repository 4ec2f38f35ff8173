//! Keys and principals.
//!
//! A [`Key`] is a public verification key of one of several kinds; its
//! identifier is the canonical fingerprint of the key material, computed
//! deterministically. A [`Principal`] is a person or machine identity that
//! owns one or more keys. Within a verified policy state, a key belongs to
//! at most one principal.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::MetadataError;

/// Supported key kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    /// Ed25519 signing key.
    Ed25519,
    /// RSA signing key.
    Rsa,
    /// ECDSA signing key.
    Ecdsa,
    /// OpenPGP key, identified by fingerprint.
    Gpg,
    /// Sigstore Fulcio identity (OIDC identity and issuer).
    Fulcio,
    /// SSH signing key.
    Ssh,
}

impl KeyType {
    /// Returns the canonical string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ed25519 => "ed25519",
            Self::Rsa => "rsa",
            Self::Ecdsa => "ecdsa",
            Self::Gpg => "gpg",
            Self::Fulcio => "fulcio",
            Self::Ssh => "ssh",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific key material.
///
/// Ed25519/RSA/ECDSA/SSH keys carry a hex- or PEM-encoded public component;
/// GPG keys carry their fingerprint in `public`; Fulcio keys carry an
/// identity and issuer pair instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVal {
    /// Public key material.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public: Option<String>,

    /// OIDC identity (Fulcio keys).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,

    /// OIDC issuer (Fulcio keys).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

/// A public verification key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    /// Canonical fingerprint of the key material under `scheme`.
    #[serde(rename = "keyid")]
    pub key_id: String,

    /// Key kind.
    #[serde(rename = "keytype")]
    pub key_type: KeyType,

    /// Signing scheme, e.g. `ed25519`.
    pub scheme: String,

    /// Kind-specific key material.
    #[serde(rename = "keyval")]
    pub key_val: KeyVal,
}

impl Key {
    /// Creates a key, computing its canonical identifier.
    #[must_use]
    pub fn new(key_type: KeyType, scheme: impl Into<String>, key_val: KeyVal) -> Self {
        let scheme = scheme.into();
        let key_id = compute_key_id(key_type, &scheme, &key_val);
        Self {
            key_id,
            key_type,
            scheme,
            key_val,
        }
    }

    /// Creates an Ed25519 key from hex-encoded public key bytes.
    #[must_use]
    pub fn new_ed25519(public_hex: impl Into<String>) -> Self {
        Self::new(
            KeyType::Ed25519,
            "ed25519",
            KeyVal {
                public: Some(public_hex.into()),
                ..KeyVal::default()
            },
        )
    }

    /// Creates a Fulcio identity key.
    #[must_use]
    pub fn new_fulcio(identity: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self::new(
            KeyType::Fulcio,
            "fulcio",
            KeyVal {
                identity: Some(identity.into()),
                issuer: Some(issuer.into()),
                ..KeyVal::default()
            },
        )
    }

    /// Recomputes the canonical identifier from the key material.
    ///
    /// Useful when validating a key received over the wire.
    #[must_use]
    pub fn compute_key_id(&self) -> String {
        compute_key_id(self.key_type, &self.scheme, &self.key_val)
    }
}

/// Computes the canonical key identifier: the hex SHA-256 digest of the
/// RFC 8785 serialization of the key with the identifier itself omitted.
fn compute_key_id(key_type: KeyType, scheme: &str, key_val: &KeyVal) -> String {
    let canonical = serde_json::json!({
        "keytype": key_type,
        "scheme": scheme,
        "keyval": key_val,
    });
    let bytes = serde_jcs::to_vec(&canonical).expect("serialization cannot fail");
    let digest = Sha256::digest(&bytes);

    use std::fmt::Write;
    digest.iter().fold(String::with_capacity(64), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

/// A person or machine identity owning one or more keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "principalType", rename_all = "lowercase")]
pub enum Principal {
    /// A human identity.
    Person {
        /// Stable identifier.
        #[serde(rename = "personID")]
        id: String,
        /// Display name.
        #[serde(default)]
        name: String,
        /// Keys owned by this person.
        #[serde(default)]
        keys: Vec<Key>,
        /// Free-form associated identities (code review handles, etc.).
        #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
        associated_identities: std::collections::BTreeMap<String, String>,
    },

    /// An automated identity (CI runner, bot).
    Machine {
        /// Stable identifier.
        #[serde(rename = "machineID")]
        id: String,
        /// Human label describing the machine.
        #[serde(default)]
        label: String,
        /// Keys owned by this machine.
        #[serde(default)]
        keys: Vec<Key>,
    },
}

impl Principal {
    /// Returns the stable identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Person { id, .. } | Self::Machine { id, .. } => id,
        }
    }

    /// Returns the keys owned by this principal.
    #[must_use]
    pub fn keys(&self) -> &[Key] {
        match self {
            Self::Person { keys, .. } | Self::Machine { keys, .. } => keys,
        }
    }

    /// Returns the human-readable label.
    #[must_use]
    pub fn display_name(&self) -> &str {
        match self {
            Self::Person { name, .. } => name,
            Self::Machine { label, .. } => label,
        }
    }

    /// Returns `true` if this principal owns a key with `key_id`.
    #[must_use]
    pub fn has_key_id(&self, key_id: &str) -> bool {
        self.keys().iter().any(|k| k.key_id == key_id)
    }

    /// Validates structural constraints.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::PrincipalIdEmpty`] for an empty identifier
    /// and [`MetadataError::KeyIdEmpty`] for a key without an identifier.
    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.id().is_empty() {
            return Err(MetadataError::PrincipalIdEmpty);
        }
        if self.keys().iter().any(|k| k.key_id.is_empty()) {
            return Err(MetadataError::KeyIdEmpty);
        }
        Ok(())
    }
}

impl FromStr for KeyType {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ed25519" => Ok(Self::Ed25519),
            "rsa" => Ok(Self::Rsa),
            "ecdsa" => Ok(Self::Ecdsa),
            "gpg" => Ok(Self::Gpg),
            "fulcio" => Ok(Self::Fulcio),
            "ssh" => Ok(Self::Ssh),
            other => Err(MetadataError::UnknownKeyType {
                kind: other.to_string(),
            }),
        }
    }
}
