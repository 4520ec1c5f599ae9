use crate::errors::KmsResult;
use crate::id::{ObjectType, ResourceIdentifier};
use std::fmt;
use std::sync::Arc;

/// Addresses one key for an encrypt or decrypt call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyLocator {
    pub vault: String,
    pub name: String,
    /// `None` lets the vault pick the current version.
    pub version: Option<String>,
}

impl KeyLocator {
    pub fn new(vault: impl Into<String>, name: impl Into<String>, version: Option<&str>) -> Self {
        Self {
            vault: vault.into(),
            name: name.into(),
            version: version
                .filter(|value| !value.is_empty())
                .map(str::to_string),
        }
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Identifier of this key in the public cloud.
    pub fn to_identifier(&self) -> ResourceIdentifier {
        ResourceIdentifier::new(&self.vault, ObjectType::Key, &self.name, self.version())
    }
}

impl From<&ResourceIdentifier> for KeyLocator {
    fn from(id: &ResourceIdentifier) -> Self {
        KeyLocator::new(id.vault(), id.name(), id.version())
    }
}

impl fmt::Display for KeyLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.vault, self.name)?;
        if let Some(version) = &self.version {
            write!(f, "/{version}")?;
        }
        Ok(())
    }
}

/// A secret value as stored in the vault (base64 text for values written by
/// this tool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretBundle {
    pub id: ResourceIdentifier,
    pub value: String,
}

/// Listing entry; values are never returned by list calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretItem {
    pub id: ResourceIdentifier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBundle {
    /// Fully versioned key identifier.
    pub kid: ResourceIdentifier,
}

/// Remote key vault operations the envelope layer relies on.
///
/// Payloads crossing this boundary are base64url text: `encrypt_chunk`
/// receives an encoded plaintext chunk and returns encoded ciphertext, and
/// `decrypt_chunk` is its inverse. Implementations perform one remote call per
/// method and never retry.
pub trait KmsClient: Send + Sync {
    fn get_secret(&self, vault: &str, name: &str, version: Option<&str>) -> KmsResult<SecretBundle>;

    /// Stores `value` (standard base64 text) as the newest version.
    fn put_secret(&self, vault: &str, name: &str, value: &str) -> KmsResult<SecretBundle>;

    fn list_secrets(&self, vault: &str) -> KmsResult<Vec<SecretItem>>;

    fn encrypt_chunk(&self, key: &KeyLocator, chunk: &str) -> KmsResult<String>;

    fn decrypt_chunk(&self, key: &KeyLocator, chunk: &str) -> KmsResult<String>;

    /// Resolves a key; `None` returns the current version.
    fn get_key(&self, vault: &str, name: &str, version: Option<&str>) -> KmsResult<KeyBundle>;

    fn create_key(&self, vault: &str, name: &str) -> KmsResult<KeyBundle>;

    /// Opaque, vault-specific backup blob.
    fn backup_key(&self, vault: &str, name: &str) -> KmsResult<Vec<u8>>;

    fn list_keys(&self, vault: &str) -> KmsResult<Vec<KeyBundle>>;
}

macro_rules! forward_kms_client {
    () => {
        fn get_secret(
            &self,
            vault: &str,
            name: &str,
            version: Option<&str>,
        ) -> KmsResult<SecretBundle> {
            (**self).get_secret(vault, name, version)
        }

        fn put_secret(&self, vault: &str, name: &str, value: &str) -> KmsResult<SecretBundle> {
            (**self).put_secret(vault, name, value)
        }

        fn list_secrets(&self, vault: &str) -> KmsResult<Vec<SecretItem>> {
            (**self).list_secrets(vault)
        }

        fn encrypt_chunk(&self, key: &KeyLocator, chunk: &str) -> KmsResult<String> {
            (**self).encrypt_chunk(key, chunk)
        }

        fn decrypt_chunk(&self, key: &KeyLocator, chunk: &str) -> KmsResult<String> {
            (**self).decrypt_chunk(key, chunk)
        }

        fn get_key(&self, vault: &str, name: &str, version: Option<&str>) -> KmsResult<KeyBundle> {
            (**self).get_key(vault, name, version)
        }

        fn create_key(&self, vault: &str, name: &str) -> KmsResult<KeyBundle> {
            (**self).create_key(vault, name)
        }

        fn backup_key(&self, vault: &str, name: &str) -> KmsResult<Vec<u8>> {
            (**self).backup_key(vault, name)
        }

        fn list_keys(&self, vault: &str) -> KmsResult<Vec<KeyBundle>> {
            (**self).list_keys(vault)
        }
    };
}

impl<T> KmsClient for &T
where
    T: KmsClient + ?Sized,
{
    forward_kms_client!();
}

impl<T> KmsClient for Box<T>
where
    T: KmsClient + ?Sized,
{
    forward_kms_client!();
}

impl<T> KmsClient for Arc<T>
where
    T: KmsClient + ?Sized,
{
    forward_kms_client!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locator_from_identifier_keeps_version() {
        let id = ResourceIdentifier::parse("https://kv.vault.azure.net/keys/helm/abc").unwrap();
        let locator = KeyLocator::from(&id);
        assert_eq!(locator.vault, "kv");
        assert_eq!(locator.name, "helm");
        assert_eq!(locator.version(), Some("abc"));
        assert_eq!(locator.to_string(), "kv/helm/abc");
        assert_eq!(locator.to_identifier(), id);
    }

    #[test]
    fn empty_version_means_latest() {
        let locator = KeyLocator::new("kv", "helm", Some(""));
        assert!(locator.version().is_none());
        assert_eq!(locator.to_string(), "kv/helm");
    }
}
