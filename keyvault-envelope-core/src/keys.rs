use crate::errors::{KmsError, Result};
use crate::files;
use crate::id::ResourceIdentifier;
use crate::kms::{KeyBundle, KmsClient};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub kid: ResourceIdentifier,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "keyvault", default, skip_serializing_if = "String::is_empty")]
    pub vault: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl From<KeyBundle> for Key {
    fn from(bundle: KeyBundle) -> Self {
        let kid = bundle.kid;
        Self {
            name: kid.name().to_string(),
            vault: kid.vault().to_string(),
            version: kid.version().map(str::to_string),
            kid,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyList {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<Key>,
}

pub fn get<K>(kms: &K, vault: &str, name: &str, version: Option<&str>) -> Result<Key>
where
    K: KmsClient + ?Sized,
{
    Ok(kms.get_key(vault, name, version)?.into())
}

/// Creates a key, refusing to touch one that already exists.
pub fn create<K>(kms: &K, vault: &str, name: &str) -> Result<Key>
where
    K: KmsClient + ?Sized,
{
    match kms.get_key(vault, name, None) {
        Ok(_) => return Err(KmsError::Conflict("key already exists".into()).into()),
        Err(KmsError::NotFound { .. }) => {}
        Err(err) => return Err(err.into()),
    }
    let key: Key = kms.create_key(vault, name)?.into();
    info!(kid = %key.kid, "created key");
    Ok(key)
}

/// Writes the vault's backup blob for `name` to `path`.
pub fn backup<K>(kms: &K, vault: &str, name: &str, path: &Path) -> Result<()>
where
    K: KmsClient + ?Sized,
{
    let blob = kms.backup_key(vault, name)?;
    files::write_atomic(path, &blob)?;
    info!(vault, key = name, path = %path.display(), "wrote key backup");
    Ok(())
}

pub fn list<K>(kms: &K, vault: &str) -> Result<KeyList>
where
    K: KmsClient + ?Sized,
{
    let keys = kms.list_keys(vault)?.into_iter().map(Key::from).collect();
    Ok(KeyList { keys })
}

/// `helm` backs up to `HELM.pem`.
pub fn default_backup_path(name: &str) -> PathBuf {
    PathBuf::from(format!("{}.pem", name.to_uppercase()))
}
